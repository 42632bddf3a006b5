use serde::{Deserialize, Serialize};

/// Label reserved for faces that match no enrolled user.
pub const UNKNOWN_LABEL: u32 = 0;

/// Name reported for [`UNKNOWN_LABEL`].
pub const UNKNOWN_NAME: &str = "Unknown";

/// Axis-aligned face region in source image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Whether the box is non-empty and lies entirely inside a `width × height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= width as u64
            && self.bottom() <= height as u64
    }
}

/// Output of the recognition model for a single normalized face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    /// Distance to the nearest training face in eigenface space.
    /// Lower = better match; `f64::MAX` when nothing could be compared.
    pub distance: f64,
}

impl Prediction {
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LABEL,
            distance: f64::MAX,
        }
    }
}

/// A recognized (or unrecognized) face in a submitted photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub name: String,
    /// Eigenface distance of the match. Lower = better.
    pub confidence: f64,
    pub label: u32,
    pub region: FaceBox,
}
