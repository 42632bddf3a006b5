//! Face detector via the SeetaFace funnel-structured cascade (`rustface`).
//!
//! Loads the pretrained frontal-face model once and runs its multi-scale
//! sliding-window search over a grayscale image. Boxes are clipped to the
//! image before they leave this module.

use crate::types::FaceBox;
use image::GrayImage;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
/// Smallest face the SeetaFace model can be asked for.
const SEETA_MIN_FACE_SIZE: u32 = 20;
const DEFAULT_SCORE_THRESHOLD: f64 = 2.0;
const DEFAULT_PYRAMID_SCALE: f32 = 0.8;
const DEFAULT_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place seeta_fd_frontal_v1.0.bin there")]
    ModelNotFound(String),
    #[error("failed to read detector model: {0}")]
    Model(#[from] std::io::Error),
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
}

/// Anything that can propose face regions in a grayscale image.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, gray: &GrayImage) -> Vec<FaceBox>;
}

/// Multi-scale search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    /// Smallest face side searched, in source pixels. At least 20.
    pub min_face_size: u32,
    /// Minimum classifier score for a window to count as a face.
    pub score_threshold: f64,
    /// Shrink factor between pyramid levels, in (0, 1).
    pub pyramid_scale_factor: f32,
    /// Sliding-window stride in pixels, both axes.
    pub window_step: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            min_face_size: SEETA_MIN_FACE_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            pyramid_scale_factor: DEFAULT_PYRAMID_SCALE,
            window_step: DEFAULT_WINDOW_STEP,
        }
    }
}

impl DetectorParams {
    /// Rejects values the underlying detector would panic on.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.min_face_size < SEETA_MIN_FACE_SIZE {
            return Err(DetectorError::InvalidParams(format!(
                "min_face_size must be at least {SEETA_MIN_FACE_SIZE}, got {}",
                self.min_face_size
            )));
        }
        if !self.score_threshold.is_finite() {
            return Err(DetectorError::InvalidParams(format!(
                "score_threshold must be finite, got {}",
                self.score_threshold
            )));
        }
        let scale = self.pyramid_scale_factor;
        if !scale.is_finite() || scale <= 0.0 || scale >= 1.0 {
            return Err(DetectorError::InvalidParams(format!(
                "pyramid_scale_factor must lie in (0, 1), got {scale}"
            )));
        }
        if self.window_step == 0 {
            return Err(DetectorError::InvalidParams(
                "window_step must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// SeetaFace-based face detector. Holds read-only model weights.
pub struct FaceDetector {
    model: rustface::Model,
    params: DetectorParams,
}

impl FaceDetector {
    /// Load the SeetaFace model from the given path.
    pub fn load(model_path: impl AsRef<Path>, params: DetectorParams) -> Result<Self, DetectorError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(path)?;
        let detector = Self::from_reader(std::io::BufReader::new(file), params)?;

        tracing::info!(
            path = %path.display(),
            min_face = detector.params.min_face_size,
            score_threshold = detector.params.score_threshold,
            "loaded SeetaFace model"
        );
        Ok(detector)
    }

    /// Build a detector from model bytes already in hand.
    pub fn from_reader(reader: impl Read, params: DetectorParams) -> Result<Self, DetectorError> {
        params.validate()?;
        let model = rustface::read_model(reader)?;
        Ok(Self { model, params })
    }

    /// Detect faces in a grayscale image. Order of the returned boxes is unspecified.
    pub fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        let (width, height) = gray.dimensions();
        if width < self.params.min_face_size || height < self.params.min_face_size {
            return Vec::new();
        }

        // The rustface detector keeps scratch buffers, so each call gets its own.
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_face_size);
        detector.set_score_thresh(self.params.score_threshold);
        detector.set_pyramid_scale_factor(self.params.pyramid_scale_factor);
        detector.set_slide_window_step(self.params.window_step, self.params.window_step);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
        tracing::trace!(raw = faces.len(), "seeta detections");

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                clip_to_image(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)
            })
            .collect()
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }
}

impl FaceLocator for FaceDetector {
    fn locate(&self, gray: &GrayImage) -> Vec<FaceBox> {
        self.detect(gray)
    }
}

/// Intersect a detector rectangle (which may start off-image) with the image.
fn clip_to_image(x: i32, y: i32, width: u32, height: u32, img_w: u32, img_h: u32) -> Option<FaceBox> {
    let left = i64::from(x).clamp(0, i64::from(img_w));
    let top = i64::from(y).clamp(0, i64::from(img_h));
    let right = (i64::from(x) + i64::from(width)).clamp(0, i64::from(img_w));
    let bottom = (i64::from(y) + i64::from(height)).clamp(0, i64::from(img_h));

    if right <= left || bottom <= top {
        return None;
    }
    Some(FaceBox::new(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}
