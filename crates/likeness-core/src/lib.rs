//! likeness-core — Face detection and recognition engine.
//!
//! SeetaFace detection, bicubic face normalization and eigenface
//! recognition, tied together by [`RecognitionPipeline`] over an
//! [`ImageStore`] gallery.

pub mod detector;
pub mod labels;
pub mod normalizer;
pub mod pipeline;
pub mod recognizer;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};

pub use detector::{DetectorParams, FaceDetector, FaceLocator};
pub use labels::LabelIndex;
pub use pipeline::{LearnOutcome, PipelineConfig, PipelineError, RecognitionPipeline, TrainedState};
pub use recognizer::{EigenfaceModel, EigenfaceParams};
pub use store::{FsImageStore, ImageStore};
pub use types::{FaceBox, Prediction, Recognition};

/// Detector model looked up under `<data>/models/` when none is configured.
pub const DEFAULT_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";

/// `$XDG_DATA_HOME/likeness`, falling back to `~/.local/share/likeness`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}

pub fn default_users_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("users")
}

pub fn default_model_path(data_dir: &Path) -> PathBuf {
    data_dir.join("models").join(DEFAULT_MODEL_FILE)
}
