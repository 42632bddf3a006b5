use likeness_core::normalizer::DEFAULT_FACE_SIZE;
use likeness_core::{DetectorParams, EigenfaceParams, PipelineConfig};
use std::path::PathBuf;

/// Default request body cap; base64 inflates photos by a third.
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8080).
    pub bind: String,
    /// Root of the face gallery, one directory per user.
    pub users_dir: PathBuf,
    /// SeetaFace detector model.
    pub model_path: PathBuf,
    /// Side of the square canonical face, in pixels.
    pub face_size: u32,
    /// Smallest face searched for, at least 20.
    pub min_face: u32,
    pub score_threshold: f64,
    pub pyramid_scale: f32,
    pub window_step: u32,
    /// Eigenfaces kept after training; 0 keeps all.
    pub max_components: usize,
    /// Distances above this report "Unknown".
    pub distance_threshold: Option<f64>,
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `LIKENESS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("LIKENESS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| likeness_core::default_data_dir());

        let model_path = std::env::var("LIKENESS_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| likeness_core::default_model_path(&data_dir));
        let detector = DetectorParams::default();

        Self {
            bind: std::env::var("LIKENESS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            users_dir: likeness_core::default_users_dir(&data_dir),
            model_path,
            face_size: env_u32("LIKENESS_FACE_SIZE", DEFAULT_FACE_SIZE).max(1),
            min_face: env_u32("LIKENESS_MIN_FACE", detector.min_face_size),
            score_threshold: env_f64("LIKENESS_SCORE_THRESHOLD", detector.score_threshold),
            pyramid_scale: env_f32("LIKENESS_PYRAMID_SCALE", detector.pyramid_scale_factor),
            window_step: env_u32("LIKENESS_WINDOW_STEP", detector.window_step),
            max_components: env_usize("LIKENESS_MAX_COMPONENTS", 0),
            distance_threshold: env_opt_f64("LIKENESS_DISTANCE_THRESHOLD"),
            max_body_bytes: env_usize("LIKENESS_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            min_face_size: self.min_face,
            score_threshold: self.score_threshold,
            pyramid_scale_factor: self.pyramid_scale,
            window_step: self.window_step,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            face_size: (self.face_size, self.face_size),
            eigenfaces: EigenfaceParams {
                max_components: self.max_components,
                distance_threshold: self.distance_threshold,
            },
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_opt_f64(key).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f32| v.is_finite())
        .unwrap_or(default)
}

fn env_opt_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f64| v.is_finite())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            bind: "127.0.0.1:0".into(),
            users_dir: PathBuf::from("/tmp/users"),
            model_path: PathBuf::from("/tmp/seeta_fd_frontal_v1.0.bin"),
            face_size: 64,
            min_face: 20,
            score_threshold: 2.5,
            pyramid_scale: 0.7,
            window_step: 2,
            max_components: 10,
            distance_threshold: Some(2500.0),
            max_body_bytes: 1024,
        }
    }

    #[test]
    fn test_pipeline_config_from_fields() {
        let pipeline = config().pipeline_config();
        assert_eq!(pipeline.face_size, (64, 64));
        assert_eq!(pipeline.eigenfaces.max_components, 10);
        assert_eq!(pipeline.eigenfaces.distance_threshold, Some(2500.0));
    }

    #[test]
    fn test_detector_params_from_fields() {
        let mut cfg = config();
        assert!(cfg.detector_params().validate().is_ok());
        cfg.min_face = 48;
        let params = cfg.detector_params();
        assert_eq!(params.min_face_size, 48);
        assert_eq!(params.score_threshold, 2.5);
        assert_eq!(params.pyramid_scale_factor, 0.7);
        assert_eq!(params.window_step, 2);
    }
}
