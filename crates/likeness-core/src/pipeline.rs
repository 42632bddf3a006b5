//! Recognition pipeline: detector → normalizer → eigenface model.
//!
//! Owns the current trained snapshot (model + label index) and its retrain
//! lifecycle. A snapshot is immutable; retraining builds a fresh one from the
//! whole gallery and swaps the handle, so a prediction always runs against a
//! model and label index that were built together.

use crate::detector::FaceLocator;
use crate::labels::LabelIndex;
use crate::normalizer::{self, DEFAULT_FACE_SIZE};
use crate::recognizer::{EigenfaceModel, EigenfaceParams, RecognizerError};
use crate::store::{ImageStore, StoreError, StoredSample};
use crate::types::{FaceBox, Recognition};
use image::GrayImage;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("user name must not be empty")]
    InvalidUserName,
    #[error("image could not be decoded: {0}")]
    Decode(#[source] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("gallery error: {0}")]
    Store(#[from] StoreError),
    #[error("training failed: {0}")]
    Training(#[source] RecognizerError),
    #[error("prediction failed: {0}")]
    Recognizer(#[source] RecognizerError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Canonical face size (width, height) fed to the recognizer.
    pub face_size: (u32, u32),
    pub eigenfaces: EigenfaceParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            face_size: (DEFAULT_FACE_SIZE, DEFAULT_FACE_SIZE),
            eigenfaces: EigenfaceParams::default(),
        }
    }
}

/// Model and label index produced by one retrain.
#[derive(Debug)]
pub struct TrainedState {
    model: EigenfaceModel,
    labels: LabelIndex,
}

impl TrainedState {
    pub fn model(&self) -> &EigenfaceModel {
        &self.model
    }

    pub fn labels(&self) -> &LabelIndex {
        &self.labels
    }

    /// Gallery faces the model was fit to.
    pub fn sample_count(&self) -> usize {
        self.model.sample_count()
    }

    /// Recognize one normalized face against this snapshot.
    fn recognize(&self, face: &GrayImage, region: FaceBox) -> Result<Recognition, RecognizerError> {
        let prediction = self.model.predict(face)?;
        let (label, name) = self.labels.resolve(prediction.label);
        Ok(Recognition {
            name: name.to_string(),
            confidence: prediction.distance,
            label,
            region,
        })
    }
}

/// Result of a successful learn call.
#[derive(Debug, Clone)]
pub struct LearnOutcome {
    pub user: String,
    /// Storage key of the new sample.
    pub key: String,
    /// Region of the source photo that was stored.
    pub region: FaceBox,
    /// Gallery size after the retrain.
    pub gallery_samples: usize,
}

/// Detector → normalizer → model orchestration over an [`ImageStore`] gallery.
///
/// Starts untrained; the first `detect_faces` trains from the gallery, and
/// every successful `learn_face` retrains from scratch.
pub struct RecognitionPipeline<S: ImageStore> {
    locator: Arc<dyn FaceLocator>,
    store: S,
    config: PipelineConfig,
    trained: Option<Arc<TrainedState>>,
}

impl<S: ImageStore> RecognitionPipeline<S> {
    pub fn new(locator: Arc<dyn FaceLocator>, store: S, config: PipelineConfig) -> Self {
        Self {
            locator,
            store,
            config,
            trained: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Currently published snapshot, if any retrain has succeeded.
    pub fn snapshot(&self) -> Option<Arc<TrainedState>> {
        self.trained.clone()
    }

    /// Label index of the published snapshot; only "Unknown" before the first retrain.
    pub fn labels(&self) -> LabelIndex {
        self.trained
            .as_ref()
            .map(|state| state.labels.clone())
            .unwrap_or_default()
    }

    /// Register the largest face in `image_bytes` under `user`, then retrain.
    ///
    /// Returns [`PipelineError::NoFaceDetected`] without touching the gallery
    /// or the model when no usable face is found.
    ///
    /// The sample is saved before the retrain. If the retrain then fails the
    /// error is returned but the sample stays in the gallery, so retrying the
    /// same photo stores it a second time.
    pub fn learn_face(&mut self, user: &str, image_bytes: &[u8]) -> Result<LearnOutcome, PipelineError> {
        if user.is_empty() {
            return Err(PipelineError::InvalidUserName);
        }
        let gray = decode_gray(image_bytes)?;

        let mut regions = self.locator.locate(&gray);
        // Stable: among equal areas the first detection wins.
        regions.sort_by_key(|r| Reverse(r.area()));

        let Some((region, face)) = regions
            .iter()
            .find_map(|r| self.normalize_or_skip(&gray, r).map(|face| (*r, face)))
        else {
            tracing::info!(user, "learn: no face detected; gallery unchanged");
            return Err(PipelineError::NoFaceDetected);
        };

        let key = self.store.save_sample(user, &face)?;
        tracing::info!(user, key, ?region, "learn: face stored");

        let state = self.retrain()?;
        Ok(LearnOutcome {
            user: user.to_string(),
            key,
            region,
            gallery_samples: state.sample_count(),
        })
    }

    /// Locate and identify every face in `image_bytes`, best match (lowest distance) first.
    pub fn detect_faces(&mut self, image_bytes: &[u8]) -> Result<Vec<Recognition>, PipelineError> {
        let started = Instant::now();
        let gray = decode_gray(image_bytes)?;

        let faces: Vec<(FaceBox, GrayImage)> = self
            .locator
            .locate(&gray)
            .into_iter()
            .filter_map(|region| self.normalize_or_skip(&gray, &region).map(|face| (region, face)))
            .collect();
        if faces.is_empty() {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "detect: no faces"
            );
            return Ok(Vec::new());
        }

        let state = self.ensure_trained()?;
        let mut results = Vec::with_capacity(faces.len());
        for (region, face) in faces {
            let recognition = state
                .recognize(&face, region)
                .map_err(PipelineError::Recognizer)?;
            tracing::debug!(
                name = %recognition.name,
                label = recognition.label,
                confidence = recognition.confidence,
                ?region,
                "detect: face recognized"
            );
            results.push(recognition);
        }

        rank_recognitions(&mut results);
        tracing::info!(
            faces = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "detect: done"
        );
        Ok(results)
    }

    /// Rebuild the model and label index from the whole gallery and publish them.
    ///
    /// On failure the previously published snapshot (if any) stays in place.
    pub fn retrain(&mut self) -> Result<Arc<TrainedState>, PipelineError> {
        let started = Instant::now();
        let labels = LabelIndex::from_users(self.store.list_users()?);

        let mut images = Vec::new();
        let mut image_labels = Vec::new();
        for (i, user) in labels.users().iter().enumerate() {
            for sample in self.store.list_samples(user)? {
                images.push(
                    normalizer::resize_to(sample, self.config.face_size)
                        .map_err(StoreError::from)?,
                );
                image_labels.push(i as u32 + 1);
            }
        }

        let model = EigenfaceModel::train(&images, &image_labels, self.config.eigenfaces.clone())
            .map_err(|e| {
                tracing::error!(error = %e, "retrain failed; previous model kept");
                PipelineError::Training(e)
            })?;

        tracing::info!(
            users = labels.len(),
            samples = images.len(),
            components = model.component_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recognizer retrained"
        );

        let state = Arc::new(TrainedState { model, labels });
        self.trained = Some(Arc::clone(&state));
        Ok(state)
    }

    /// First stored sample for `user`, for serving.
    pub fn sample_image(&self, user: &str) -> Result<Option<StoredSample>, PipelineError> {
        Ok(self.store.first_sample(user)?)
    }

    /// Every user with their stored sample count, in label order.
    pub fn gallery(&self) -> Result<Vec<(String, usize)>, PipelineError> {
        let mut users = Vec::new();
        for user in self.store.list_users()? {
            let count = self.store.sample_keys(&user)?.len();
            users.push((user, count));
        }
        Ok(users)
    }

    fn ensure_trained(&mut self) -> Result<Arc<TrainedState>, PipelineError> {
        match &self.trained {
            Some(state) => Ok(Arc::clone(state)),
            None => {
                tracing::info!("first request: training from gallery");
                self.retrain()
            }
        }
    }

    fn normalize_or_skip(&self, gray: &GrayImage, region: &FaceBox) -> Option<GrayImage> {
        match normalizer::normalize(gray, region, self.config.face_size) {
            Ok(face) => Some(face),
            Err(e) => {
                tracing::warn!(?region, error = %e, "dropping face region");
                None
            }
        }
    }
}

/// Sort best match first (ascending distance). Stable, so equal distances keep
/// detection order.
pub fn rank_recognitions(results: &mut [Recognition]) {
    results.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));
}

fn decode_gray(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    let image = image::load_from_memory(bytes).map_err(PipelineError::Decode)?;
    Ok(image.to_luma8())
}
