use crate::config::Config;
use likeness_core::pipeline::{LearnOutcome, PipelineError, RecognitionPipeline};
use likeness_core::store::{ImageStore, StoredSample};
use likeness_core::{FaceDetector, FsImageStore, Recognition};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] likeness_core::detector::DetectorError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Gallery and model summary.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub trained: bool,
    pub users: Vec<UserSummary>,
    /// Samples in the gallery on disk.
    pub samples: usize,
    /// Eigenfaces in the published model; 0 while untrained.
    pub components: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub name: String,
    pub samples: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Learn {
        user: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<LearnOutcome, EngineError>>,
    },
    Detect {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Recognition>, EngineError>>,
    },
    Sample {
        user: String,
        reply: oneshot::Sender<Result<Option<StoredSample>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Store the largest face in `image` under `user` and retrain.
    pub async fn learn(&self, user: String, image: Vec<u8>) -> Result<LearnOutcome, EngineError> {
        self.call(|reply| EngineRequest::Learn { user, image, reply })
            .await
    }

    /// Identify every face in `image`, best match first.
    pub async fn detect(&self, image: Vec<u8>) -> Result<Vec<Recognition>, EngineError> {
        self.call(|reply| EngineRequest::Detect { image, reply }).await
    }

    /// First stored sample for `user`.
    pub async fn sample(&self, user: String) -> Result<Option<StoredSample>, EngineError> {
        self.call(|reply| EngineRequest::Sample { user, reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the detector model and open the gallery, then spawn the engine.
///
/// Fails fast if the model is missing or malformed, or the detector
/// parameters are out of range. The model itself is
/// trained lazily by the first detect request.
pub fn start_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector = FaceDetector::load(&config.model_path, config.detector_params())?;

    let pipeline_config = config.pipeline_config();
    let store = FsImageStore::new(&config.users_dir, pipeline_config.face_size);
    tracing::info!(
        users_dir = %config.users_dir.display(),
        face_size = config.face_size,
        "gallery opened"
    );

    spawn_engine(RecognitionPipeline::new(
        Arc::new(detector),
        store,
        pipeline_config,
    ))
}

/// Spawn the engine on a dedicated OS thread that owns `pipeline`.
///
/// Requests are handled one at a time, so every learn and detect sees a
/// complete trained snapshot.
pub fn spawn_engine<S>(mut pipeline: RecognitionPipeline<S>) -> Result<EngineHandle, EngineError>
where
    S: ImageStore + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Learn { user, image, reply } => {
                        let result = pipeline.learn_face(&user, &image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect { image, reply } => {
                        let result = pipeline.detect_faces(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Sample { user, reply } => {
                        let result = pipeline.sample_image(&user).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(run_status(&pipeline));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_status<S: ImageStore>(pipeline: &RecognitionPipeline<S>) -> Result<EngineStatus, EngineError> {
    let users: Vec<UserSummary> = pipeline
        .gallery()?
        .into_iter()
        .map(|(name, samples)| UserSummary { name, samples })
        .collect();
    let snapshot = pipeline.snapshot();

    Ok(EngineStatus {
        trained: snapshot.is_some(),
        samples: users.iter().map(|u| u.samples).sum(),
        components: snapshot.map_or(0, |s| s.model().component_count()),
        users,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};
    use likeness_core::{FaceBox, FaceLocator, PipelineConfig};
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Reports one face covering the centre of every image.
    pub(crate) struct CenterFace;

    impl FaceLocator for CenterFace {
        fn locate(&self, gray: &GrayImage) -> Vec<FaceBox> {
            let (w, h) = gray.dimensions();
            vec![FaceBox::new(w / 4, h / 4, w / 2, h / 2)]
        }
    }

    /// Reports no faces at all.
    pub(crate) struct NoFace;

    impl FaceLocator for NoFace {
        fn locate(&self, _gray: &GrayImage) -> Vec<FaceBox> {
            Vec::new()
        }
    }

    /// PNG bytes of a 40x40 gradient; `horizontal` picks the gradient axis.
    pub(crate) fn photo(horizontal: bool) -> Vec<u8> {
        let image = GrayImage::from_fn(40, 40, |x, y| {
            let v = if horizontal { x } else { y };
            Luma([(v * 6) as u8])
        });
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    pub(crate) fn engine(tmp: &TempDir, locator: Arc<dyn FaceLocator>) -> EngineHandle {
        let config = PipelineConfig {
            face_size: (16, 16),
            ..PipelineConfig::default()
        };
        let store = FsImageStore::new(tmp.path().join("users"), config.face_size);
        spawn_engine(RecognitionPipeline::new(locator, store, config)).unwrap()
    }

    #[tokio::test]
    async fn test_learn_then_detect_through_engine() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(CenterFace));

        let outcome = engine.learn("alice".into(), photo(true)).await.unwrap();
        assert_eq!(outcome.user, "alice");
        engine.learn("bob".into(), photo(false)).await.unwrap();

        let results = engine.detect(photo(false)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "bob");
    }

    #[tokio::test]
    async fn test_status_reflects_gallery() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(CenterFace));

        let before = engine.status().await.unwrap();
        assert!(!before.trained);
        assert!(before.users.is_empty());

        engine.learn("alice".into(), photo(true)).await.unwrap();
        engine.learn("alice".into(), photo(false)).await.unwrap();

        let after = engine.status().await.unwrap();
        assert!(after.trained);
        assert_eq!(after.samples, 2);
        assert_eq!(after.users.len(), 1);
        assert_eq!(after.users[0].name, "alice");
        assert_eq!(after.users[0].samples, 2);
    }

    #[tokio::test]
    async fn test_no_face_error_crosses_channel() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(NoFace));

        let err = engine.learn("alice".into(), photo(true)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Pipeline(PipelineError::NoFaceDetected)
        ));
        assert!(engine.sample("alice".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_detects_are_serialized() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(CenterFace));
        engine.learn("alice".into(), photo(true)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move { engine.detect(photo(true)).await }));
        }
        for task in tasks {
            let results = task.await.unwrap().unwrap();
            assert_eq!(results[0].name, "alice");
        }
    }

    #[test]
    fn test_missing_model_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            bind: "127.0.0.1:0".into(),
            users_dir: tmp.path().join("users"),
            model_path: tmp.path().join("missing.bin"),
            face_size: 100,
            min_face: 20,
            score_threshold: 2.0,
            pyramid_scale: 0.8,
            window_step: 4,
            max_components: 0,
            distance_threshold: None,
            max_body_bytes: 1024,
        };
        assert!(matches!(
            start_engine(&config),
            Err(EngineError::Detector(_))
        ));
    }
}
