use crate::engine::{EngineError, EngineHandle, EngineStatus};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use likeness_core::pipeline::PipelineError;
use likeness_core::store::StoreError;
use likeness_core::{FaceBox, Recognition};
use serde::Serialize;
use tower_http::cors::CorsLayer;

pub fn router(engine: EngineHandle, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/face/learn/:user", post(learn))
        .route("/api/face/detect", post(detect))
        .route("/api/face/image/:user", get(user_image))
        .route("/api/status", get(status))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

#[derive(Debug, Serialize)]
pub struct LearnResponse {
    pub user: String,
    pub key: String,
    pub region: FaceBox,
    /// Gallery size after the retrain.
    pub samples: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub engine: EngineStatus,
}

/// JSON error body: `{"error": kind, "message": text}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.kind,
            message: &self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        let (status, kind) = match &err {
            EngineError::Pipeline(PipelineError::InvalidUserName)
            | EngineError::Pipeline(PipelineError::Store(StoreError::InvalidUserName(_))) => {
                (StatusCode::BAD_REQUEST, "invalid_user")
            }
            EngineError::Pipeline(PipelineError::Decode(_)) => (StatusCode::BAD_REQUEST, "decode"),
            EngineError::Pipeline(PipelineError::NoFaceDetected) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "no_face")
            }
            EngineError::Pipeline(PipelineError::Training(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "training")
            }
            EngineError::Pipeline(PipelineError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store")
            }
            EngineError::Pipeline(PipelineError::Recognizer(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "recognizer")
            }
            EngineError::Detector(_) | EngineError::Spawn(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "engine")
            }
            EngineError::ChannelClosed => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, kind, "request failed");
        } else {
            tracing::debug!(error = %message, kind, "request rejected");
        }
        Self::new(status, kind, message)
    }
}

/// Decode a JSON string body holding a base64 image, with or without a
/// `data:<mime>;base64,` prefix.
fn decode_image(body: Result<Json<String>, JsonRejection>) -> Result<Vec<u8>, ApiError> {
    let Json(encoded) =
        body.map_err(|rejection| ApiError::new(rejection.status(), "bad_request", rejection.body_text()))?;

    let encoded = encoded.trim();
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "decode", format!("invalid base64 image: {e}")))
}

async fn learn(
    State(engine): State<EngineHandle>,
    Path(user): Path<String>,
    body: Result<Json<String>, JsonRejection>,
) -> Result<Json<LearnResponse>, ApiError> {
    let image = decode_image(body)?;
    let outcome = engine.learn(user, image).await?;
    Ok(Json(LearnResponse {
        user: outcome.user,
        key: outcome.key,
        region: outcome.region,
        samples: outcome.gallery_samples,
    }))
}

async fn detect(
    State(engine): State<EngineHandle>,
    body: Result<Json<String>, JsonRejection>,
) -> Result<Json<Vec<Recognition>>, ApiError> {
    let image = decode_image(body)?;
    Ok(Json(engine.detect(image).await?))
}

async fn user_image(
    State(engine): State<EngineHandle>,
    Path(user): Path<String>,
) -> Result<Response, ApiError> {
    match engine.sample(user.clone()).await? {
        Some(sample) => Ok(([(header::CONTENT_TYPE, sample.content_type)], sample.bytes).into_response()),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no image stored for {user}"),
        )),
    }
}

async fn status(State(engine): State<EngineHandle>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        engine: engine.status().await?,
    }))
}
