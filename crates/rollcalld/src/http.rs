//! HTTP surface: enrollment, recognition, camera capture, status, EAR check.

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use image::RgbImage;
use rollcall_core::extract::decode_image;
use rollcall_core::liveness::{eye_aspect_ratio, EyeContour, EyePair, EyeState, DEFAULT_EAR_THRESHOLD};
use rollcall_core::{
    Attendance, EnrollError, EnrollmentRequest, ExtractError, NoMatchReason, ProviderError, Recognition,
    RecognizeError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Camera settings for `GET /capture_photo`.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: String,
    pub warmup_frames: usize,
    pub dir: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub attendance: Attendance,
    pub capture: Arc<CaptureSettings>,
    pub collection: String,
    pub backend: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/add_face", post(add_face))
        .route("/recognize_face", post(recognize_face))
        .route("/capture_photo", get(capture_photo))
        .route("/status", get(status))
        .route("/eye_state", post(eye_state))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response with a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl ToString) -> Self {
        Self {
            status,
            detail: detail.to_string(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, format!("missing field: {field}"))
    }

    fn internal(detail: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

fn extract_status(e: &ExtractError) -> StatusCode {
    match e {
        ExtractError::NoFaceDetected | ExtractError::Decode(_) => StatusCode::BAD_REQUEST,
        ExtractError::Provider(ProviderError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        Self::new(extract_status(&e), e)
    }
}

impl From<EnrollError> for ApiError {
    fn from(e: EnrollError) -> Self {
        let status = match &e {
            EnrollError::Validation(_) => StatusCode::BAD_REQUEST,
            EnrollError::Extract(x) => extract_status(x),
            EnrollError::DuplicateIdentity(_) | EnrollError::ConcurrentEnrollment(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "enrollment failed");
        }
        Self::new(status, e)
    }
}

impl From<RecognizeError> for ApiError {
    fn from(e: RecognizeError) -> Self {
        let status = match &e {
            RecognizeError::Extract(x) => extract_status(x),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e)
    }
}

/// Multipart body: the `file` part plus any text fields.
#[derive(Default)]
struct Upload {
    file: Option<axum::body::Bytes>,
    fields: HashMap<String, String>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Upload::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                upload.file = Some(field.bytes().await?);
            } else {
                let value = field.text().await?;
                upload.fields.insert(name, value);
            }
        }
        Ok(upload)
    }

    async fn image(&mut self) -> Result<Arc<RgbImage>, ApiError> {
        let bytes = self.file.take().ok_or_else(|| ApiError::missing("file"))?;
        let image = tokio::task::spawn_blocking(move || decode_image(&bytes))
            .await
            .map_err(ApiError::internal)??;
        Ok(Arc::new(image))
    }
}

/// Enrollment metadata may arrive as query parameters instead of form fields.
#[derive(Debug, Default, Deserialize)]
struct EnrollQuery {
    name: Option<String>,
    user_id: Option<String>,
    prn_no: Option<String>,
}

fn pick(upload: &mut Upload, query: &mut Option<String>, field: &str) -> Result<String, ApiError> {
    upload
        .fields
        .remove(field)
        .or_else(|| query.take())
        .ok_or_else(|| ApiError::missing(field))
}

async fn add_face(
    State(state): State<AppState>,
    Query(mut query): Query<EnrollQuery>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut upload = Upload::read(multipart).await?;
    let request = EnrollmentRequest {
        display_name: pick(&mut upload, &mut query.name, "name")?,
        user_id: pick(&mut upload, &mut query.user_id, "user_id")?,
        secondary_id: pick(&mut upload, &mut query.prn_no, "prn_no")?,
    };
    let image = upload.image().await?;

    let enrollment = state.attendance.enroll(&request, image).await?;
    Ok(Json(json!({
        "message": "Face added successfully",
        "user_id": request.user_id,
        "face_image": enrollment.record.photo_reference,
    })))
}

async fn recognize_face(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let image = Upload::read(multipart).await?.image().await?;

    match state.attendance.recognize(image).await? {
        Recognition::Matched(m) => Ok(Json(json!({
            "user_id": m.identity_key,
            "name": m.record.display_name,
            "prn_no": m.record.secondary_id,
            "similarity": m.similarity,
        }))),
        Recognition::NoMatch(NoMatchReason::NoFaceDetected) => {
            Err(ApiError::new(StatusCode::BAD_REQUEST, ExtractError::NoFaceDetected))
        }
        Recognition::NoMatch(_) => Ok(Json(json!({ "message": "No matching face found" }))),
    }
}

async fn capture_photo(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.capture.clone();
    let result = tokio::task::spawn_blocking(move || {
        rollcall_hw::capture_photo(&settings.device, settings.warmup_frames, &settings.dir)
    })
    .await
    .map_err(ApiError::internal)?;

    match result {
        Ok(path) => Ok(Json(json!({
            "message": "Photo captured",
            "file_path": path.display().to_string(),
        }))),
        Err(e) => {
            tracing::error!(device = %state.capture.device, error = %e, "capture failed");
            Err(ApiError::internal("Failed to capture photo"))
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let attendance = &state.attendance;
    Json(json!({
        "service": "rollcalld",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend,
        "collection": state.collection,
        "threshold": attendance.threshold(),
        "face_policy": attendance.extractor().policy().as_str(),
        "photo_store": attendance.photo_store_kind().unwrap_or("none"),
    }))
}

/// Either both six-point eye contours, or a full 68-point landmark set.
#[derive(Debug, Deserialize)]
struct EyeStateRequest {
    left: Option<EyeContour>,
    right: Option<EyeContour>,
    landmarks: Option<Vec<(f32, f32)>>,
    threshold: Option<f32>,
}

async fn eye_state(Json(req): Json<EyeStateRequest>) -> Result<Json<Value>, ApiError> {
    let eyes = match (req.left, req.right, req.landmarks) {
        (Some(left), Some(right), _) => EyePair { left, right },
        (_, _, Some(shape)) => EyePair::from_68_point(&shape)
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "landmarks must contain 68 points"))?,
        _ => return Err(ApiError::missing("left/right or landmarks")),
    };
    let threshold = req.threshold.unwrap_or(DEFAULT_EAR_THRESHOLD);
    let state = eyes.classify(threshold);

    Ok(Json(json!({
        "ear": eyes.mean_ear(),
        "left_ear": eye_aspect_ratio(&eyes.left),
        "right_ear": eye_aspect_ratio(&eyes.right),
        "threshold": threshold,
        "state": state,
        "closed": state == EyeState::Closed,
    })))
}
