//! simbridged HTTP surface
//!
//! Endpoints:
//! - `GET  /status`
//! - `POST /sync/convert`   (file `sbol`)
//! - `POST /sync/analyze`   (file `input`, optional file `environment`)
//! - `POST /async/convert`  (as sync, plus form field `callback`)
//! - `POST /async/analyze`  (as sync, plus form field `callback`)
//!
//! Every other text field is passed to the parameter coder. Sync endpoints
//! stream the result file; async endpoints answer 202 and report through the
//! callback URL.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use simbridge_core::{
    AnalyzeRequest, ConvertRequest, Dispatcher, Job, PipelineError, PipelineOutput,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SBOL_KEY: &str = "sbol";
pub const INPUT_KEY: &str = "input";
pub const ENVIRONMENT_KEY: &str = "environment";
pub const CALLBACK_KEY: &str = "callback";

/// Default request body limit: 100 MB.
pub const DEFAULT_BODY_LIMIT: usize = 100 * 1024 * 1024;

const UPLOADS_DIR: &str = "uploads";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Dispatcher,
    upload_dir: Arc<PathBuf>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Uploads land under `<work_root>/uploads`.
    pub fn new(dispatcher: Dispatcher) -> Self {
        let upload_dir = dispatcher.config().work_root.join(UPLOADS_DIR);
        Self {
            dispatcher,
            upload_dir: Arc::new(upload_dir),
            started_at: chrono::Utc::now(),
        }
    }
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/sync/convert", post(sync_convert))
        .route("/sync/analyze", post(sync_analyze))
        .route("/async/convert", post(async_convert))
        .route("/async/analyze", post(async_analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing file or field, malformed multipart body.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Internal(String),
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Pipeline(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_body() })),
            )
                .into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "simbridge server is up and running!",
        "version": simbridge_core::VERSION,
        "started_at": state.started_at.to_rfc3339(),
    }))
}

async fn sync_convert(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = Upload::read(&state.upload_dir, multipart).await?;
    let request = convert_request(&upload)?;
    let output = state.dispatcher.convert(request).await?;
    stream_output(output).await
}

async fn sync_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = Upload::read(&state.upload_dir, multipart).await?;
    let request = analyze_request(&upload)?;
    let output = state.dispatcher.analyze(request).await?;
    stream_output(output).await
}

async fn async_convert(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = Upload::read(&state.upload_dir, multipart).await?;
    let request = convert_request(&upload)?;
    accept(&state, &upload, Job::Convert(request))
}

async fn async_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = Upload::read(&state.upload_dir, multipart).await?;
    let request = analyze_request(&upload)?;
    accept(&state, &upload, Job::Analyze(request))
}

fn convert_request(upload: &Upload) -> Result<ConvertRequest, ApiError> {
    let input = upload.require_file(
        SBOL_KEY,
        "Must attach an SBOL file with key 'sbol'.",
    )?;
    Ok(ConvertRequest {
        input,
        fields: upload.fields.clone(),
    })
}

fn analyze_request(upload: &Upload) -> Result<AnalyzeRequest, ApiError> {
    let input = upload.require_file(
        INPUT_KEY,
        "Must attach an SBML, SBOL, or OMEX file with key 'input'.",
    )?;
    Ok(AnalyzeRequest {
        input,
        environment: upload.files.get(ENVIRONMENT_KEY).cloned(),
        fields: upload.fields.clone(),
    })
}

fn accept(state: &AppState, upload: &Upload, job: Job) -> Result<Response, ApiError> {
    let callback = upload
        .fields
        .get(CALLBACK_KEY)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest(
                "Must include a callback URL as parameter 'callback'.".to_string(),
            )
        })?;

    let message = format!("Accepted for {}.", job.name());
    let detached = state.dispatcher.spawn_detached(job, callback.clone());
    debug!(request_id = %detached.request_id, "job detached");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": message, "request_id": detached.request_id })),
    )
        .into_response())
}

/// Stream the deliverable as the response body.
async fn stream_output(mut output: PipelineOutput) -> Result<Response, ApiError> {
    let stream = output.deliverable.chunk_stream().await?;
    let content_type = output.deliverable.content_type.clone();
    let disposition = format!("attachment; filename=\"{}\"", output.deliverable.file_name);
    output.mark_delivered();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// A parsed multipart upload: files written to disk plus text fields.
#[derive(Debug, Default)]
pub struct Upload {
    pub files: HashMap<String, PathBuf>,
    pub fields: BTreeMap<String, String>,
}

impl Upload {
    /// Consume the multipart body, writing file parts under `dir`.
    ///
    /// Empty file parts count as absent.
    pub async fn read(dir: &Path, mut multipart: Multipart) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(dir).await?;
        let mut upload = Upload::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(sanitize_file_name) {
                Some(file_name) => {
                    let dest = dir.join(format!("{}-{}", Uuid::new_v4(), file_name));
                    if write_field(field, &dest).await? > 0 {
                        upload.files.insert(name, dest);
                    } else {
                        tokio::fs::remove_file(&dest).await.ok();
                    }
                }
                None => {
                    let value = field.text().await?;
                    upload.fields.insert(name, value);
                }
            }
        }

        Ok(upload)
    }

    fn require_file(&self, key: &str, message: &str) -> Result<PathBuf, ApiError> {
        self.files
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::BadRequest(message.to_string()))
    }
}

async fn write_field(mut field: Field<'_>, dest: &Path) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Keep ASCII letters, digits, `.`, `-` and `_`; replace everything else.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_start_matches('.') {
        "" => {
            warn!(original = %name, "upload file name unusable, using placeholder");
            "upload".to_string()
        }
        trimmed => trimmed.to_string(),
    }
}
