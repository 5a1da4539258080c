//! REST endpoints for print submission and status.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::devices::DeviceDiscovery;
use crate::error::{DeviceError, Error, JobError, StorageError};
use crate::jobs::{ColorMode, PaperSize, PrintOptions, Sides};
use crate::service::PrintService;

/// Multipart overhead allowed on top of the file size limit.
const MULTIPART_SLACK: usize = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: PrintService,
    pub devices: Arc<dyn DeviceDiscovery>,
}

/// Build the Axum router for the print API.
pub fn print_routes(
    service: PrintService,
    devices: Arc<dyn DeviceDiscovery>,
    max_file_size: u64,
) -> Router {
    let state = AppState { service, devices };
    let body_limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);

    Router::new()
        .route("/health", get(health))
        .route("/api/print/printers", get(list_printers))
        .route("/api/print/upload", post(upload))
        .route("/api/print/queue/status", get(queue_status))
        .route("/api/print/status/{id}", get(job_status))
        .route("/api/print/task/{id}/status", get(job_status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Error response: HTTP status plus a numeric code clients switch on.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: u32,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u32,
    message: &'a str,
    timestamp: i64,
}

impl ApiError {
    fn new(status: StatusCode, code: u32, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, 4001, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
            timestamp: Utc::now().timestamp_millis(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, 4001, e.to_string()),
            JobError::Invalid { .. } | JobError::Duplicate { .. } => Self::bad_request(e.to_string()),
            JobError::InvalidTransition { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, 5000, e.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Empty | StorageError::UnsupportedFormat { .. } => {
                Self::bad_request(e.to_string())
            }
            StorageError::TooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, 2002, e.to_string())
            }
            StorageError::Io { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, 2003, e.to_string())
            }
        }
    }
}

impl From<DeviceError> for ApiError {
    fn from(e: DeviceError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, 5000, e.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Job(e) => e.into(),
            Error::Storage(e) => e.into(),
            Error::Device(e) => e.into(),
            Error::Config(e) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, 5000, e.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(StatusCode::PAYLOAD_TOO_LARGE, 2002, e.body_text())
        } else {
            Self::bad_request(e.body_text())
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "web-print"
    }))
}

// ── Printers ────────────────────────────────────────────────────────────

async fn list_printers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let devices = state.devices.list_devices().await.map_err(|e| {
        error!(error = %e, "Failed to retrieve printer list");
        ApiError::from(e)
    })?;
    Ok(Json(devices))
}

// ── Upload ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    code: u32,
    task_id: Uuid,
    message: &'static str,
    timestamp: i64,
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            file = Some((filename, bytes.to_vec()));
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let Some((filename, bytes)) = file else {
        warn!("Upload without a file part");
        return Err(StorageError::Empty.into());
    };

    let device = fields.get("printerId").map(|s| s.trim()).unwrap_or_default();
    let options = parse_options(&fields)?;

    info!(
        filename = %filename,
        printer = device,
        copies = options.copies,
        "Received print request"
    );

    let task_id = state
        .service
        .submit_upload(&filename, &bytes, device, options)
        .await?;

    Ok(Json(UploadResponse {
        code: 1000,
        task_id,
        message: "File uploaded successfully, print task created",
        timestamp: Utc::now().timestamp_millis(),
    }))
}

/// Read print options from form fields, defaulting anything omitted.
fn parse_options(fields: &HashMap<String, String>) -> Result<PrintOptions, ApiError> {
    fn field<T>(fields: &HashMap<String, String>, key: &str) -> Result<Option<T>, ApiError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match fields.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| ApiError::bad_request(format!("Invalid request parameters: {e}"))),
        }
    }

    let copies = match fields.get("copies").map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => 1,
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            ApiError::bad_request(format!("Invalid request parameters: copies {raw:?}"))
        })?,
    };

    Ok(PrintOptions {
        copies,
        paper_size: field::<PaperSize>(fields, "paperSize")?.unwrap_or_default(),
        sides: field::<Sides>(fields, "duplex")?.unwrap_or_default(),
        color_mode: field::<ColorMode>(fields, "colorMode")?.unwrap_or_default(),
    })
}

// ── Status ──────────────────────────────────────────────────────────────

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.queue_status().await)
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::bad_request("Invalid task ID"))?;
    let status = state.service.job_status(id).await?;
    Ok(Json(status))
}
