/// API route handlers for the ytclip web client.
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use ytclip_shared::models::OutputFormat;
use ytclip_shared::{DownloadError, DownloadRequest, JobId, ProgressRecord};

use crate::AppState;

// ====== REQUEST / RESPONSE TYPES ======

/// Error response body.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: message.into() }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub success: bool,
    pub message: String,
    pub download_url: String,
    pub filename: String,
    pub file_size: String,
    pub quality: String,
    pub timestamp: String,
    pub clipped: bool,
    pub format: String,
    pub download_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFailure {
    pub error: String,
    pub download_id: String,
}

// ====== CAPABILITY ROUTES ======

/// GET /api/test
pub async fn capability_probe(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let trim_available = state.orchestrator.capabilities().trim_available;
    Json(serde_json::json!({
        "message": "Downloader with Progress Tracking Active!",
        "ffmpeg": if trim_available { "Found and Ready" } else { "Not Found" },
        "features": ["Progress Tracking", "Quality Selection", "Timestamp Support"],
        "activeJobs": state.orchestrator.store().active_count(),
    }))
}

/// POST /api/video-info - static capability echo, no metadata lookup
pub async fn video_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "title": "YouTube Video",
        "duration": "Unknown",
        "channel": "YouTube",
        "message": "Ready for download with progress tracking!",
        "timestampSupport": state.orchestrator.capabilities().trim_available,
        "qualityOptions": ["360p", "480p", "720p", "1080p", "Best Available"],
    }))
}

// ====== PROGRESS ROUTE ======

/// GET /api/progress/:id
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<ProgressRecord> {
    let record = match id.parse::<JobId>() {
        Ok(job) => state.orchestrator.store().get(job),
        Err(_) => ProgressRecord::starting(),
    };
    Json(record)
}

// ====== DOWNLOAD ROUTE ======

/// POST /api/download - run a download to completion
pub async fn submit_download(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, (StatusCode, Json<serde_json::Value>)> {
    let reject = |status: StatusCode, value: serde_json::Value| (status, Json(value));

    let Json(request) = body.map_err(|e| {
        reject(StatusCode::BAD_REQUEST, serde_json::json!({ "error": e.body_text() }))
    })?;

    info!(
        "Download request: start={:?} end={:?} quality={:?} format={:?}",
        request.start_time, request.end_time, request.quality, request.format
    );

    let plan = state.orchestrator.plan(&request).map_err(|e| {
        warn!("Rejected download request: {}", e);
        reject(StatusCode::BAD_REQUEST, serde_json::json!({ "error": e.to_string() }))
    })?;

    // The job runs on its own task, so a client disconnect does not cancel it.
    let job = state.orchestrator.begin();
    let outcome = match state.orchestrator.spawn(job, plan.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Job {} task ended abnormally: {}", job, e);
            Err(DownloadError::Interrupted)
        }
    };

    match outcome {
        Ok(artifact) => {
            let message = if artifact.clipped {
                "Timestamp download completed!"
            } else {
                "Video downloaded!"
            };
            Ok(Json(DownloadResponse {
                success: true,
                message: message.to_string(),
                download_url: format!("/downloads/{}", artifact.filename),
                file_size: artifact.size_display(),
                quality: plan.quality_label().to_string(),
                timestamp: plan.timestamp_label(artifact.clipped),
                clipped: artifact.clipped,
                format: artifact.extension.clone(),
                download_id: job.to_string(),
                filename: artifact.filename,
            }))
        }
        Err(e) => {
            let failure = DownloadFailure {
                error: format!("Download failed: {}", e),
                download_id: job.to_string(),
            };
            Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(failure).unwrap_or_default(),
            ))
        }
    }
}

// ====== ARTIFACT ROUTE ======

/// Resolve a requested filename inside the downloads directory.
///
/// Only a single plain path component is accepted, and the canonical result
/// must still live under the directory (so symlinks cannot escape it).
fn resolve_artifact(dir: &std::path::Path, filename: &str) -> Option<PathBuf> {
    if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
        return None;
    }
    let mut components = std::path::Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }

    let root = dir.canonicalize().ok()?;
    let candidate = root.join(filename).canonicalize().ok()?;
    (candidate.starts_with(&root) && candidate.is_file()).then_some(candidate)
}

fn content_type_for(filename: &str) -> &'static str {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension)
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream")
}

/// GET /downloads/:filename - stream a finished artifact
pub async fn serve_artifact(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(path) = resolve_artifact(state.download_dir(), &filename) else {
        warn!("Artifact not found or not allowed: {:?}", filename);
        return Err(api_error(StatusCode::NOT_FOUND, "File not found"));
    };

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Cannot open file: {}", e)))?;
    let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
    info!("Serving: {} ({:.2} MB)", filename, size as f64 / (1024.0 * 1024.0));

    let body = Body::from_stream(ReaderStream::new(file));
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', "_"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&filename).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    ))
}
