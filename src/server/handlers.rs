//! Route handlers

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::api::auth::{Credentials, Locale};
use crate::crypto::aax::is_audible_file;
use crate::crypto::activation::ActivationBytes;
use crate::discovery::{AttemptRecord, DiscoveryContext, DiscoveryResult, Method};
use crate::file::paths::safe_child_path;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("static/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        module: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub upload_folder: String,
    pub output_folder: String,
    pub max_chunk_size_mb: f64,
    pub ffmpeg_available: bool,
    pub ffmpeg_error: Option<String>,
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let settings = state.pipeline.settings();
    let ffmpeg = state.pipeline.transcoder().check_availability().await;

    Json(StatusResponse {
        status: "running",
        upload_folder: settings.upload_dir.display().to_string(),
        output_folder: settings.output_dir.display().to_string(),
        max_chunk_size_mb: settings.max_chunk_mb,
        ffmpeg_available: ffmpeg.is_ok(),
        ffmpeg_error: ffmpeg.err().map(|e| e.to_string()),
    })
}

/// POST /upload
///
/// Multipart fields: `file` (required), `activation_bytes` (optional)
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<Value>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut raw_key = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
                file = Some((name, data.to_vec()));
            }
            Some("activation_bytes") => {
                raw_key = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
            }
            _ => {}
        }
    }

    let (name, data) = file.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if !is_audible_file(Path::new(&name)) {
        return Err(ApiError::bad_request("Invalid file type. Only .aax and .aa files are allowed"));
    }
    let key = match raw_key.as_str() {
        "" => None,
        raw => Some(ActivationBytes::from_hex(raw)?),
    };

    info!(file = %name, bytes = data.len(), "conversion requested");
    let summary = state.pipeline.convert_upload(&name, &data, key.as_ref()).await?;

    Ok(Json(json!({
        "success": true,
        "message": "File converted successfully",
        "download_url": summary.download_url,
        "total_chunks": summary.total_chunks,
        "total_size_mb": summary.total_size_mb,
        "zip_name": summary.zip_name,
    })))
}

/// GET /download/:filename
pub async fn download(State(state): State<AppState>, UrlPath(filename): UrlPath<String>) -> ApiResult<Response> {
    let path = safe_child_path(&state.pipeline.settings().output_dir, &filename)
        .ok_or_else(|| ApiError::bad_request("Invalid file name"))?;

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };

    let content_type = if filename.to_ascii_lowercase().ends_with(".zip") {
        "application/zip"
    } else {
        "application/octet-stream"
    };
    let disposition = format!("attachment; filename=\"{}\"", filename);

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        data,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub method: Option<String>,
    pub locale: Option<String>,
    pub debug: Option<bool>,
    pub player_id: Option<String>,
    pub activation_bytes: Option<String>,
    /// Only Chrome/Chromium can be driven
    pub browser: Option<String>,
}

fn ensure_supported_browser(browser: Option<&str>) -> ApiResult<()> {
    match browser.map(|b| b.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("chrome") | Some("chromium") => Ok(()),
        Some(other) => Err(ApiError::bad_request(format!(
            "Unsupported browser '{}'. Only chrome is supported",
            other
        ))),
    }
}

/// POST /extract-activation-bytes
pub async fn extract_activation_bytes(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> ApiResult<Response> {
    let method: Method = request.method.as_deref().unwrap_or_default().parse()?;
    ensure_supported_browser(request.browser.as_deref())?;

    if method == Method::Manual {
        let raw = request.activation_bytes.as_deref().unwrap_or_default();
        ActivationBytes::from_hex(raw)?;
    }

    let locale = match request.locale.as_deref().filter(|l| !l.trim().is_empty()) {
        Some(code) => code.parse::<Locale>()?,
        None => state.config.locale()?,
    };

    let ctx = DiscoveryContext {
        credentials: Credentials::from_parts(request.email.as_deref(), request.password.as_deref()),
        locale,
        debug: request.debug.unwrap_or(state.config.debug_browser),
        player_id: request.player_id.filter(|p| !p.trim().is_empty()),
    };

    let discovery = (state.discovery)(request.activation_bytes);
    let report = discovery.run(&ctx, method).await;

    Ok(match &report.result {
        DiscoveryResult::Success { activation_bytes } => {
            success_body(activation_bytes, true, None, &report.attempts).into_response()
        }
        DiscoveryResult::Unverified { activation_bytes, reason } => {
            success_body(activation_bytes, false, Some(reason.as_str()), &report.attempts).into_response()
        }
        DiscoveryResult::Failure(failure) => {
            warn!(method = %method, "activation bytes extraction failed: {}", failure);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": failure.message,
                    "hint": failure.hint,
                    "suggestions": report.suggestions,
                    "attempts": report.attempts,
                })),
            )
                .into_response()
        }
    })
}

fn success_body(key: &ActivationBytes, verified: bool, reason: Option<&str>, attempts: &[AttemptRecord]) -> Json<Value> {
    let mut body = json!({
        "success": true,
        "activation_bytes": key,
        "verified": verified,
        "message": format!("Activation bytes extracted successfully: {}", key),
        "attempts": attempts,
    });
    if let Some(reason) = reason {
        body["warning"] = json!(reason);
    }
    Json(body)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeyRequest {
    pub activation_bytes: Option<String>,
}

impl KeyRequest {
    fn key(&self) -> ApiResult<ActivationBytes> {
        let raw = self
            .activation_bytes
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("activation_bytes required"))?;
        Ok(ActivationBytes::from_hex(raw)?)
    }
}

/// POST /test-activation-bytes
pub async fn test_activation_bytes(
    State(state): State<AppState>,
    Json(request): Json<KeyRequest>,
) -> ApiResult<Json<Value>> {
    let key = request.key()?;
    let outcome = state.validator.verify(&key).await;

    Ok(Json(json!({
        "success": outcome.is_verified(),
        "activation_bytes": key,
        "outcome": outcome.label(),
        "message": outcome.message(),
    })))
}

/// POST /save-activation-bytes
pub async fn save_activation_bytes(
    State(state): State<AppState>,
    Json(request): Json<KeyRequest>,
) -> ApiResult<Json<Value>> {
    let key = request.key()?;
    state.key_store.save(&key)?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Activation bytes saved: {}", key),
        "file": state.key_store.path().display().to_string(),
    })))
}

/// GET /load-activation-bytes
pub async fn load_activation_bytes(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let key = state.key_store.load()?;

    Ok(Json(json!({
        "success": true,
        "activation_bytes": key,
        "message": "Activation bytes loaded from file",
    })))
}
