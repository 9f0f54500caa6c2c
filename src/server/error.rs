//! HTTP error mapping
//!
//! Every handler error leaves as `{"success": false, "error": "..."}` with
//! the status chosen here.

use crate::error::ConverterError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ConverterError> for ApiError {
    fn from(err: ConverterError) -> Self {
        match err {
            ConverterError::InvalidActivationBytes(_)
            | ConverterError::InvalidInput(_)
            | ConverterError::CorruptKeyFile { .. } => Self::BadRequest(err.to_string()),
            ConverterError::KeyNotSaved(_) => Self::NotFound("No saved activation bytes found".to_string()),
            ConverterError::NotFound(_) => Self::NotFound(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(message) = &self {
            error!("request failed: {}", message);
        }
        let message = self.to_string();

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_mapping() {
        let bad: ApiError = ConverterError::InvalidActivationBytes("DEADBEE".into()).into();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let missing: ApiError = ConverterError::KeyNotSaved(PathBuf::from("activation_bytes.txt")).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let failed: ApiError = ConverterError::ConversionFailed("Invalid activation bytes".into()).into();
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display_is_client_message() {
        let missing: ApiError = ConverterError::KeyNotSaved(PathBuf::from("activation_bytes.txt")).into();
        assert_eq!(missing.to_string(), "No saved activation bytes found");
        assert_eq!(ApiError::bad_request("No file provided").to_string(), "No file provided");

        let err: &dyn std::error::Error = &missing;
        assert!(err.source().is_none());
    }
}
