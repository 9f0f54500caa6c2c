// audible-converter - AAX conversion and activation bytes discovery
// Copyright (C) 2025 audible-converter contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Crate-wide error type
//!
//! Every fallible operation in the crate returns [`Result`]. The HTTP layer
//! maps these variants onto status codes (see `server::error`), the discovery
//! strategies map them onto [`crate::discovery::FailureKind`].

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConverterError>;

#[derive(Debug, Error)]
pub enum ConverterError {
    /// Candidate key is not exactly 8 hexadecimal characters
    #[error("Invalid activation bytes format: {0}. Must be 8 hexadecimal characters.")]
    InvalidActivationBytes(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External binary missing or not runnable
    #[error("{tool} is not available: {message}")]
    ToolUnavailable { tool: String, message: String },

    /// External binary ran and exited non-zero
    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },

    /// External operation exceeded its time budget
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Transcoding or chunking failed; the message is user-facing
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// Remote login rejected or challenged
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Remote API returned an unexpected status
    #[error("API request failed ({status}): {message}")]
    ApiRequestFailed { status: u16, message: String },

    /// Remote API returned something we could not parse
    #[error("Invalid API response: {message}")]
    InvalidApiResponse {
        message: String,
        response_body: Option<String>,
    },

    /// Browser automation runtime error
    #[error("Browser automation error: {0}")]
    Browser(String),

    /// Persisted key file exists but holds garbage
    #[error("Invalid activation bytes in file {path:?}: {content:?}")]
    CorruptKeyFile { path: PathBuf, content: String },

    /// No persisted key file yet
    #[error("No saved activation bytes found at {0:?}")]
    KeyNotSaved(PathBuf),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ConverterError {
    pub fn tool_unavailable(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn tool_failed(tool: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            stderr: stderr.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// True for errors that mean "the collaborator is not installed"
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ToolUnavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Turn a failed ffmpeg run into a `ConversionFailed` with a hint when the
    /// diagnostics are recognisable; other errors pass through
    pub fn into_conversion_error(self) -> Self {
        match self {
            Self::ToolFailed { tool, stderr } => match Self::transcoder_hint(&stderr) {
                Some(hint) => Self::ConversionFailed(hint.to_string()),
                None => Self::ConversionFailed(format!("{} error: {}", tool, stderr.trim())),
            },
            other => other,
        }
    }

    /// Classify transcoder diagnostics into a user-facing hint
    ///
    /// ffmpeg reports a wrong key with a message mentioning the activation
    /// bytes, and a damaged or mislabelled upload with "Invalid data found
    /// when processing input".
    pub fn transcoder_hint(stderr: &str) -> Option<&'static str> {
        let lower = stderr.to_lowercase();
        if lower.contains("activation") {
            Some("The activation bytes appear to be wrong for this file. Extract or enter the correct activation bytes and try again.")
        } else if lower.contains("invalid data") {
            Some("The file could not be decoded. It may be corrupted, incomplete, or not an Audible file.")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcoder_hint_activation() {
        let hint = ConverterError::transcoder_hint("[mov] Activation bytes mismatch (checksum)");
        assert!(hint.unwrap().contains("activation bytes"));
    }

    #[test]
    fn test_transcoder_hint_invalid_data() {
        let hint = ConverterError::transcoder_hint("book.aax: Invalid data found when processing input");
        assert!(hint.unwrap().contains("corrupted"));
    }

    #[test]
    fn test_into_conversion_error() {
        let err = ConverterError::tool_failed("ffmpeg", "Invalid data found when processing input\n");
        match err.into_conversion_error() {
            ConverterError::ConversionFailed(msg) => assert!(msg.contains("corrupted")),
            other => panic!("unexpected {other:?}"),
        }

        let err = ConverterError::tool_failed("ffmpeg", "Unknown encoder 'libmp3lame'\n");
        assert_eq!(
            err.into_conversion_error().to_string(),
            "Conversion failed: ffmpeg error: Unknown encoder 'libmp3lame'"
        );

        assert!(ConverterError::timeout("conversion", 900).into_conversion_error().is_timeout());
    }

    #[test]
    fn test_transcoder_hint_none() {
        assert!(ConverterError::transcoder_hint("Conversion failed!").is_none());
    }

    #[test]
    fn test_error_display() {
        let err = ConverterError::timeout("ffprobe probe", 30);
        assert_eq!(err.to_string(), "ffprobe probe timed out after 30s");
        assert!(err.is_timeout());

        let err = ConverterError::tool_unavailable("audible-cli", "not found");
        assert!(err.is_unavailable());
    }
}
