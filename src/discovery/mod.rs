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


//! Activation bytes discovery
//!
//! Several independent strategies try to obtain the key, each returning a
//! [`DiscoveryResult`]. [`KeyDiscovery`] runs them in priority order:
//!
//! | Order | Method | Needs credentials |
//! |-------|--------|-------------------|
//! | 1 | `cli` - audible-cli `activation-bytes` | no |
//! | 2 | `auth` - Audible account API | yes |
//! | 3 | `browser` - Chrome login automation | yes |
//! | 4 | `file` - scan local files | no |
//! | 5 | `manual` - key typed by a human | no |
//!
//! The first result carrying a key wins and is persisted.

pub mod account_api;
pub mod browser;
pub mod cli_tool;
pub mod file_scan;
pub mod manual;
pub mod orchestrator;

use crate::api::auth::{Credentials, Locale};
use crate::crypto::activation::ActivationBytes;
use crate::error::{ConverterError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;

pub use account_api::{AccountApi, AccountApiStrategy, AccountSession, AudibleAccountApi};
pub use browser::{default_launcher, BrowserLauncher, BrowserSession, BrowserStrategy, BrowserTimings};
pub use cli_tool::CliToolStrategy;
pub use file_scan::FileScanStrategy;
pub use manual::{KeyPrompt, ManualStrategy, ProvidedKey, TerminalPrompt};
pub use orchestrator::KeyDiscovery;

/// Suggested next steps when nothing worked
pub const SUGGESTIONS: &[&str] = &[
    "Try providing your Audible email and password",
    "Use the browser method to find activation bytes manually",
    "Check if you have .aa files instead (no activation bytes needed)",
    "Use external tools like AAXtoMP3 or OpenAudible",
];

// ============================================================================
// RESULTS
// ============================================================================

/// Why a strategy came back empty-handed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Required tool or runtime is missing
    Unavailable,
    /// Login rejected or not set up
    Authentication,
    /// CAPTCHA or two-step verification stopped automation
    Challenge,
    Timeout,
    /// Ran fine, found nothing
    NoCandidate,
    /// A supplied key is not 8 hex characters
    InvalidFormat,
    /// Anything else
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl DiscoveryFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Map a crate error escaping a strategy onto a failure kind
    pub fn from_error(error: &ConverterError) -> Self {
        let kind = match error {
            ConverterError::ToolUnavailable { .. } => FailureKind::Unavailable,
            ConverterError::Timeout { .. } => FailureKind::Timeout,
            ConverterError::AuthenticationFailed(_) => FailureKind::Authentication,
            ConverterError::InvalidActivationBytes(_) => FailureKind::InvalidFormat,
            _ => FailureKind::Error,
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for DiscoveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({})", self.message, hint),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of one strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoveryResult {
    /// Key found and confirmed, or from a source trusted as authoritative
    Success { activation_bytes: ActivationBytes },
    /// Key found but not confirmed against a local file
    Unverified {
        activation_bytes: ActivationBytes,
        reason: String,
    },
    Failure(DiscoveryFailure),
}

impl DiscoveryResult {
    pub fn success(key: ActivationBytes) -> Self {
        Self::Success { activation_bytes: key }
    }

    pub fn unverified(key: ActivationBytes, reason: impl Into<String>) -> Self {
        Self::Unverified {
            activation_bytes: key,
            reason: reason.into(),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(DiscoveryFailure::new(kind, message))
    }

    /// The key, verified or not
    pub fn key(&self) -> Option<&ActivationBytes> {
        match self {
            Self::Success { activation_bytes } | Self::Unverified { activation_bytes, .. } => Some(activation_bytes),
            Self::Failure(_) => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_ref(&self) -> Option<&DiscoveryFailure> {
        match self {
            Self::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// One-line description for logs and attempt records
    pub fn describe(&self) -> String {
        match self {
            Self::Success { activation_bytes } => format!("found {}", activation_bytes),
            Self::Unverified { activation_bytes, reason } => {
                format!("found {} (unverified: {})", activation_bytes, reason)
            }
            Self::Failure(failure) => failure.to_string(),
        }
    }
}

// ============================================================================
// STRATEGY CONTRACT
// ============================================================================

/// Which strategy (or all of them) to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    Auto,
    Cli,
    Auth,
    #[serde(alias = "selenium")]
    Browser,
    File,
    Manual,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cli => "cli",
            Self::Auth => "auth",
            Self::Browser => "browser",
            Self::File => "file",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for Method {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "cli" => Ok(Self::Cli),
            "auth" => Ok(Self::Auth),
            "browser" | "selenium" => Ok(Self::Browser),
            "file" => Ok(Self::File),
            "manual" => Ok(Self::Manual),
            other => Err(ConverterError::InvalidInput(format!(
                "Unknown extraction method '{}'. Use auto, cli, auth, browser, file or manual.",
                other
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs shared by all strategies for one discovery run
#[derive(Debug, Clone, Default)]
pub struct DiscoveryContext {
    pub credentials: Option<Credentials>,
    pub locale: Locale,
    /// Visible browser with a human completing login
    pub debug: bool,
    /// Hex player id for the auth-token callback
    pub player_id: Option<String>,
}

impl DiscoveryContext {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }
}

/// One way of obtaining the activation bytes
///
/// Strategies keep no state between runs and know nothing of each other.
/// Returning `Err` is allowed; the orchestrator turns it into a failure.
#[async_trait]
pub trait KeyStrategy: Send + Sync {
    fn method(&self) -> Method;

    fn requires_credentials(&self) -> bool {
        false
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<DiscoveryResult>;
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Skipped,
    Succeeded,
    Unverified,
    Failed,
}

/// What happened to one strategy during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub method: Method,
    pub status: AttemptStatus,
    pub detail: String,
}

impl AttemptRecord {
    pub fn skipped(method: Method, detail: impl Into<String>) -> Self {
        Self {
            method,
            status: AttemptStatus::Skipped,
            detail: detail.into(),
        }
    }

    pub fn from_result(method: Method, result: &DiscoveryResult) -> Self {
        let status = match result {
            DiscoveryResult::Success { .. } => AttemptStatus::Succeeded,
            DiscoveryResult::Unverified { .. } => AttemptStatus::Unverified,
            DiscoveryResult::Failure(_) => AttemptStatus::Failed,
        };
        Self {
            method,
            status,
            detail: result.describe(),
        }
    }
}

/// Final result plus the trail that led to it
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub result: DiscoveryResult,
    pub attempts: Vec<AttemptRecord>,
    /// Only filled when no key was found
    pub suggestions: Vec<String>,
}

impl DiscoveryReport {
    pub fn key(&self) -> Option<&ActivationBytes> {
        self.result.key()
    }

    pub fn is_verified(&self) -> bool {
        self.result.is_verified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ActivationBytes {
        ActivationBytes::from_hex("1a2b3c4d").unwrap()
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("".parse::<Method>().unwrap(), Method::Auto);
        assert_eq!("Selenium".parse::<Method>().unwrap(), Method::Browser);
        assert_eq!("file".parse::<Method>().unwrap(), Method::File);
        assert!("magic".parse::<Method>().is_err());
        let m: Method = serde_json::from_str("\"selenium\"").unwrap();
        assert_eq!(m, Method::Browser);
    }

    #[test]
    fn test_no_candidate_distinct_from_unverified() {
        let none = DiscoveryResult::failure(FailureKind::NoCandidate, "nothing");
        let guess = DiscoveryResult::unverified(key(), "no .aax file to test with");
        assert!(none.key().is_none());
        assert_eq!(guess.key(), Some(&key()));
        assert!(!guess.is_verified());
        assert!(DiscoveryResult::success(key()).is_verified());
    }

    #[test]
    fn test_failure_from_error() {
        let f = DiscoveryFailure::from_error(&ConverterError::timeout("activation-bytes", 30));
        assert_eq!(f.kind, FailureKind::Timeout);
        let f = DiscoveryFailure::from_error(&ConverterError::tool_unavailable("audible", "not found"));
        assert_eq!(f.kind, FailureKind::Unavailable);
        let f = DiscoveryFailure::from_error(&ConverterError::InvalidState("x".into()));
        assert_eq!(f.kind, FailureKind::Error);
    }

    #[test]
    fn test_result_serialization() {
        let value = serde_json::to_value(DiscoveryResult::unverified(key(), "guess")).unwrap();
        assert_eq!(value["status"], "unverified");
        assert_eq!(value["activation_bytes"], "1A2B3C4D");

        let failure = DiscoveryFailure::new(FailureKind::Challenge, "CAPTCHA detected").with_hint("use debug mode");
        let value = serde_json::to_value(DiscoveryResult::Failure(failure)).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["kind"], "challenge");
        assert_eq!(value["hint"], "use debug mode");
    }

    #[test]
    fn test_attempt_record() {
        let record = AttemptRecord::from_result(Method::File, &DiscoveryResult::success(key()));
        assert_eq!(record.status, AttemptStatus::Succeeded);
        assert_eq!(record.detail, "found 1A2B3C4D");
    }
}
