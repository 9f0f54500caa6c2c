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


//! audible-cli strategy
//!
//! `audible activation-bytes` prints the key for the configured profile.
//! The tool owns its own authentication; a missing profile is reported as an
//! authentication failure with a pointer at `quickstart`.

use super::{DiscoveryContext, DiscoveryFailure, DiscoveryResult, FailureKind, KeyStrategy, Method};
use crate::audio::process::{run_with_timeout, stderr_text, stdout_text};
use crate::crypto::activation::first_token;
use crate::error::{ConverterError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const TOOL: &str = "audible-cli";

/// stderr fragments meaning "not logged in"
const AUTH_MARKERS: &[&str] = &["No such profile", "auth file"];

pub struct CliToolStrategy {
    command_line: Vec<String>,
    version_timeout: Duration,
    fetch_timeout: Duration,
}

impl Default for CliToolStrategy {
    fn default() -> Self {
        Self::new(Self::default_command())
    }
}

impl CliToolStrategy {
    /// `command_line` is the program followed by any fixed leading arguments
    pub fn new(command_line: Vec<String>) -> Self {
        Self {
            command_line,
            version_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Split a configured command such as `py -m audible_cli` on whitespace
    pub fn from_command_line(command_line: &str) -> Self {
        let parts: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            Self::default()
        } else {
            Self::new(parts)
        }
    }

    pub fn default_command() -> Vec<String> {
        if cfg!(windows) {
            vec!["py".into(), "-m".into(), "audible_cli".into()]
        } else {
            vec!["audible".into()]
        }
    }

    pub fn with_timeouts(mut self, version: Duration, fetch: Duration) -> Self {
        self.version_timeout = version;
        self.fetch_timeout = fetch;
        self
    }

    fn display_command(&self) -> String {
        self.command_line.join(" ")
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.command_line[0]);
        command.args(&self.command_line[1..]).arg(subcommand);
        command
    }

    fn unavailable(&self, detail: &str) -> DiscoveryResult {
        DiscoveryResult::Failure(
            DiscoveryFailure::new(FailureKind::Unavailable, format!("audible-cli not available: {}", detail))
                .with_hint("Install it with: pip install audible-cli"),
        )
    }
}

#[async_trait]
impl KeyStrategy for CliToolStrategy {
    fn method(&self) -> Method {
        Method::Cli
    }

    async fn discover(&self, _ctx: &DiscoveryContext) -> Result<DiscoveryResult> {
        if self.command_line.is_empty() {
            return Ok(self.unavailable("no command configured"));
        }

        let version = match run_with_timeout(
            self.command("--version"),
            TOOL,
            "audible-cli --version",
            self.version_timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(ConverterError::ToolUnavailable { message, .. }) => return Ok(self.unavailable(&message)),
            Err(e @ ConverterError::Timeout { .. }) => {
                return Ok(DiscoveryResult::Failure(DiscoveryFailure::from_error(&e)))
            }
            Err(e) => return Err(e),
        };
        if !version.status.success() {
            return Ok(self.unavailable(&format!("'{} --version' exited with {}", self.display_command(), version.status)));
        }
        debug!(version = %stdout_text(&version), "audible-cli found");

        info!("requesting activation bytes from audible-cli");
        let output = match run_with_timeout(
            self.command("activation-bytes"),
            TOOL,
            "audible-cli activation-bytes",
            self.fetch_timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(ConverterError::ToolUnavailable { message, .. }) => return Ok(self.unavailable(&message)),
            Err(e @ ConverterError::Timeout { .. }) => {
                return Ok(DiscoveryResult::Failure(DiscoveryFailure::from_error(&e)))
            }
            Err(e) => return Err(e),
        };

        if output.status.success() {
            let stdout = stdout_text(&output);
            return Ok(match first_token(&stdout) {
                Some(key) => DiscoveryResult::success(key),
                None => DiscoveryResult::failure(
                    FailureKind::NoCandidate,
                    format!("Command succeeded but no activation bytes found in output: {}", stdout),
                ),
            });
        }

        let stderr = stderr_text(&output);
        warn!(status = %output.status, "audible-cli activation-bytes failed");
        if AUTH_MARKERS.iter().any(|marker| stderr.contains(marker)) {
            return Ok(DiscoveryResult::Failure(
                DiscoveryFailure::new(FailureKind::Authentication, format!("audible-cli is not authenticated: {}", stderr))
                    .with_hint(format!("Run '{} quickstart' to set up authentication first", self.display_command())),
            ));
        }
        Ok(DiscoveryResult::failure(
            FailureKind::Error,
            format!("audible-cli failed: {}", stderr),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let strategy = CliToolStrategy::new(vec!["/nonexistent/audible".into()]);
        let result = strategy.discover(&DiscoveryContext::default()).await.unwrap();
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Unavailable);
        assert!(failure.hint.as_deref().unwrap().contains("pip install audible-cli"));
    }

    #[test]
    fn test_command_line_parsing() {
        let strategy = CliToolStrategy::from_command_line("py -m audible_cli");
        assert_eq!(strategy.display_command(), "py -m audible_cli");
        let strategy = CliToolStrategy::from_command_line("   ");
        assert_eq!(strategy.command_line, CliToolStrategy::default_command());
    }

    #[cfg(unix)]
    mod fake_tool {
        use super::*;
        use crate::crypto::activation::ActivationBytes;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, body: &str) -> CliToolStrategy {
            let path = dir.join("audible");
            std::fs::write(&path, format!("#!/bin/sh\nif [ \"$1\" = '--version' ]; then echo 'audible-cli 0.3.1'; exit 0; fi\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            CliToolStrategy::new(vec![path.to_string_lossy().into_owned()])
        }

        #[tokio::test]
        async fn test_key_from_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = script(dir.path(), "echo 'Activation bytes: 1a2b3c4d'");
            let result = strategy.discover(&DiscoveryContext::default()).await.unwrap();
            assert_eq!(result, DiscoveryResult::success(ActivationBytes::from_hex("1A2B3C4D").unwrap()));
        }

        #[tokio::test]
        async fn test_no_key_in_output() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = script(dir.path(), "echo 'nothing to see'");
            let result = strategy.discover(&DiscoveryContext::default()).await.unwrap();
            assert_eq!(result.failure_ref().unwrap().kind, FailureKind::NoCandidate);
        }

        #[tokio::test]
        async fn test_missing_profile_is_authentication() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = script(dir.path(), "echo 'Error: No such profile: audible' >&2; exit 1");
            let result = strategy.discover(&DiscoveryContext::default()).await.unwrap();
            let failure = result.failure_ref().unwrap();
            assert_eq!(failure.kind, FailureKind::Authentication);
            assert!(failure.hint.as_deref().unwrap().contains("quickstart"));
        }

        #[tokio::test]
        async fn test_other_failure_passes_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = script(dir.path(), "echo 'network unreachable' >&2; exit 2");
            let result = strategy.discover(&DiscoveryContext::default()).await.unwrap();
            let failure = result.failure_ref().unwrap();
            assert_eq!(failure.kind, FailureKind::Error);
            assert!(failure.message.contains("network unreachable"));
        }

        #[tokio::test]
        async fn test_hanging_tool_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = script(dir.path(), "sleep 5")
                .with_timeouts(Duration::from_secs(2), Duration::from_millis(200));
            let result = strategy.discover(&DiscoveryContext::default()).await.unwrap();
            assert_eq!(result.failure_ref().unwrap().kind, FailureKind::Timeout);
        }
    }
}
