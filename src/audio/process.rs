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


//! Child process execution with a hard time limit

use crate::error::{ConverterError, Result};
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Run `command` to completion, capturing stdout/stderr
///
/// The child is killed when `limit` elapses (the future owning it is dropped
/// and `kill_on_drop` reaps it).
///
/// # Errors
/// - `ToolUnavailable` - binary missing or not executable
/// - `Timeout` - `limit` elapsed
/// - `Io` - waiting on the child failed
pub async fn run_with_timeout(
    mut command: Command,
    tool: &str,
    operation: &str,
    limit: Duration,
) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(tool, operation, timeout_secs = limit.as_secs(), "spawning child process");

    let child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConverterError::tool_unavailable(
            tool,
            format!("'{}' was not found on this system", tool),
        ),
        ErrorKind::PermissionDenied => ConverterError::tool_unavailable(
            tool,
            format!("'{}' is not executable", tool),
        ),
        _ => ConverterError::tool_unavailable(tool, e.to_string()),
    })?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => {
            warn!(tool, operation, "child process timed out after {}s, killed", limit.as_secs());
            Err(ConverterError::timeout(operation, limit.as_secs()))
        }
    }
}

/// Lossy UTF-8 view of captured stderr, trimmed
pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Lossy UTF-8 view of captured stdout, trimmed
pub fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
