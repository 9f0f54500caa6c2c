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


//! ffmpeg / ffprobe wrapper
//!
//! All audio work is done by the external binaries. This module only builds
//! their command lines and interprets exit status and stderr.
//!
//! # Commands
//! ```text
//! ffmpeg  -version
//! ffprobe -activation_bytes KEY -v quiet -print_format json -show_format IN
//! ffprobe -v quiet -show_entries format=duration -of csv=p=0 IN
//! ffmpeg  [-activation_bytes KEY] -i IN -acodec libmp3lame -ab 128k OUT.mp3 -y
//! ffmpeg  -i IN -ss START -t DUR -acodec libmp3lame -ab 128k CHUNK.mp3 -y
//! ```

use crate::audio::process::{run_with_timeout, stderr_text, stdout_text};
use crate::crypto::activation::ActivationBytes;
use crate::crypto::aax::is_aax_file;
use crate::error::{ConverterError, Result};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// Time budgets for the different kinds of invocation
#[derive(Debug, Clone, Copy)]
pub struct TranscoderTimeouts {
    /// `-version` checks
    pub availability: Duration,
    /// Probe and duration queries
    pub probe: Duration,
    /// Full conversion or chunk extraction
    pub conversion: Duration,
}

impl Default for TranscoderTimeouts {
    fn default() -> Self {
        Self {
            availability: Duration::from_secs(3),
            probe: Duration::from_secs(30),
            conversion: Duration::from_secs(15 * 60),
        }
    }
}

/// Handle on the ffmpeg/ffprobe pair
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeouts: TranscoderTimeouts,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(FFMPEG, FFPROBE)
    }
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeouts: TranscoderTimeouts::default(),
        }
    }

    /// Prefer binaries bundled in `local_dir`, fall back to `PATH`
    ///
    /// The local directory is only used when both executables exist there.
    pub fn resolve(local_dir: Option<&Path>) -> Self {
        if let Some(dir) = local_dir {
            let ffmpeg = dir.join(format!("{}{}", FFMPEG, std::env::consts::EXE_SUFFIX));
            let ffprobe = dir.join(format!("{}{}", FFPROBE, std::env::consts::EXE_SUFFIX));
            if ffmpeg.is_file() && ffprobe.is_file() {
                debug!(dir = %dir.display(), "using bundled ffmpeg");
                return Self::new(ffmpeg, ffprobe);
            }
        }
        Self::default()
    }

    pub fn with_timeouts(mut self, timeouts: TranscoderTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> &Path {
        &self.ffprobe
    }

    pub fn timeouts(&self) -> TranscoderTimeouts {
        self.timeouts
    }

    /// Check both binaries answer `-version`
    ///
    /// # Errors
    /// `ToolUnavailable` with install guidance, or `Timeout`
    pub async fn check_availability(&self) -> Result<()> {
        for (name, path) in [(FFMPEG, &self.ffmpeg), (FFPROBE, &self.ffprobe)] {
            let mut command = Command::new(path);
            command.arg("-version");
            let output = run_with_timeout(command, name, "version check", self.timeouts.availability)
                .await
                .map_err(|e| match e {
                    ConverterError::ToolUnavailable { tool, message } => ConverterError::ToolUnavailable {
                        tool,
                        message: format!(
                            "{}. Please install FFmpeg from https://ffmpeg.org/download.html and add it to your system PATH.",
                            message
                        ),
                    },
                    other => other,
                })?;

            if !output.status.success() {
                return Err(ConverterError::tool_unavailable(
                    name,
                    format!("'{} -version' exited with {}", path.display(), output.status),
                ));
            }
        }
        Ok(())
    }

    /// Probe `file` with `key`, returning the raw process output
    ///
    /// The caller decides what the exit status means; this only fails when
    /// the probe could not run at all.
    pub async fn probe(&self, file: &Path, key: &ActivationBytes) -> Result<Output> {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-activation_bytes")
            .arg(key.to_hex())
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(file);
        run_with_timeout(command, FFPROBE, "activation bytes probe", self.timeouts.probe).await
    }

    /// Duration of `file` in seconds
    pub async fn duration(&self, file: &Path) -> Result<f64> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(file);
        let output = run_with_timeout(command, FFPROBE, "duration query", self.timeouts.probe).await?;

        if !output.status.success() {
            return Err(ConverterError::tool_failed(FFPROBE, stderr_text(&output)));
        }

        let text = stdout_text(&output);
        text.parse::<f64>().map_err(|e| {
            ConverterError::InvalidInput(format!(
                "Failed to get audio duration from {:?}: {}",
                text, e
            ))
        })
    }

    /// Convert `input` to MP3 at `output`
    ///
    /// `key` is only passed for `.aax` inputs; `.aa` files decode without one.
    ///
    /// # Errors
    /// `ToolFailed` carrying ffmpeg's stderr on a non-zero exit
    pub async fn convert_to_mp3(
        &self,
        input: &Path,
        output: &Path,
        key: Option<&ActivationBytes>,
        bitrate: &str,
    ) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg);
        if let Some(key) = key.filter(|_| is_aax_file(input)) {
            command.arg("-activation_bytes").arg(key.to_hex());
        }
        command
            .arg("-i")
            .arg(input)
            .args(["-acodec", "libmp3lame", "-ab", bitrate])
            .arg(output)
            .arg("-y");

        info!(input = %input.display(), output = %output.display(), "converting to mp3");
        let result = run_with_timeout(command, FFMPEG, "conversion", self.timeouts.conversion).await?;
        if !result.status.success() {
            return Err(ConverterError::tool_failed(FFMPEG, stderr_text(&result)));
        }
        Ok(())
    }

    /// Re-encode `[start, start + duration)` of `input` into `output`
    pub async fn extract_segment(
        &self,
        input: &Path,
        start: f64,
        duration: f64,
        output: &Path,
        bitrate: &str,
    ) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-i")
            .arg(input)
            .arg("-ss")
            .arg(format!("{:.3}", start))
            .arg("-t")
            .arg(format!("{:.3}", duration))
            .args(["-acodec", "libmp3lame", "-ab", bitrate])
            .arg(output)
            .arg("-y");

        let result = run_with_timeout(command, FFMPEG, "chunk extraction", self.timeouts.conversion).await?;
        if !result.status.success() {
            return Err(ConverterError::tool_failed(FFMPEG, stderr_text(&result)));
        }
        Ok(())
    }
}
