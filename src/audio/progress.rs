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


//! Conversion progress reporting
//!
//! A job moves through [`ConversionStage`]s in order. Splitting reports once
//! per finished chunk. Callers that care (the CLI prints a line per event)
//! pass a [`ProgressCallback`]; the HTTP front-end doesn't.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a conversion job currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStage {
    /// Job accepted, nothing run yet
    Pending,
    /// Full-length transcode to the intermediate MP3
    Transcoding,
    /// Cutting the intermediate into chunks
    Splitting,
    /// Writing the ZIP archive
    Archiving,
    Completed,
    Failed,
}

/// Snapshot handed to progress callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionProgress {
    /// Sanitized name of the file being converted
    pub file_name: String,

    pub stage: ConversionStage,

    /// Chunks written so far
    pub chunks_done: usize,

    /// Chunks planned, 0 until splitting starts
    pub chunks_total: usize,

    /// Wall time since the job started
    pub elapsed: Duration,

    /// Error message if the job failed
    pub error_message: Option<String>,
}

impl ConversionProgress {
    /// Progress as a fraction of planned chunks (0.0 - 1.0)
    pub fn as_fraction(&self) -> f64 {
        match self.stage {
            ConversionStage::Completed => 1.0,
            _ if self.chunks_total == 0 => 0.0,
            _ => self.chunks_done as f64 / self.chunks_total as f64,
        }
    }
}

/// Progress callback
///
/// Uses Arc instead of Box so settings holding one stay `Clone`.
pub type ProgressCallback = Arc<dyn Fn(ConversionProgress) + Send + Sync>;

/// Tracks one job and fires the callback on every change
pub struct ProgressTracker {
    file_name: String,
    stage: ConversionStage,
    chunks_done: usize,
    chunks_total: usize,
    started: Instant,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(file_name: impl Into<String>, callback: Option<ProgressCallback>) -> Self {
        Self {
            file_name: file_name.into(),
            stage: ConversionStage::Pending,
            chunks_done: 0,
            chunks_total: 0,
            started: Instant::now(),
            callback,
        }
    }

    pub fn stage(&self) -> ConversionStage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: ConversionStage) {
        self.stage = stage;
        self.emit(None);
    }

    /// Enter the splitting stage with `total` planned chunks
    pub fn start_splitting(&mut self, total: usize) {
        self.chunks_total = total;
        self.chunks_done = 0;
        self.set_stage(ConversionStage::Splitting);
    }

    pub fn chunk_done(&mut self) {
        self.chunks_done += 1;
        self.emit(None);
    }

    pub fn fail(&mut self, error: &str) {
        self.stage = ConversionStage::Failed;
        self.emit(Some(error.to_string()));
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ConversionProgress {
        ConversionProgress {
            file_name: self.file_name.clone(),
            stage: self.stage,
            chunks_done: self.chunks_done,
            chunks_total: self.chunks_total,
            elapsed: self.started.elapsed(),
            error_message: None,
        }
    }

    fn emit(&self, error_message: Option<String>) {
        if let Some(callback) = &self.callback {
            let mut progress = self.snapshot();
            progress.error_message = error_message;
            callback(progress);
        }
    }
}
