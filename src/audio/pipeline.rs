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


//! Upload to archive conversion
//!
//! # Flow
//! 1. Sanitize the name and copy the upload into a fresh job directory
//! 2. Transcode to one intermediate MP3 (key only for `.aax`)
//! 3. Plan size-bounded segments and cut them out of the intermediate
//! 4. Zip the chunks into the output directory
//!
//! Everything but the archive lives in a [`tempfile::TempDir`] under the
//! upload directory, so a failed job leaves nothing behind.

use super::chunker::plan_segments;
use super::progress::{ConversionStage, ProgressCallback, ProgressTracker};
use super::transcoder::Transcoder;
use crate::crypto::aax::{is_aax_file, is_audible_file};
use crate::crypto::activation::ActivationBytes;
use crate::error::{ConverterError, Result};
use crate::file::{create_zip_archive, secure_filename, PathBuilder};
use crate::storage::KeyStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Tunables for one pipeline
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_chunk_mb: f64,
    pub min_chunk_secs: f64,
    pub bitrate: String,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            max_chunk_mb: 24.0,
            min_chunk_secs: 60.0,
            bitrate: "128k".to_string(),
        }
    }
}

/// Result of a finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub zip_name: String,
    pub download_url: String,
    pub total_chunks: usize,
    /// Sum of chunk sizes, rounded to 2 decimals
    pub total_size_mb: f64,
}

pub struct ConversionPipeline {
    transcoder: Transcoder,
    settings: ConversionSettings,
    key_store: Option<KeyStore>,
    progress: Option<ProgressCallback>,
}

impl ConversionPipeline {
    pub fn new(transcoder: Transcoder, settings: ConversionSettings) -> Self {
        Self {
            transcoder,
            settings,
            key_store: None,
            progress: None,
        }
    }

    /// Fall back to the key persisted in `store` for `.aax` jobs without one
    pub fn with_key_store(mut self, store: KeyStore) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Convert uploaded bytes
    ///
    /// # Arguments
    /// * `original_name` - client-supplied file name, sanitized here
    /// * `data` - file content
    /// * `key` - activation bytes supplied with the upload, if any
    ///
    /// # Errors
    /// - `InvalidInput` - unusable name or not an `.aax`/`.aa` file
    /// - `ConversionFailed` - ffmpeg rejected the input
    pub async fn convert_upload(
        &self,
        original_name: &str,
        data: &[u8],
        key: Option<&ActivationBytes>,
    ) -> Result<ConversionSummary> {
        let file_name = secure_filename(original_name)
            .ok_or_else(|| ConverterError::InvalidInput("No file selected".to_string()))?;
        ensure_audible(&file_name)?;

        let job = self.job_dir().await?;
        let upload_path = job.path().join(PathBuilder::timestamped(&file_name));
        tokio::fs::write(&upload_path, data).await?;
        info!(file = %file_name, bytes = data.len(), "upload stored");

        self.run(&upload_path, &file_name, job.path(), key).await
    }

    /// Convert a file already on disk, leaving it in place
    pub async fn convert_file(&self, input: &Path, key: Option<&ActivationBytes>) -> Result<ConversionSummary> {
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ConverterError::InvalidInput(format!("{} is not a file", input.display())))?;
        ensure_audible(&file_name)?;
        if !input.is_file() {
            return Err(ConverterError::NotFound(input.display().to_string()));
        }

        let job = self.job_dir().await?;
        self.run(input, &file_name, job.path(), key).await
    }

    async fn job_dir(&self) -> Result<TempDir> {
        tokio::fs::create_dir_all(&self.settings.upload_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix("conversion_")
            .tempdir_in(&self.settings.upload_dir)?;
        Ok(dir)
    }

    fn resolve_key(&self, input: &Path, key: Option<&ActivationBytes>) -> Option<ActivationBytes> {
        if !is_aax_file(input) {
            return None;
        }
        if let Some(key) = key {
            return Some(*key);
        }
        let saved = self.key_store.as_ref().and_then(KeyStore::load_optional);
        match saved {
            Some(_) => info!("using saved activation bytes"),
            None => warn!("no activation bytes supplied or saved; decoding will likely fail"),
        }
        saved
    }

    async fn run(
        &self,
        input: &Path,
        file_name: &str,
        work_dir: &Path,
        key: Option<&ActivationBytes>,
    ) -> Result<ConversionSummary> {
        let mut tracker = ProgressTracker::new(file_name, self.progress.clone());
        match self.run_tracked(input, file_name, work_dir, key, &mut tracker).await {
            Ok(summary) => {
                tracker.set_stage(ConversionStage::Completed);
                Ok(summary)
            }
            Err(e) => {
                tracker.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run_tracked(
        &self,
        input: &Path,
        file_name: &str,
        work_dir: &Path,
        key: Option<&ActivationBytes>,
        tracker: &mut ProgressTracker,
    ) -> Result<ConversionSummary> {
        let paths = PathBuilder::new(file_name);
        let key = self.resolve_key(input, key);
        let bitrate = self.settings.bitrate.as_str();

        tracker.set_stage(ConversionStage::Transcoding);
        let intermediate = paths.intermediate_mp3(work_dir);
        info!(file = %file_name, "converting to MP3");
        self.transcoder
            .convert_to_mp3(input, &intermediate, key.as_ref(), bitrate)
            .await
            .map_err(ConverterError::into_conversion_error)?;

        let duration = self
            .transcoder
            .duration(&intermediate)
            .await
            .map_err(ConverterError::into_conversion_error)?;
        let size_mb = tokio::fs::metadata(&intermediate).await?.len() as f64 / BYTES_PER_MB;
        let segments = plan_segments(duration, size_mb, self.settings.max_chunk_mb, self.settings.min_chunk_secs);
        info!(
            duration_secs = duration,
            size_mb = size_mb,
            chunks = segments.len(),
            "splitting audio into {}MB chunks",
            self.settings.max_chunk_mb
        );

        tracker.start_splitting(segments.len());
        let mut chunks = Vec::with_capacity(segments.len());
        let mut total_bytes = 0u64;
        for segment in &segments {
            let chunk = work_dir.join(paths.chunk_file_name(segment.index));
            self.transcoder
                .extract_segment(&intermediate, segment.start, segment.duration, &chunk, bitrate)
                .await
                .map_err(ConverterError::into_conversion_error)?;
            total_bytes += tokio::fs::metadata(&chunk).await.map(|m| m.len()).unwrap_or(0);
            chunks.push(chunk);
            tracker.chunk_done();
        }

        tracker.set_stage(ConversionStage::Archiving);
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        let zip_name = paths.zip_name();
        let zip_path = self.settings.output_dir.join(&zip_name);
        tokio::task::spawn_blocking(move || create_zip_archive(&chunks, &zip_path))
            .await
            .map_err(|e| ConverterError::InvalidState(format!("archive task failed: {}", e)))??;

        let summary = ConversionSummary {
            download_url: format!("/download/{}", zip_name),
            zip_name,
            total_chunks: segments.len(),
            total_size_mb: round2(total_bytes as f64 / BYTES_PER_MB),
        };
        info!(zip = %summary.zip_name, chunks = summary.total_chunks, "conversion finished");
        Ok(summary)
    }
}

fn ensure_audible(file_name: &str) -> Result<()> {
    if is_audible_file(Path::new(file_name)) {
        Ok(())
    } else {
        Err(ConverterError::InvalidInput(
            "Invalid file type. Only .aax and .aa files are allowed".to_string(),
        ))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(0.005), 0.01);
        assert_eq!(round2(0.0), 0.0);
    }

    #[tokio::test]
    async fn test_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ConversionSettings {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("output"),
            ..Default::default()
        };
        let pipeline = ConversionPipeline::new(Transcoder::default(), settings);

        let err = pipeline.convert_upload("book.mp3", b"data", None).await.unwrap_err();
        assert!(matches!(err, ConverterError::InvalidInput(_)));
        let err = pipeline.convert_upload("", b"data", None).await.unwrap_err();
        assert!(matches!(err, ConverterError::InvalidInput(_)));
    }

    #[cfg(unix)]
    mod fake_tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        // ffmpeg stand-in: writes 1 MB to the output (the argument before -y)
        // and records its arguments. ffprobe stand-in prints a fixed duration.
        fn install(dir: &Path, ffmpeg_exit: i32) -> Transcoder {
            let log = dir.join("ffmpeg_args.log");
            let ffmpeg = dir.join("ffmpeg");
            std::fs::write(
                &ffmpeg,
                format!(
                    "#!/bin/sh\necho \"$@\" >> '{log}'\nout=''\nprev=''\nfor a in \"$@\"; do\n  if [ \"$a\" = '-y' ]; then out=\"$prev\"; fi\n  prev=\"$a\"\ndone\nif [ {code} -ne 0 ]; then echo 'Invalid data found when processing input' >&2; exit {code}; fi\nhead -c 1048576 /dev/zero > \"$out\"\n",
                    log = log.display(),
                    code = ffmpeg_exit
                ),
            )
            .unwrap();
            let ffprobe = dir.join("ffprobe");
            std::fs::write(&ffprobe, "#!/bin/sh\necho 150.0\n").unwrap();
            for path in [&ffmpeg, &ffprobe] {
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
            Transcoder::new(ffmpeg, ffprobe)
        }

        fn settings(dir: &Path) -> ConversionSettings {
            ConversionSettings {
                upload_dir: dir.join("uploads"),
                output_dir: dir.join("output"),
                // 1 MB intermediate over 150 s with 0.4 MB chunks -> 60 s steps
                max_chunk_mb: 0.4,
                min_chunk_secs: 60.0,
                bitrate: "128k".to_string(),
            }
        }

        #[tokio::test]
        async fn test_upload_produces_archive() {
            let dir = tempfile::tempdir().unwrap();
            let pipeline = ConversionPipeline::new(install(dir.path(), 0), settings(dir.path()));
            let key = ActivationBytes::from_hex("deadbeef").unwrap();

            let summary = pipeline
                .convert_upload("My Book.aax", b"not really aax", Some(&key))
                .await
                .unwrap();

            assert_eq!(summary.zip_name, "My_Book_converted.zip");
            assert_eq!(summary.download_url, "/download/My_Book_converted.zip");
            assert_eq!(summary.total_chunks, 3);
            assert_eq!(summary.total_size_mb, 3.0);
            assert!(dir.path().join("output/My_Book_converted.zip").is_file());

            // Job directory is gone
            let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("uploads")).unwrap().collect();
            assert!(leftovers.is_empty());

            let args = std::fs::read_to_string(dir.path().join("ffmpeg_args.log")).unwrap();
            let first = args.lines().next().unwrap();
            assert!(first.starts_with("-activation_bytes DEADBEEF -i "));
            assert!(args.contains("My_Book_chunk_003.mp3"));
        }

        #[tokio::test]
        async fn test_progress_callback_follows_job() {
            let dir = tempfile::tempdir().unwrap();
            let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
            let sink = seen.clone();
            let pipeline = ConversionPipeline::new(install(dir.path(), 0), settings(dir.path())).with_progress(
                std::sync::Arc::new(move |p: crate::audio::ConversionProgress| {
                    sink.lock().unwrap().push((p.stage, p.chunks_done, p.chunks_total));
                }),
            );
            let key = ActivationBytes::from_hex("deadbeef").unwrap();

            pipeline.convert_upload("book.aax", b"x", Some(&key)).await.unwrap();

            let seen = seen.lock().unwrap();
            let mut stages: Vec<ConversionStage> = seen.iter().map(|(stage, _, _)| *stage).collect();
            stages.dedup();
            assert_eq!(
                stages,
                vec![
                    ConversionStage::Transcoding,
                    ConversionStage::Splitting,
                    ConversionStage::Archiving,
                    ConversionStage::Completed,
                ]
            );
            assert!(seen.contains(&(ConversionStage::Splitting, 3, 3)));
            assert_eq!(seen.last(), Some(&(ConversionStage::Completed, 3, 3)));
        }

        #[tokio::test]
        async fn test_aa_upload_gets_no_key() {
            let dir = tempfile::tempdir().unwrap();
            let pipeline = ConversionPipeline::new(install(dir.path(), 0), settings(dir.path()));
            let key = ActivationBytes::from_hex("deadbeef").unwrap();

            pipeline.convert_upload("old.aa", b"legacy", Some(&key)).await.unwrap();

            let args = std::fs::read_to_string(dir.path().join("ffmpeg_args.log")).unwrap();
            assert!(!args.contains("-activation_bytes"));
        }

        #[tokio::test]
        async fn test_saved_key_fallback() {
            let dir = tempfile::tempdir().unwrap();
            let store = KeyStore::new(dir.path().join("activation_bytes.txt"));
            store.save_str("cafebabe").unwrap();
            let pipeline = ConversionPipeline::new(install(dir.path(), 0), settings(dir.path())).with_key_store(store);

            pipeline.convert_upload("book.aax", b"x", None).await.unwrap();

            let args = std::fs::read_to_string(dir.path().join("ffmpeg_args.log")).unwrap();
            assert!(args.lines().next().unwrap().starts_with("-activation_bytes CAFEBABE"));
        }

        #[tokio::test]
        async fn test_failure_is_classified_and_cleaned_up() {
            let dir = tempfile::tempdir().unwrap();
            let pipeline = ConversionPipeline::new(install(dir.path(), 1), settings(dir.path()));

            let err = pipeline.convert_upload("book.aax", b"x", None).await.unwrap_err();
            match err {
                ConverterError::ConversionFailed(msg) => assert!(msg.contains("corrupted")),
                other => panic!("unexpected {other:?}"),
            }
            let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("uploads")).unwrap().collect();
            assert!(leftovers.is_empty());
            assert!(!dir.path().join("output/book_converted.zip").exists());
        }
    }
}
