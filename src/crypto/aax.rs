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


//! AAX container helpers and activation bytes verification
//!
//! # Verification
//! A candidate key is checked by probing any locally available `.aax` file
//! with `ffprobe -activation_bytes KEY`. ffprobe exits zero only when the
//! key decrypts the header, so the exit status is the whole signal.
//!
//! Verification has four outcomes, see [`VerifyOutcome`]. "No `.aax` file to
//! test with" is not a verdict on the key and is reported separately.

use crate::audio::process::stderr_text;
use crate::audio::transcoder::Transcoder;
use crate::crypto::activation::ActivationBytes;
use crate::error::ConverterError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Protected container extension
pub const AAX_EXTENSION: &str = "aax";

/// Legacy container, decodes without a key
pub const AA_EXTENSION: &str = "aa";

/// True if `path` has an `.aax` extension (case-insensitive)
pub fn is_aax_file(path: &Path) -> bool {
    has_extension(path, AAX_EXTENSION)
}

/// True if `path` is an Audible container this service accepts (`.aax` or `.aa`)
pub fn is_audible_file(path: &Path) -> bool {
    is_aax_file(path) || has_extension(path, AA_EXTENSION)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// First `.aax` file found under any of `roots`
///
/// Missing roots and unreadable directories are skipped.
pub fn find_protected_file(roots: &[PathBuf]) -> Option<PathBuf> {
    roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
        })
        .find(|entry| entry.file_type().is_file() && is_aax_file(entry.path()))
        .map(|entry| entry.into_path())
}

/// Result of probing a key against a local `.aax` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// ffprobe decoded the file with this key
    Verified { file: PathBuf },
    /// ffprobe rejected the key (non-zero exit)
    Rejected { file: PathBuf, diagnostic: String },
    /// Probe ran out of time
    TimedOut { file: PathBuf },
    /// Nothing to test against, or no ffprobe
    CannotVerify { reason: String },
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    /// Short machine-readable label used in API responses
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verified { .. } => "verified",
            Self::Rejected { .. } => "rejected",
            Self::TimedOut { .. } => "timed_out",
            Self::CannotVerify { .. } => "cannot_verify",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Verified { file } => format!("Activation bytes work with {}", display_name(file)),
            Self::Rejected { file, diagnostic } if diagnostic.is_empty() => {
                format!("Activation bytes failed to decode {}", display_name(file))
            }
            Self::Rejected { file, diagnostic } => format!(
                "Activation bytes failed to decode {}: {}",
                display_name(file),
                diagnostic
            ),
            Self::TimedOut { file } => format!("Timed out while testing with {}", display_name(file)),
            Self::CannotVerify { reason } => format!("Could not verify activation bytes ({})", reason),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Probe `key` against `file`
pub async fn verify_activation_bytes(
    transcoder: &Transcoder,
    key: &ActivationBytes,
    file: &Path,
) -> VerifyOutcome {
    info!(key = %key, file = %file.display(), "testing activation bytes");

    match transcoder.probe(file, key).await {
        Ok(output) if output.status.success() => VerifyOutcome::Verified {
            file: file.to_path_buf(),
        },
        Ok(output) => {
            let diagnostic = stderr_text(&output);
            debug!(status = %output.status, "probe rejected activation bytes");
            VerifyOutcome::Rejected {
                file: file.to_path_buf(),
                diagnostic,
            }
        }
        Err(ConverterError::Timeout { .. }) => VerifyOutcome::TimedOut {
            file: file.to_path_buf(),
        },
        Err(e) => {
            warn!("activation bytes probe could not run: {}", e);
            VerifyOutcome::CannotVerify {
                reason: e.to_string(),
            }
        }
    }
}

/// Validates candidate keys against whatever `.aax` file is lying around
#[derive(Debug, Clone)]
pub struct KeyValidator {
    transcoder: Transcoder,
    search_roots: Vec<PathBuf>,
}

impl KeyValidator {
    pub fn new(transcoder: Transcoder, search_roots: Vec<PathBuf>) -> Self {
        Self {
            transcoder,
            search_roots,
        }
    }

    /// Documents, Downloads, Music and the working directory
    pub fn default_search_roots() -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = [dirs::document_dir(), dirs::download_dir(), dirs::audio_dir()]
            .into_iter()
            .flatten()
            .collect();
        roots.push(PathBuf::from("."));
        roots
    }

    pub fn search_roots(&self) -> &[PathBuf] {
        &self.search_roots
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Verify `key` against the first `.aax` file under the search roots
    pub async fn verify(&self, key: &ActivationBytes) -> VerifyOutcome {
        let roots = self.search_roots.clone();
        let found = tokio::task::spawn_blocking(move || find_protected_file(&roots))
            .await
            .unwrap_or(None);

        match found {
            Some(file) => verify_activation_bytes(&self.transcoder, key, &file).await,
            None => {
                debug!("no .aax files found for testing");
                VerifyOutcome::CannotVerify {
                    reason: "no .aax files found for testing".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_checks() {
        assert!(is_aax_file(Path::new("book.aax")));
        assert!(is_aax_file(Path::new("/tmp/BOOK.AAX")));
        assert!(!is_aax_file(Path::new("book.aa")));
        assert!(is_audible_file(Path::new("book.aa")));
        assert!(is_audible_file(Path::new("book.Aax")));
        assert!(!is_audible_file(Path::new("book.mp3")));
        assert!(!is_audible_file(Path::new("aax")));
    }

    #[test]
    fn test_find_protected_file_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("notes.txt"), b"x").unwrap();
        std::fs::write(nested.join("Book.AAX"), b"x").unwrap();

        let found = find_protected_file(&[PathBuf::from("/nonexistent/root"), dir.path().to_path_buf()]);
        assert_eq!(found.unwrap().file_name().unwrap(), "Book.AAX");
    }

    #[tokio::test]
    async fn test_validator_cannot_verify_without_files() {
        let dir = tempfile::tempdir().unwrap();
        // ffprobe path is bogus on purpose: it must never be invoked
        let validator = KeyValidator::new(
            Transcoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"),
            vec![dir.path().to_path_buf()],
        );

        let key = ActivationBytes::from_hex("1a2b3c4d").unwrap();
        let outcome = validator.verify(&key).await;
        assert!(matches!(outcome, VerifyOutcome::CannotVerify { .. }));
        assert_eq!(outcome.label(), "cannot_verify");
        assert!(!outcome.is_verified());
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_cannot_verify() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("book.aax"), b"not really aax").unwrap();
        let validator = KeyValidator::new(
            Transcoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"),
            vec![dir.path().to_path_buf()],
        );

        let key = ActivationBytes::from_hex("1a2b3c4d").unwrap();
        assert!(matches!(validator.verify(&key).await, VerifyOutcome::CannotVerify { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_exit_status_decides() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("book.aax"), b"x").unwrap();

        // Fake ffprobe accepting only CAFEBABE
        let probe = dir.path().join("ffprobe");
        std::fs::write(
            &probe,
            "#!/bin/sh\nif [ \"$2\" = \"CAFEBABE\" ]; then exit 0; fi\necho 'Activation bytes mismatch' 1>&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&probe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let validator = KeyValidator::new(
            Transcoder::new("/nonexistent/ffmpeg", &probe),
            vec![dir.path().to_path_buf()],
        );

        let good = ActivationBytes::from_hex("cafebabe").unwrap();
        assert!(validator.verify(&good).await.is_verified());

        let bad = ActivationBytes::from_hex("00000000").unwrap();
        match validator.verify(&bad).await {
            VerifyOutcome::Rejected { diagnostic, .. } => assert!(diagnostic.contains("mismatch")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
