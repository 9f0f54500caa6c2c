//! Filesystem scan strategy
//!
//! Walks Audible config folders and the usual user directories for small
//! text-like files and pattern-matches candidate keys out of them. Matches
//! are confirmed with the [`KeyValidator`] when a local `.aax` is available.

use super::{DiscoveryContext, DiscoveryResult, FailureKind, KeyStrategy, Method};
use crate::crypto::aax::{KeyValidator, VerifyOutcome};
use crate::crypto::activation::{collect_candidates, ActivationBytes};
use crate::error::{ConverterError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extensions worth opening
pub const SCANNED_EXTENSIONS: &[&str] = &["json", "txt", "log", "cfg", "ini", "xml", "plist"];

pub const DEFAULT_MAX_DEPTH: usize = 8;

pub struct FileScanStrategy {
    roots: Vec<PathBuf>,
    max_depth: usize,
    validator: KeyValidator,
}

impl FileScanStrategy {
    pub fn new(validator: KeyValidator) -> Self {
        Self {
            roots: Self::default_roots(),
            max_depth: DEFAULT_MAX_DEPTH,
            validator,
        }
    }

    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Audible config folders first, then Documents, Downloads and `.`
    pub fn default_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join("AppData").join("Roaming").join("Audible"));
            roots.push(home.join("AppData").join("Local").join("Audible"));
            roots.push(home.join("AppData").join("Roaming").join("AudibleDownloadManager"));
        }
        if let Some(config) = dirs::config_dir() {
            roots.push(config.join("audible"));
        }
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".audible"));
        }
        roots.extend([dirs::document_dir(), dirs::download_dir()].into_iter().flatten());
        roots.push(PathBuf::from("."));
        roots
    }

    /// Blocking scan; unique candidates in discovery order
    pub fn scan_candidates(&self) -> Vec<ActivationBytes> {
        scan_roots(&self.roots, self.max_depth)
    }

    /// [`scan_candidates`](Self::scan_candidates) on the blocking pool
    pub async fn candidates(&self) -> Result<Vec<ActivationBytes>> {
        let roots = self.roots.clone();
        let max_depth = self.max_depth;
        tokio::task::spawn_blocking(move || scan_roots(&roots, max_depth))
            .await
            .map_err(|e| ConverterError::InvalidState(format!("file scan task failed: {}", e)))
    }
}

fn is_scanned_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SCANNED_EXTENSIONS.iter().any(|allowed| e.eq_ignore_ascii_case(allowed)))
        .unwrap_or(false)
}

/// Lazy walk over every root; unreadable entries are dropped silently
fn scan_roots(roots: &[PathBuf], max_depth: usize) -> Vec<ActivationBytes> {
    let mut found = Vec::new();

    let files = roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| {
            debug!(root = %root.display(), "scanning");
            WalkDir::new(root)
                .max_depth(max_depth)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
        })
        .filter(|entry| entry.file_type().is_file() && is_scanned_file(entry.path()));

    for entry in files {
        let Ok(raw) = std::fs::read(entry.path()) else {
            continue;
        };
        let before = found.len();
        collect_candidates(&String::from_utf8_lossy(&raw), &mut found);
        if found.len() > before {
            debug!(file = %entry.path().display(), new = found.len() - before, "candidates found");
        }
    }

    found
}

#[async_trait]
impl KeyStrategy for FileScanStrategy {
    fn method(&self) -> Method {
        Method::File
    }

    async fn discover(&self, _ctx: &DiscoveryContext) -> Result<DiscoveryResult> {
        info!(roots = self.roots.len(), "searching local files for activation bytes");
        let candidates = self.candidates().await?;

        let Some(first) = candidates.first().copied() else {
            return Ok(DiscoveryResult::failure(
                FailureKind::NoCandidate,
                "No activation bytes found in local files",
            ));
        };
        info!(count = candidates.len(), "potential activation bytes found");

        for candidate in &candidates {
            match self.validator.verify(candidate).await {
                VerifyOutcome::Verified { .. } => return Ok(DiscoveryResult::success(*candidate)),
                // Nothing to test with: every candidate would get the same answer
                outcome @ VerifyOutcome::CannotVerify { .. } => {
                    return Ok(DiscoveryResult::unverified(first, outcome.message()));
                }
                outcome => debug!(key = %candidate, "{}", outcome.message()),
            }
        }

        warn!("no candidate decoded the local .aax file");
        Ok(DiscoveryResult::unverified(
            first,
            format!("none of {} candidates could be verified", candidates.len()),
        ))
    }
}
