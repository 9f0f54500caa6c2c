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


//! Flat-file persistence of the activation bytes
//!
//! The store is a single plain-text file holding exactly the 8 uppercase
//! characters, no newline, no metadata. Writes overwrite; there is no locking,
//! the last writer wins.
//!
//! Mirrors are extra locations (e.g. `~/activation_bytes.txt`) that receive a
//! best-effort copy on every save. They are never read.

use crate::crypto::activation::{ActivationBytes, ACTIVATION_BYTES_HEX_LEN};
use crate::error::{ConverterError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default file name, relative to the working directory
pub const DEFAULT_KEY_FILE: &str = "activation_bytes.txt";

#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
    mirrors: Vec<PathBuf>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_FILE)
    }
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirrors: Vec::new(),
        }
    }

    pub fn with_mirrors(mut self, mirrors: Vec<PathBuf>) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `key`, overwriting any previous value
    ///
    /// Mirror failures are logged and ignored.
    pub fn save(&self, key: &ActivationBytes) -> Result<()> {
        write_key(&self.path, key)?;
        info!(path = %self.path.display(), "saved activation bytes");

        for mirror in &self.mirrors {
            match write_key(mirror, key) {
                Ok(()) => debug!(path = %mirror.display(), "mirrored activation bytes"),
                Err(e) => warn!(path = %mirror.display(), "could not mirror activation bytes: {}", e),
            }
        }
        Ok(())
    }

    /// Validate then persist a raw string
    ///
    /// # Errors
    /// `InvalidActivationBytes` before anything is written
    pub fn save_str(&self, raw: &str) -> Result<ActivationBytes> {
        let key = ActivationBytes::from_hex(raw)?;
        self.save(&key)?;
        Ok(key)
    }

    /// Load the persisted key
    ///
    /// # Errors
    /// - `KeyNotSaved` - file does not exist
    /// - `CorruptKeyFile` - content is not 8 hex characters after trimming
    pub fn load(&self) -> Result<ActivationBytes> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConverterError::KeyNotSaved(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let trimmed = content.trim();
        if trimmed.len() != ACTIVATION_BYTES_HEX_LEN {
            return Err(self.corrupt(trimmed));
        }
        ActivationBytes::from_hex(trimmed).map_err(|_| self.corrupt(trimmed))
    }

    /// Load, treating "nothing saved" and "corrupt" alike as absent
    pub fn load_optional(&self) -> Option<ActivationBytes> {
        match self.load() {
            Ok(key) => Some(key),
            Err(ConverterError::KeyNotSaved(_)) => None,
            Err(e) => {
                warn!("ignoring saved activation bytes: {}", e);
                None
            }
        }
    }

    fn corrupt(&self, content: &str) -> ConverterError {
        ConverterError::CorruptKeyFile {
            path: self.path.clone(),
            content: content.to_string(),
        }
    }
}

fn write_key(path: &Path, key: &ActivationBytes) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, key.to_hex())?;
    Ok(())
}
