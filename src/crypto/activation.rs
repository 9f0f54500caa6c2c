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


//! Activation bytes value type and text patterns
//!
//! Activation bytes are the 4-byte key ffmpeg needs (`-activation_bytes`) to
//! decode an AAX container. They travel as 8 hexadecimal characters and are
//! always rendered uppercase.
//!
//! # Patterns
//! Key discovery scans arbitrary text (tool output, config files, web pages)
//! for candidates. The patterns here are ordered from most to least specific:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | [`LABELED_PATTERNS`] | `activation_bytes: 1a2b3c4d`, `"activation-bytes" = "1A2B3C4D"`, `bytes=...` |
//! | [`BARE_QUOTED_PATTERN`] | any 8-hex token delimited by quotes or whitespace |
//! | [`TOKEN_PATTERN`] | any 8-hex word |

use crate::error::{ConverterError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of the textual form
pub const ACTIVATION_BYTES_HEX_LEN: usize = 8;

lazy_static! {
    /// Labeled-field patterns, most specific first
    pub static ref LABELED_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#"(?i)activation.?bytes["\s:=]+([0-9a-f]{8})"#).unwrap(),
        Regex::new(r#"(?i)"activation.?bytes"["\s:=]+([0-9a-f]{8})"#).unwrap(),
        Regex::new(r#"(?i)bytes["\s:=]+([0-9a-f]{8})"#).unwrap(),
    ];

    /// 8-hex token delimited by quotes or whitespace
    pub static ref BARE_QUOTED_PATTERN: Regex =
        Regex::new(r#"["\s]([0-9A-Fa-f]{8})["\s]"#).unwrap();

    /// JSON-ish `"activation_bytes": "XXXXXXXX"` field in page source
    pub static ref STRUCTURED_FIELD_PATTERN: Regex =
        Regex::new(r#"["']activation_bytes["']\s*:\s*["']([A-Fa-f0-9]{8})["']"#).unwrap();

    /// 8-hex token inside single or double quotes
    pub static ref QUOTED_TOKEN_PATTERN: Regex =
        Regex::new(r#"["']([A-Fa-f0-9]{8})["']"#).unwrap();

    /// 8-hex word anywhere (command output)
    pub static ref TOKEN_PATTERN: Regex =
        Regex::new(r"\b([0-9A-Fa-f]{8})\b").unwrap();
}

/// Validated activation bytes
///
/// Can only be constructed from well-formed input, so anything holding an
/// `ActivationBytes` may pass it to ffmpeg without further checks.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivationBytes([u8; 4]);

impl ActivationBytes {
    /// Parse from exactly 8 hex characters (case-insensitive)
    ///
    /// Whitespace is not stripped; callers reading from files or terminals
    /// trim first.
    ///
    /// # Errors
    /// `InvalidActivationBytes` if the input is not exactly 8 hex characters
    pub fn from_hex(input: &str) -> Result<Self> {
        if !validate_activation_bytes(input) {
            return Err(ConverterError::InvalidActivationBytes(format!(
                "{:?} ({} characters)",
                input,
                input.chars().count()
            )));
        }

        let mut raw = [0u8; 4];
        hex::decode_to_slice(input, &mut raw)
            .map_err(|e| ConverterError::InvalidActivationBytes(e.to_string()))?;
        Ok(Self(raw))
    }

    pub fn from_bytes(raw: [u8; 4]) -> Self {
        Self(raw)
    }

    /// Uppercase 8-character form, as passed to ffmpeg and stored on disk
    pub fn to_hex(&self) -> String {
        format_activation_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for ActivationBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ActivationBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationBytes({})", self.to_hex())
    }
}

impl FromStr for ActivationBytes {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ActivationBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ActivationBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse activation bytes from text
pub fn parse_activation_bytes(input: &str) -> Result<ActivationBytes> {
    ActivationBytes::from_hex(input)
}

/// Render 4 raw bytes as uppercase hex
pub fn format_activation_bytes(raw: &[u8; 4]) -> String {
    hex::encode_upper(raw)
}

/// True if `input` is exactly 8 hexadecimal characters
pub fn validate_activation_bytes(input: &str) -> bool {
    input.len() == ACTIVATION_BYTES_HEX_LEN && input.chars().all(|c| c.is_ascii_hexdigit())
}

/// First 8-hex word in `text`
pub fn first_token(text: &str) -> Option<ActivationBytes> {
    TOKEN_PATTERN
        .captures(text)
        .and_then(|caps| ActivationBytes::from_hex(&caps[1]).ok())
}

/// Collect unique candidates from `text`, labeled patterns first, then bare tokens
///
/// Candidates already in `found` are skipped, so the same vector can be fed
/// across many files and keeps discovery order.
pub fn collect_candidates(text: &str, found: &mut Vec<ActivationBytes>) {
    let patterns = LABELED_PATTERNS
        .iter()
        .chain(std::iter::once(&*BARE_QUOTED_PATTERN));

    for pattern in patterns {
        for caps in pattern.captures_iter(text) {
            if let Ok(key) = ActivationBytes::from_hex(&caps[1]) {
                if !found.contains(&key) {
                    found.push(key);
                }
            }
        }
    }
}

/// Page-source scan: structured field first, then any quoted 8-hex token
///
/// Returns the key and whether it came from the structured field.
pub fn scan_page_source(source: &str) -> Option<(ActivationBytes, bool)> {
    if let Some(caps) = STRUCTURED_FIELD_PATTERN.captures(source) {
        if let Ok(key) = ActivationBytes::from_hex(&caps[1]) {
            return Some((key, true));
        }
    }

    QUOTED_TOKEN_PATTERN
        .captures_iter(source)
        .find_map(|caps| ActivationBytes::from_hex(&caps[1]).ok())
        .map(|key| (key, false))
}
