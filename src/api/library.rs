//! Library API
//!
//! Only a single-item page is ever requested: the call exists to see whether
//! the response carries activation bytes, not to sync the library.
//!
//! # API Endpoint
//! `GET https://api.audible.{domain}/1.0/library?num_results=N`

pub const LIBRARY_ENDPOINT: &str = "1.0/library";

/// Options for a library page request
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub num_results: u32,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self { num_results: 1 }
    }
}

impl LibraryOptions {
    /// Query pairs as owned values
    pub fn query_values(&self) -> Vec<(&'static str, String)> {
        vec![("num_results", self.num_results.to_string())]
    }
}
