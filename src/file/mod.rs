//! File management and path utilities
//!
//! This module handles upload naming, download path safety and ZIP packaging.

pub mod archive;
pub mod paths;

// Re-export commonly used types
pub use archive::create_zip_archive;
pub use paths::{safe_child_path, secure_filename, PathBuilder};
