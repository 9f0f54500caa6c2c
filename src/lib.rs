//! Audible audiobook conversion and activation bytes discovery
//!
//! - [`discovery`] finds the 4-byte key that unlocks `.aax` files, trying
//!   audible-cli, the account API, a browser login, local files and manual
//!   entry in turn
//! - [`crypto`] validates and verifies keys
//! - [`audio`] converts to MP3, splits into size-bounded chunks and zips them
//! - [`server`] exposes all of it over HTTP

// Core modules
pub mod error;
pub mod api;
pub mod audio;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod file;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::ConverterConfig;
pub use crypto::ActivationBytes;
pub use error::{ConverterError, Result};
