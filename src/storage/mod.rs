//! Local persistence
//!
//! Only one thing is persisted: the last activation bytes judged usable.

pub mod key_store;

pub use key_store::{KeyStore, DEFAULT_KEY_FILE};
