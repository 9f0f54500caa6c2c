//! Activation bytes handling
//!
//! This module owns everything about the key itself: its validated value type,
//! the text patterns used to spot it, and verification against a local AAX
//! file through ffprobe.
//!
//! # DRM Formats
//! - **AAX**: AES encryption unlocked by 4 activation bytes (`-activation_bytes`)
//! - **AA**: legacy format, ffmpeg decodes it without a key

pub mod activation;
pub mod aax;

// Re-export commonly used types from activation module
pub use activation::{
    ActivationBytes,
    format_activation_bytes,
    parse_activation_bytes,
    validate_activation_bytes,
};

// Re-export commonly used types from AAX module
pub use aax::{
    KeyValidator,
    VerifyOutcome,
    is_aax_file,
    is_audible_file,
    verify_activation_bytes,
};
