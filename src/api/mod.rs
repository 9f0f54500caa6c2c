//! Audible web sign-in and API client
//!
//! Just enough of the Audible account surface to look for activation bytes:
//! regional sign-in, customer information and a one-item library page.

pub mod auth;
pub mod client;
pub mod customer;
pub mod library;

// Re-export commonly used types
pub use auth::{Credentials, Locale};
pub use client::{AudibleClient, ClientConfig};
pub use customer::CustomerInformation;
pub use library::LibraryOptions;
