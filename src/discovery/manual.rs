//! Manual entry strategy
//!
//! The key comes from a human: a request field on the web side, a terminal
//! prompt on the CLI. It is format-checked, then tried against a local
//! `.aax` file. A key that cannot be confirmed is still returned, labelled
//! unverified.

use super::{DiscoveryContext, DiscoveryResult, FailureKind, KeyStrategy, Method};
use crate::crypto::aax::{KeyValidator, VerifyOutcome};
use crate::crypto::activation::ActivationBytes;
use crate::error::{ConverterError, Result};
use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{info, warn};

/// Source of a human-entered key
#[async_trait]
pub trait KeyPrompt: Send + Sync {
    /// `None` when nothing was entered
    async fn read_key(&self) -> Result<Option<String>>;
}

/// Key supplied up front, e.g. in an HTTP request body
#[derive(Debug, Clone, Default)]
pub struct ProvidedKey(pub Option<String>);

#[async_trait]
impl KeyPrompt for ProvidedKey {
    async fn read_key(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

const BROWSER_GUIDE: &str = "\
Find your activation bytes in the browser:
  1. Log into your Audible account at audible.com
  2. Open Developer Tools (F12) and go to the Network tab
  3. Clear the log, then open your library or play a book
  4. Search requests for 'activation_bytes', 'license', 'drm' or '.aax'
  5. Look for an 8-character hexadecimal string (e.g. 1A2B3C4D)
";

/// Interactive prompt on stdin with browser guidance on stderr
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn prompt() -> io::Result<Option<String>> {
        let mut stderr = io::stderr();
        writeln!(stderr, "\n{}", BROWSER_GUIDE)?;
        write!(stderr, "Enter activation bytes (or press Enter to skip): ")?;
        stderr.flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        let input = input.trim();
        Ok((!input.is_empty()).then(|| input.to_string()))
    }
}

#[async_trait]
impl KeyPrompt for TerminalPrompt {
    async fn read_key(&self) -> Result<Option<String>> {
        tokio::task::spawn_blocking(Self::prompt)
            .await
            .map_err(|e| ConverterError::InvalidState(format!("prompt task failed: {}", e)))?
            .map_err(ConverterError::from)
    }
}

pub struct ManualStrategy {
    prompt: Arc<dyn KeyPrompt>,
    validator: KeyValidator,
}

impl ManualStrategy {
    pub fn new(prompt: Arc<dyn KeyPrompt>, validator: KeyValidator) -> Self {
        Self { prompt, validator }
    }

    /// Strategy over a key that is already known
    pub fn provided(key: Option<String>, validator: KeyValidator) -> Self {
        Self::new(Arc::new(ProvidedKey(key)), validator)
    }

    pub fn terminal(validator: KeyValidator) -> Self {
        Self::new(Arc::new(TerminalPrompt), validator)
    }
}

#[async_trait]
impl KeyStrategy for ManualStrategy {
    fn method(&self) -> Method {
        Method::Manual
    }

    async fn discover(&self, _ctx: &DiscoveryContext) -> Result<DiscoveryResult> {
        let Some(raw) = self.prompt.read_key().await?.filter(|k| !k.trim().is_empty()) else {
            return Ok(DiscoveryResult::failure(
                FailureKind::NoCandidate,
                "No activation bytes were entered",
            ));
        };

        let key = match ActivationBytes::from_hex(&raw) {
            Ok(key) => key,
            Err(e) => return Ok(DiscoveryResult::failure(FailureKind::InvalidFormat, e.to_string())),
        };

        let outcome = self.validator.verify(&key).await;
        match outcome {
            VerifyOutcome::Verified { .. } => {
                info!(key = %key, "entered activation bytes verified");
                Ok(DiscoveryResult::success(key))
            }
            other => {
                warn!("{}", other.message());
                Ok(DiscoveryResult::unverified(key, other.message()))
            }
        }
    }
}
