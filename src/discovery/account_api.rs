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


//! Account API strategy
//!
//! Signs in and looks for the key in three places, stopping at the first hit:
//! 1. the session itself (landing page after sign-in)
//! 2. `1.0/customer/information`
//! 3. `1.0/library?num_results=1`
//!
//! Follow-up call errors are logged and ignored.

use super::{DiscoveryContext, DiscoveryFailure, DiscoveryResult, FailureKind, KeyStrategy, Method};
use crate::api::auth::{Credentials, Locale};
use crate::api::client::{embedded_activation_bytes, landing_page_activation_bytes, AudibleClient, ClientConfig};
use crate::api::customer::{CustomerInformation, CUSTOMER_INFORMATION_ENDPOINT, CUSTOMER_INFORMATION_QUERY};
use crate::api::library::{LibraryOptions, LIBRARY_ENDPOINT};
use crate::crypto::activation::ActivationBytes;
use crate::error::{ConverterError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error text fragments that point at an interactive challenge
const CHALLENGE_MARKERS: &[&str] = &["2fa", "captcha", "two-step", "otp"];

/// Remote account service
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials, locale: &Locale) -> Result<Box<dyn AccountSession>>;
}

/// Signed-in session
#[async_trait]
pub trait AccountSession: Send + Sync {
    /// Key carried by the session object itself, if any
    fn activation_bytes(&self) -> Option<String>;

    /// Authenticated GET returning JSON
    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value>;
}

pub struct AccountApiStrategy {
    api: Arc<dyn AccountApi>,
}

impl AccountApiStrategy {
    pub fn new(api: Arc<dyn AccountApi>) -> Self {
        Self { api }
    }

    /// Strategy backed by the real Audible endpoints
    pub fn audible(timeout: Duration) -> Self {
        Self::new(Arc::new(AudibleAccountApi::new(timeout)))
    }
}

/// Accept `raw` only if it is a well-formed key
fn usable(raw: Option<String>, source: &str) -> Option<ActivationBytes> {
    let raw = raw?;
    match ActivationBytes::from_hex(&raw) {
        Ok(key) => {
            info!(source, "activation bytes found");
            Some(key)
        }
        Err(_) => {
            warn!(source, "ignoring malformed activation bytes {:?}", raw);
            None
        }
    }
}

fn authentication_failure(error: &ConverterError) -> DiscoveryResult {
    let text = error.to_string();
    let lower = text.to_lowercase();
    let failure = DiscoveryFailure::new(FailureKind::Authentication, format!("Authentication failed: {}", text));
    if CHALLENGE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        DiscoveryResult::Failure(
            DiscoveryFailure {
                kind: FailureKind::Challenge,
                ..failure
            }
            .with_hint("Your account may have 2FA enabled or require captcha verification. Try the browser method instead."),
        )
    } else {
        DiscoveryResult::Failure(failure)
    }
}

#[async_trait]
impl KeyStrategy for AccountApiStrategy {
    fn method(&self) -> Method {
        Method::Auth
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn discover(&self, ctx: &DiscoveryContext) -> Result<DiscoveryResult> {
        let Some(credentials) = ctx.credentials.as_ref() else {
            return Ok(DiscoveryResult::failure(
                FailureKind::Authentication,
                "Email and password required",
            ));
        };

        info!(locale = %ctx.locale.country_code, "authenticating with Audible");
        let session = match self.api.authenticate(credentials, &ctx.locale).await {
            Ok(session) => session,
            Err(e @ ConverterError::AuthenticationFailed(_)) => return Ok(authentication_failure(&e)),
            Err(e) => {
                warn!("authentication request failed: {}", e);
                return Ok(DiscoveryResult::Failure(DiscoveryFailure::from_error(&e)));
            }
        };

        if let Some(key) = usable(session.activation_bytes(), "session") {
            return Ok(DiscoveryResult::success(key));
        }

        match session.get(CUSTOMER_INFORMATION_ENDPOINT, CUSTOMER_INFORMATION_QUERY).await {
            Ok(body) => {
                let profile = CustomerInformation::from_value(&body);
                debug!(customer = ?profile.given_name, "customer information received");
                if let Some(key) = usable(profile.activation_bytes, "profile") {
                    return Ok(DiscoveryResult::success(key));
                }
            }
            Err(e) => warn!(endpoint = CUSTOMER_INFORMATION_ENDPOINT, "follow-up call failed: {}", e),
        }

        let library_values = LibraryOptions::default().query_values();
        let library_query: Vec<(&str, &str)> = library_values.iter().map(|(k, v)| (*k, v.as_str())).collect();
        match session.get(LIBRARY_ENDPOINT, &library_query).await {
            Ok(body) => {
                if let Some(key) = usable(embedded_activation_bytes(&body), "library") {
                    return Ok(DiscoveryResult::success(key));
                }
            }
            Err(e) => warn!(endpoint = LIBRARY_ENDPOINT, "follow-up call failed: {}", e),
        }

        Ok(DiscoveryResult::Failure(
            DiscoveryFailure::new(
                FailureKind::NoCandidate,
                "Authentication successful but activation bytes not found in API response",
            )
            .with_hint("Try downloading a book to trigger activation bytes generation"),
        ))
    }
}

// ============================================================================
// PRODUCTION IMPLEMENTATION
// ============================================================================

/// [`AccountApi`] over the Audible web sign-in
pub struct AudibleAccountApi {
    timeout: Duration,
}

impl AudibleAccountApi {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

struct AudibleSession {
    client: AudibleClient,
    landing_page: String,
}

#[async_trait]
impl AccountApi for AudibleAccountApi {
    async fn authenticate(&self, credentials: &Credentials, locale: &Locale) -> Result<Box<dyn AccountSession>> {
        let client = AudibleClient::new(ClientConfig {
            locale: locale.clone(),
            timeout: self.timeout,
            player_id: None,
        })?;
        let landing_page = client.sign_in(credentials).await?;
        Ok(Box::new(AudibleSession { client, landing_page }))
    }
}

#[async_trait]
impl AccountSession for AudibleSession {
    fn activation_bytes(&self) -> Option<String> {
        landing_page_activation_bytes(&self.landing_page).map(|key| key.to_hex())
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.client.get_with_query(endpoint, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeApi {
        auth_error: Option<String>,
        session_key: Option<String>,
        responses: HashMap<&'static str, Value>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                auth_error: None,
                session_key: None,
                responses: HashMap::new(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    struct FakeSession {
        key: Option<String>,
        responses: HashMap<&'static str, Value>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AccountApi for FakeApi {
        async fn authenticate(&self, _c: &Credentials, _l: &Locale) -> Result<Box<dyn AccountSession>> {
            if let Some(msg) = &self.auth_error {
                return Err(ConverterError::AuthenticationFailed(msg.clone()));
            }
            Ok(Box::new(FakeSession {
                key: self.session_key.clone(),
                responses: self.responses.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    #[async_trait]
    impl AccountSession for FakeSession {
        fn activation_bytes(&self) -> Option<String> {
            self.key.clone()
        }

        async fn get(&self, endpoint: &str, _query: &[(&str, &str)]) -> Result<Value> {
            self.calls.lock().unwrap().push(endpoint.to_string());
            self.responses
                .get(endpoint)
                .cloned()
                .ok_or_else(|| ConverterError::ApiRequestFailed { status: 404, message: "missing".into() })
        }
    }

    fn ctx() -> DiscoveryContext {
        DiscoveryContext::new(Some(Credentials::new("reader@example.com", "secret")))
    }

    #[tokio::test]
    async fn test_session_key_short_circuits() {
        let mut api = FakeApi::new();
        api.session_key = Some("cafebabe".into());
        let calls = api.calls.clone();

        let result = AccountApiStrategy::new(Arc::new(api)).discover(&ctx()).await.unwrap();
        assert_eq!(result.key().unwrap().to_hex(), "CAFEBABE");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_library_items_after_failed_profile() {
        let mut api = FakeApi::new();
        api.session_key = Some("not-a-key".into());
        api.responses.insert(LIBRARY_ENDPOINT, json!({"items": [{"activation_bytes": "0badf00d"}]}));
        let calls = api.calls.clone();

        let result = AccountApiStrategy::new(Arc::new(api)).discover(&ctx()).await.unwrap();
        assert_eq!(result.key().unwrap().to_hex(), "0BADF00D");
        assert_eq!(
            *calls.lock().unwrap(),
            vec![CUSTOMER_INFORMATION_ENDPOINT.to_string(), LIBRARY_ENDPOINT.to_string()]
        );
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let mut api = FakeApi::new();
        api.responses.insert(CUSTOMER_INFORMATION_ENDPOINT, json!({"name": "Ada"}));
        api.responses.insert(LIBRARY_ENDPOINT, json!({"items": []}));

        let result = AccountApiStrategy::new(Arc::new(api)).discover(&ctx()).await.unwrap();
        assert_eq!(result.failure_ref().unwrap().kind, FailureKind::NoCandidate);
    }

    #[tokio::test]
    async fn test_two_factor_hint() {
        let mut api = FakeApi::new();
        api.auth_error = Some("Two-step verification (2FA/OTP) required".into());

        let result = AccountApiStrategy::new(Arc::new(api)).discover(&ctx()).await.unwrap();
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Challenge);
        assert!(failure.hint.as_deref().unwrap().contains("browser method"));
    }

    #[tokio::test]
    async fn test_plain_rejection() {
        let mut api = FakeApi::new();
        api.auth_error = Some("Sign-in rejected, check your credentials".into());

        let result = AccountApiStrategy::new(Arc::new(api)).discover(&ctx()).await.unwrap();
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Authentication);
        assert!(failure.hint.is_none());
    }
}
