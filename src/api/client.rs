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


//! Cookie-holding HTTP client for the Audible web sign-in and API
//!
//! # Sign-in
//! 1. GET the OpenID sign-in page (see [`login_url`])
//! 2. Scrape the `signIn` form: action plus hidden inputs
//! 3. POST the hidden inputs back with `email` and `password`
//! 4. Classify the landing page: challenge, rejected, or signed in
//!
//! After a successful sign-in the cookie jar carries the session, so API
//! calls need no token handling of their own.

use crate::api::auth::{login_url, player_id, Credentials, Locale};
use crate::crypto::activation::{scan_page_source, ActivationBytes};
use crate::error::{ConverterError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

lazy_static! {
    static ref SIGNIN_FORM: Regex =
        Regex::new(r#"(?is)<form[^>]*name=["']signIn["'][^>]*>"#).unwrap();
    static ref FORM_ACTION: Regex = Regex::new(r#"(?i)action=["']([^"']+)["']"#).unwrap();
    static ref INPUT_TAG: Regex = Regex::new(r#"(?is)<input[^>]*>"#).unwrap();
    static ref ATTR_NAME: Regex = Regex::new(r#"(?i)\bname=["']([^"']*)["']"#).unwrap();
    static ref ATTR_VALUE: Regex = Regex::new(r#"(?i)\bvalue=["']([^"']*)["']"#).unwrap();
    static ref ATTR_HIDDEN: Regex = Regex::new(r#"(?i)\btype=["']hidden["']"#).unwrap();
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub locale: Locale,
    pub timeout: Duration,
    /// Hex player id, see [`player_id`]
    pub player_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            locale: Locale::us(),
            timeout: Duration::from_secs(30),
            player_id: None,
        }
    }
}

/// How a sign-in attempt landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInPage {
    /// CAPTCHA or robot check
    Captcha,
    /// One-time password / two-step verification
    TwoFactor,
    /// Credentials rejected
    Rejected,
    SignedIn,
}

/// Classify a sign-in response by its final URL and body
pub fn classify_sign_in_page(final_url: &str, body: &str) -> SignInPage {
    let lower = body.to_lowercase();
    if lower.contains("captcha") {
        SignInPage::Captcha
    } else if ["auth-mfa", "two-step", "one-time password", "verification code"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        SignInPage::TwoFactor
    } else if lower.contains("auth-error-message-box") || final_url.contains("/ap/signin") {
        SignInPage::Rejected
    } else {
        SignInPage::SignedIn
    }
}

/// Sign-in form scraped from a page
#[derive(Debug, Clone, PartialEq)]
pub struct SignInForm {
    pub action: String,
    pub hidden_fields: Vec<(String, String)>,
}

/// Find the `signIn` form and its hidden inputs
pub fn parse_sign_in_form(body: &str, page_url: &Url) -> Option<SignInForm> {
    let form = SIGNIN_FORM.find(body)?;
    let action = FORM_ACTION
        .captures(form.as_str())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))?;
    let action = page_url.join(&action).ok()?.to_string();

    let rest = &body[form.end()..];
    let rest = rest.find("</form>").map(|end| &rest[..end]).unwrap_or(rest);
    let hidden_fields = INPUT_TAG
        .find_iter(rest)
        .map(|m| m.as_str())
        .filter(|tag| ATTR_HIDDEN.is_match(tag))
        .filter_map(|tag| {
            let name = ATTR_NAME.captures(tag)?.get(1)?.as_str().to_string();
            let value = ATTR_VALUE
                .captures(tag)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some((name, value))
        })
        .collect();

    Some(SignInForm { action, hidden_fields })
}

/// Activation bytes embedded in an API response
///
/// Looks at the top-level `activation_bytes` field first, then at each
/// `items[]` entry.
pub fn embedded_activation_bytes(value: &Value) -> Option<String> {
    let field = |v: &Value| v.get("activation_bytes").and_then(Value::as_str).map(str::to_string);
    field(value).or_else(|| {
        value
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.iter().find_map(field))
    })
}

/// HTTP client bound to one marketplace
#[derive(Debug, Clone)]
pub struct AudibleClient {
    http: Client,
    config: ClientConfig,
}

impl AudibleClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn locale(&self) -> &Locale {
        &self.config.locale
    }

    /// Sign in with `credentials`, returning the page the login landed on
    ///
    /// # Errors
    /// - `AuthenticationFailed` - rejected, or a CAPTCHA / two-step challenge
    /// - `InvalidApiResponse` - sign-in form missing from the login page
    /// - `Http` - transport errors
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<String> {
        let locale = &self.config.locale;
        let player = player_id(self.config.player_id.as_deref())?;

        // Landing on the storefront first sets the regional cookies
        self.http
            .get(format!("{}?ipRedirectOverride=true", locale.base_url()))
            .send()
            .await?;

        let url = login_url(locale, &credentials.username, &player)?;
        let response = self.http.get(&url).send().await?;
        let page_url = response.url().clone();
        let body = response.text().await?;

        let form = parse_sign_in_form(&body, &page_url).ok_or_else(|| ConverterError::InvalidApiResponse {
            message: "Sign-in form not found on login page".to_string(),
            response_body: None,
        })?;
        debug!(action = %form.action, fields = form.hidden_fields.len(), "submitting sign-in form");

        let mut fields = form.hidden_fields;
        fields.push(("email".to_string(), credentials.username.clone()));
        fields.push(("password".to_string(), credentials.password.clone()));

        let response = self.http.post(&form.action).form(&fields).send().await?;
        let final_url = response.url().to_string();
        let body = response.text().await?;

        match classify_sign_in_page(&final_url, &body) {
            SignInPage::Captcha => Err(ConverterError::AuthenticationFailed(
                "CAPTCHA verification required".to_string(),
            )),
            SignInPage::TwoFactor => Err(ConverterError::AuthenticationFailed(
                "Two-step verification (2FA/OTP) required".to_string(),
            )),
            SignInPage::Rejected => Err(ConverterError::AuthenticationFailed(
                "Sign-in rejected, check your credentials".to_string(),
            )),
            SignInPage::SignedIn => {
                info!(locale = %locale.country_code, "signed in");
                Ok(body)
            }
        }
    }

    /// Authenticated GET against the API host
    ///
    /// # Arguments
    /// * `endpoint` - path such as `1.0/library`, with or without leading `/`
    /// * `query` - query parameters
    ///
    /// # Errors
    /// - `ApiRequestFailed` - non-success status
    /// - `InvalidApiResponse` - body is not JSON
    pub async fn get_with_query(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.config.locale.api_url(), endpoint.trim_start_matches('/'));
        let response = self.http.get(&url).query(query).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ConverterError::ApiRequestFailed {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| ConverterError::InvalidApiResponse {
            message: format!("{} returned invalid JSON: {}", endpoint, e),
            response_body: Some(body),
        })
    }
}

/// Activation bytes in a structured field of a landing page
pub fn landing_page_activation_bytes(body: &str) -> Option<ActivationBytes> {
    match scan_page_source(body) {
        Some((key, true)) => Some(key),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LOGIN_PAGE: &str = r#"
        <html><body>
        <form name="signIn" method="post" novalidate action="https://www.amazon.com/ap/signin" class="auth-validate-form">
          <input type="hidden" name="appActionToken" value="tok123" />
          <input type="hidden" name="openid.return_to" value="ape:aHR0cHM6" />
          <input type="email" name="email" id="ap_email" />
          <input type="password" name="password" id="ap_password" />
          <input type="hidden" name="metadata1" />
        </form>
        <input type="hidden" name="outside" value="ignored" />
        </body></html>
    "#;

    #[test]
    fn test_parse_sign_in_form() {
        let page = Url::parse("https://www.amazon.com/ap/signin?x=1").unwrap();
        let form = parse_sign_in_form(LOGIN_PAGE, &page).unwrap();
        assert_eq!(form.action, "https://www.amazon.com/ap/signin");
        assert_eq!(
            form.hidden_fields,
            vec![
                ("appActionToken".to_string(), "tok123".to_string()),
                ("openid.return_to".to_string(), "ape:aHR0cHM6".to_string()),
                ("metadata1".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_relative_action() {
        let page = Url::parse("https://www.audible.com/sign-in").unwrap();
        let body = r#"<form name='signIn' action='/ap/signin?a=1&amp;b=2'></form>"#;
        let form = parse_sign_in_form(body, &page).unwrap();
        assert_eq!(form.action, "https://www.audible.com/ap/signin?a=1&b=2");
        assert!(form.hidden_fields.is_empty());
    }

    #[test]
    fn test_no_form() {
        let page = Url::parse("https://www.audible.com/").unwrap();
        assert!(parse_sign_in_form("<html></html>", &page).is_none());
    }

    #[test]
    fn test_classify_sign_in_page() {
        assert_eq!(classify_sign_in_page("https://x/", "Enter the characters (captcha)"), SignInPage::Captcha);
        assert_eq!(classify_sign_in_page("https://x/", "<div id=\"auth-mfa-form\">"), SignInPage::TwoFactor);
        assert_eq!(
            classify_sign_in_page("https://www.amazon.com/ap/signin", "<p>Welcome</p>"),
            SignInPage::Rejected
        );
        assert_eq!(
            classify_sign_in_page("https://www.audible.com/", "<div id=\"nav-main\"></div>"),
            SignInPage::SignedIn
        );
    }

    #[test]
    fn test_embedded_activation_bytes() {
        assert_eq!(
            embedded_activation_bytes(&json!({"activation_bytes": "1a2b3c4d"})).as_deref(),
            Some("1a2b3c4d")
        );
        assert_eq!(
            embedded_activation_bytes(&json!({"items": [{"asin": "B0"}, {"activation_bytes": "CAFEBABE"}]})).as_deref(),
            Some("CAFEBABE")
        );
        assert!(embedded_activation_bytes(&json!({"items": []})).is_none());
        assert!(embedded_activation_bytes(&json!({"activation_bytes": 7})).is_none());
    }

    #[test]
    fn test_landing_page_needs_structured_field() {
        assert_eq!(
            landing_page_activation_bytes(r#"{"activation_bytes": "deadbeef"}"#).map(|k| k.to_hex()),
            Some("DEADBEEF".to_string())
        );
        assert!(landing_page_activation_bytes(r#"<span>"deadbeef"</span>"#).is_none());
    }
}
