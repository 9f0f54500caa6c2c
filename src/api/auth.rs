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


//! Regional marketplaces, credentials and the sign-in URL
//!
//! Audible runs one storefront per marketplace, each paired with an Amazon
//! sign-in domain. Both the browser strategy and the HTTP account client log
//! in through the same OpenID URL, built by [`login_url`].
//!
//! # Player identifier
//! The `player-auth-token` callback carries a player id: base64 of a
//! caller-supplied hex id, or base64 of SHA-1 of the empty string when none
//! is given. The default is therefore stable across runs.

use crate::error::{ConverterError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;
use url::Url;

const OPENID_NS: &str = "http://specs.openid.net/auth/2.0";
const OPENID_IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

// ============================================================================
// LOCALE
// ============================================================================

/// Audible marketplace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    /// Human-readable name ("United States")
    pub name: String,

    /// Short code used in configuration and `amzn_audible_<code>`
    pub country_code: String,

    /// Audible storefront domain (`audible.com`)
    pub domain: String,

    /// Amazon sign-in domain (`amazon.com`)
    pub amazon_domain: String,
}

impl Locale {
    fn new(name: &str, country_code: &str, domain: &str, amazon_domain: &str) -> Self {
        Self {
            name: name.to_string(),
            country_code: country_code.to_string(),
            domain: domain.to_string(),
            amazon_domain: amazon_domain.to_string(),
        }
    }

    pub fn us() -> Self {
        Self::new("United States", "us", "audible.com", "amazon.com")
    }

    pub fn uk() -> Self {
        Self::new("United Kingdom", "uk", "audible.co.uk", "amazon.co.uk")
    }

    pub fn au() -> Self {
        Self::new("Australia", "au", "audible.com.au", "amazon.com.au")
    }

    pub fn de() -> Self {
        Self::new("Germany", "de", "audible.de", "amazon.de")
    }

    pub fn fr() -> Self {
        Self::new("France", "fr", "audible.fr", "amazon.fr")
    }

    pub fn jp() -> Self {
        Self::new("Japan", "jp", "audible.co.jp", "amazon.co.jp")
    }

    pub fn india() -> Self {
        Self::new("India", "in", "audible.in", "amazon.in")
    }

    pub fn ca() -> Self {
        Self::new("Canada", "ca", "audible.ca", "amazon.ca")
    }

    pub fn it() -> Self {
        Self::new("Italy", "it", "audible.it", "amazon.it")
    }

    pub fn es() -> Self {
        Self::new("Spain", "es", "audible.es", "amazon.es")
    }

    /// All supported marketplaces
    pub fn all() -> Vec<Self> {
        vec![
            Self::us(),
            Self::uk(),
            Self::au(),
            Self::de(),
            Self::fr(),
            Self::jp(),
            Self::india(),
            Self::ca(),
            Self::it(),
            Self::es(),
        ]
    }

    /// Look up by country code, case-insensitive
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::all()
            .into_iter()
            .find(|l| l.country_code.eq_ignore_ascii_case(code))
    }

    /// Storefront root with a trailing slash: `https://www.audible.com/`
    pub fn base_url(&self) -> String {
        format!("https://www.{}/", self.domain)
    }

    /// API root without trailing slash: `https://api.audible.com`
    pub fn api_url(&self) -> String {
        format!("https://api.{}", self.domain)
    }

    /// Amazon sign-in endpoint: `https://www.amazon.com/ap/signin`
    pub fn amazon_signin_url(&self) -> String {
        format!("https://www.{}/ap/signin", self.amazon_domain)
    }

    pub fn assoc_handle(&self) -> String {
        format!("amzn_audible_{}", self.country_code)
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::us()
    }
}

impl FromStr for Locale {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_code(s).ok_or_else(|| {
            let known: Vec<String> = Self::all().into_iter().map(|l| l.country_code).collect();
            ConverterError::InvalidInput(format!(
                "Unknown locale '{}'. Supported: {}",
                s,
                known.join(", ")
            ))
        })
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.country_code)
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Username and password for an Audible/Amazon account
///
/// The password never appears in `Debug` output.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build from optional parts; `None` unless both are non-blank
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username.map(str::trim), password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Self::new(u, p)),
            _ => None,
        }
    }

    /// Amazon accounts sign in with an email; Audible-only accounts don't
    pub fn is_email(&self) -> bool {
        self.username.contains('@')
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// SIGN-IN URL
// ============================================================================

/// Derive the player id sent in the auth-token callback
///
/// # Errors
/// `InvalidInput` if `custom_hex` is not valid hexadecimal
pub fn player_id(custom_hex: Option<&str>) -> Result<String> {
    match custom_hex.map(str::trim).filter(|s| !s.is_empty()) {
        Some(hex_id) => {
            let raw = hex::decode(hex_id)
                .map_err(|e| ConverterError::InvalidInput(format!("Player id must be hexadecimal: {}", e)))?;
            Ok(BASE64.encode(raw))
        }
        None => Ok(BASE64.encode(Sha1::digest(b""))),
    }
}

/// `player-auth-token` callback the login redirects to
pub fn player_auth_token_url(locale: &Locale, player_id: &str) -> String {
    format!(
        "{}player-auth-token?playerType=software&playerId={}&bp_ua=y&playerModel=Desktop&playerManufacturer=Audible",
        locale.base_url(),
        player_id
    )
}

/// Full OpenID sign-in URL
///
/// Email usernames go through the regional Amazon sign-in, anything else
/// through Audible's own sign-in page.
pub fn login_url(locale: &Locale, username: &str, player_id: &str) -> Result<String> {
    let base = locale.base_url();
    let mut url = if username.contains('@') {
        Url::parse(&locale.amazon_signin_url())
    } else {
        Url::parse_with_params(
            &format!("{}sign-in/ref=ap_to_private", base),
            &[("forcePrivateSignIn", "true"), ("rdPath", base.as_str())],
        )
    }
    .map_err(|e| ConverterError::InvalidInput(format!("Bad sign-in URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("openid.ns", OPENID_NS)
        .append_pair("openid.identity", OPENID_IDENTIFIER_SELECT)
        .append_pair("openid.claimed_id", OPENID_IDENTIFIER_SELECT)
        .append_pair("openid.mode", "logout")
        .append_pair("openid.assoc_handle", &locale.assoc_handle())
        .append_pair("openid.return_to", &player_auth_token_url(locale, player_id));

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_lookup() {
        assert_eq!(Locale::from_code("UK").unwrap().domain, "audible.co.uk");
        assert_eq!("in".parse::<Locale>().unwrap().amazon_domain, "amazon.in");
        assert!("xx".parse::<Locale>().is_err());
        assert_eq!(Locale::all().len(), 10);
    }

    #[test]
    fn test_locale_urls() {
        let locale = Locale::de();
        assert_eq!(locale.base_url(), "https://www.audible.de/");
        assert_eq!(locale.api_url(), "https://api.audible.de");
        assert_eq!(locale.amazon_signin_url(), "https://www.amazon.de/ap/signin");
        assert_eq!(locale.assoc_handle(), "amzn_audible_de");
    }

    #[test]
    fn test_default_player_id_is_sha1_of_empty() {
        assert_eq!(player_id(None).unwrap(), "2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
        assert_eq!(player_id(Some("  ")).unwrap(), "2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
    }

    #[test]
    fn test_custom_player_id() {
        assert_eq!(player_id(Some("deadbeef")).unwrap(), "3q2+7w==");
        assert!(player_id(Some("not-hex")).is_err());
    }

    #[test]
    fn test_login_url_email_uses_amazon() {
        let url = login_url(&Locale::uk(), "reader@example.com", "abc").unwrap();
        assert!(url.starts_with("https://www.amazon.co.uk/ap/signin?"));
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("openid.mode".into(), "logout".into())));
        assert!(pairs.contains(&("openid.assoc_handle".into(), "amzn_audible_uk".into())));
        let return_to = pairs.iter().find(|(k, _)| k == "openid.return_to").unwrap();
        assert!(return_to.1.starts_with("https://www.audible.co.uk/player-auth-token?"));
        assert!(return_to.1.contains("playerId=abc"));
    }

    #[test]
    fn test_login_url_username_uses_audible() {
        let url = login_url(&Locale::us(), "reader", "abc").unwrap();
        assert!(url.starts_with("https://www.audible.com/sign-in/ref=ap_to_private?forcePrivateSignIn=true"));
        assert!(url.contains("openid.assoc_handle=amzn_audible_us"));
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::new("reader@example.com", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("reader@example.com"));
        assert!(!shown.contains("hunter2"));
        assert!(creds.is_email());
    }

    #[test]
    fn test_credentials_from_parts() {
        assert!(Credentials::from_parts(Some("a"), Some("b")).is_some());
        assert!(Credentials::from_parts(Some(" "), Some("b")).is_none());
        assert!(Credentials::from_parts(Some("a"), None).is_none());
        assert!(Credentials::from_parts(None, None).is_none());
    }
}
