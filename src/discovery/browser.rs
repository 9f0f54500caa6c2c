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


//! Browser automation strategy
//!
//! Logs in through the player-auth-token OpenID flow in a real browser and
//! scrapes the resulting page for the key.
//!
//! # Flow
//! 1. Storefront with `?ipRedirectOverride=true`, then the sign-in URL
//! 2. Debug mode: wait for a human to log in (`nav-main` appears).
//!    Otherwise fill `ap_email` / `ap_password`, submit, let it settle and
//!    check for CAPTCHA, two-step and sign-in errors
//! 3. On the `player-auth-token` page, scan the source
//! 4. Failing that, load the library page and scan again
//!
//! # Teardown
//! The session is closed exactly once, after the flow returns, errors or
//! panics. The flow runs under `catch_unwind` so a panic can't skip it.

use super::{panic_message, DiscoveryContext, DiscoveryFailure, DiscoveryResult, FailureKind, KeyStrategy, Method};
use crate::api::auth::{login_url, player_id, Credentials};
use crate::crypto::activation::scan_page_source;
use crate::error::{ConverterError, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const EMAIL_FIELD: &str = "ap_email";
const PASSWORD_FIELD: &str = "ap_password";
const LOGGED_IN_MARKER: &str = "nav-main";

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserSession>>;
}

/// One open browser with a single tab
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn current_url(&mut self) -> Result<String>;
    async fn content(&mut self) -> Result<String>;
    /// Replace the value of the input with this id
    async fn fill(&mut self, element_id: &str, value: &str) -> Result<()>;
    /// Submit the form owning the element with this id
    async fn submit(&mut self, element_id: &str) -> Result<()>;
    async fn element_exists(&mut self, element_id: &str) -> Result<bool>;
    /// Shut the browser down; errors are logged, not returned
    async fn close(self: Box<Self>);
}

/// Waits used by the flow
#[derive(Debug, Clone, Copy)]
pub struct BrowserTimings {
    /// How long the sign-in form may take to appear
    pub form_timeout: Duration,
    /// Pause after submitting credentials
    pub settle: Duration,
    /// Pause after loading the library page
    pub library_settle: Duration,
    /// Debug mode: how long a human gets to log in
    pub manual_login_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BrowserTimings {
    fn default() -> Self {
        Self {
            form_timeout: Duration::from_secs(10),
            settle: Duration::from_secs(5),
            library_settle: Duration::from_secs(3),
            manual_login_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct BrowserStrategy {
    launcher: Arc<dyn BrowserLauncher>,
    timings: BrowserTimings,
}

impl BrowserStrategy {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            timings: BrowserTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: BrowserTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Poll for `element_id` until it exists or `limit` passes
    async fn wait_for(&self, session: &mut dyn BrowserSession, element_id: &str, limit: Duration) -> Result<bool> {
        let deadline = Instant::now() + limit;
        loop {
            if session.element_exists(element_id).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        ctx: &DiscoveryContext,
        credentials: &Credentials,
        url: &str,
    ) -> Result<DiscoveryResult> {
        let base = ctx.locale.base_url();

        info!("navigating to Audible");
        session.navigate(&format!("{}?ipRedirectOverride=true", base)).await?;
        info!("navigating to login page");
        session.navigate(url).await?;

        if ctx.debug {
            info!(
                timeout_secs = self.timings.manual_login_timeout.as_secs(),
                "debug mode: waiting for manual login in the browser window"
            );
            if !self
                .wait_for(session, LOGGED_IN_MARKER, self.timings.manual_login_timeout)
                .await?
            {
                return Ok(DiscoveryResult::failure(
                    FailureKind::Timeout,
                    "Timed out waiting for manual login",
                ));
            }
            info!("manual login detected");
        } else {
            if !self.wait_for(session, EMAIL_FIELD, self.timings.form_timeout).await? {
                return Ok(DiscoveryResult::Failure(
                    DiscoveryFailure::new(FailureKind::Error, "Login automation failed: sign-in form did not load")
                        .with_hint("You may need to use debug mode for manual login"),
                ));
            }
            session.fill(EMAIL_FIELD, &credentials.username).await?;
            session.fill(PASSWORD_FIELD, &credentials.password).await?;
            session.submit(PASSWORD_FIELD).await?;
            debug!("login submitted, waiting for response");
            tokio::time::sleep(self.timings.settle).await;

            let current = session.current_url().await?;
            let page = session.content().await?;
            if let Some(failure) = classify_login_page(&current, &page) {
                warn!(kind = ?failure.kind, "login did not go through");
                return Ok(DiscoveryResult::Failure(failure));
            }
        }

        let current = session.current_url().await?;
        if is_auth_token_page(&current) {
            info!("found player auth token page");
            if let Some(found) = scan(&session.content().await?) {
                return Ok(found);
            }
        }

        info!("trying the library page");
        session.navigate(&format!("{}library", base)).await?;
        tokio::time::sleep(self.timings.library_settle).await;
        if let Some(found) = scan(&session.content().await?) {
            return Ok(found);
        }

        Ok(DiscoveryResult::failure(
            FailureKind::NoCandidate,
            "Could not extract activation bytes. The page structure may have changed or your account may not have the required permissions.",
        ))
    }
}

/// Challenge and error indicators after submitting the login form
pub fn classify_login_page(current_url: &str, page_source: &str) -> Option<DiscoveryFailure> {
    let page = page_source.to_lowercase();
    if page.contains("captcha") || page.contains("robot") {
        return Some(
            DiscoveryFailure::new(FailureKind::Challenge, "CAPTCHA detected")
                .with_hint("Please try again later or use debug mode"),
        );
    }
    if ["two-step", "2fa", "verification"].iter().any(|m| page.contains(m)) {
        return Some(
            DiscoveryFailure::new(FailureKind::Challenge, "Two-factor authentication detected")
                .with_hint("Please use debug mode for manual verification"),
        );
    }
    let on_sign_in = current_url.contains("sign-in") || current_url.contains("signin");
    if on_sign_in && page.contains("error") {
        return Some(DiscoveryFailure::new(
            FailureKind::Authentication,
            "Login failed. Please check your credentials.",
        ));
    }
    None
}

/// The callback page itself, not a sign-in URL that merely mentions it
fn is_auth_token_page(current_url: &str) -> bool {
    url::Url::parse(current_url)
        .map(|u| u.path().contains("player-auth-token"))
        .unwrap_or(false)
}

/// Structured field wins; a loose quoted token is only a guess
fn scan(page_source: &str) -> Option<DiscoveryResult> {
    scan_page_source(page_source).map(|(key, structured)| {
        if structured {
            info!(key = %key, "found activation bytes");
            DiscoveryResult::success(key)
        } else {
            info!(key = %key, "found potential activation bytes");
            DiscoveryResult::unverified(key, "loose 8-hex match on page")
        }
    })
}

#[async_trait]
impl KeyStrategy for BrowserStrategy {
    fn method(&self) -> Method {
        Method::Browser
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

        let player = match player_id(ctx.player_id.as_deref()) {
            Ok(player) => player,
            Err(e) => return Ok(DiscoveryResult::failure(FailureKind::InvalidFormat, e.to_string())),
        };
        let url = login_url(&ctx.locale, &credentials.username, &player)?;
        info!(locale = %ctx.locale.country_code, player_id = %player, debug = ctx.debug, "starting browser login");

        let mut session = match self.launcher.launch(!ctx.debug).await {
            Ok(session) => session,
            Err(e) => {
                warn!("browser could not start: {}", e);
                return Ok(DiscoveryResult::Failure(
                    DiscoveryFailure::new(FailureKind::Unavailable, format!("Failed to start browser: {}", e))
                        .with_hint("Install Google Chrome or Chromium"),
                ));
            }
        };

        let outcome = AssertUnwindSafe(self.drive(session.as_mut(), ctx, credentials, &url))
            .catch_unwind()
            .await;
        session.close().await;

        Ok(match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("browser extraction failed: {}", e);
                DiscoveryResult::Failure(DiscoveryFailure::new(
                    DiscoveryFailure::from_error(&e).kind,
                    format!("Extraction failed: {}", e),
                ))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("browser automation panicked: {}", message);
                DiscoveryResult::failure(FailureKind::Error, format!("Browser automation crashed: {}", message))
            }
        })
    }
}

// ============================================================================
// CHROME
// ============================================================================

/// Launcher for the build: Chrome when the `browser` feature is on
pub fn default_launcher() -> Arc<dyn BrowserLauncher> {
    #[cfg(feature = "browser")]
    {
        Arc::new(chrome::ChromeLauncher)
    }
    #[cfg(not(feature = "browser"))]
    {
        Arc::new(DisabledLauncher)
    }
}

#[cfg(not(feature = "browser"))]
struct DisabledLauncher;

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserLauncher for DisabledLauncher {
    async fn launch(&self, _headless: bool) -> Result<Box<dyn BrowserSession>> {
        Err(ConverterError::tool_unavailable(
            "browser",
            "built without the `browser` feature",
        ))
    }
}

#[cfg(feature = "browser")]
pub mod chrome {
    //! Chrome/Chromium over the DevTools protocol

    use super::{BrowserLauncher, BrowserSession};
    use crate::api::client::USER_AGENT;
    use crate::error::{ConverterError, Result};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::Page;
    use futures_util::StreamExt;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    fn cdp(e: impl std::fmt::Display) -> ConverterError {
        ConverterError::Browser(e.to_string())
    }

    fn js_string(value: &str) -> String {
        serde_json::Value::String(value.to_string()).to_string()
    }

    pub struct ChromeLauncher;

    pub struct ChromeSession {
        browser: Browser,
        page: Page,
        events: JoinHandle<()>,
    }

    #[async_trait]
    impl BrowserLauncher for ChromeLauncher {
        async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserSession>> {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .window_size(1920, 1080)
                .arg(format!("--user-agent={}", USER_AGENT))
                .arg("--disable-dev-shm-usage")
                .arg("--disable-gpu");
            if !headless {
                builder = builder.with_head();
            }
            let config = builder
                .build()
                .map_err(|e| ConverterError::tool_unavailable("chrome", e))?;

            let (mut browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| ConverterError::tool_unavailable("chrome", e.to_string()))?;
            let events = tokio::spawn(async move { while handler.next().await.is_some() {} });

            match browser.new_page("about:blank").await {
                Ok(page) => Ok(Box::new(ChromeSession { browser, page, events })),
                Err(e) => {
                    let _ = browser.close().await;
                    events.abort();
                    Err(cdp(e))
                }
            }
        }
    }

    #[async_trait]
    impl BrowserSession for ChromeSession {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            self.page.goto(url).await.map_err(cdp)?;
            Ok(())
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok(self.page.url().await.map_err(cdp)?.unwrap_or_default())
        }

        async fn content(&mut self) -> Result<String> {
            self.page.content().await.map_err(cdp)
        }

        async fn fill(&mut self, element_id: &str, value: &str) -> Result<()> {
            self.page
                .evaluate(format!("document.getElementById({}).value = ''", js_string(element_id)))
                .await
                .map_err(cdp)?;
            let element = self
                .page
                .find_element(format!("#{}", element_id))
                .await
                .map_err(cdp)?;
            element.click().await.map_err(cdp)?;
            element.type_str(value).await.map_err(cdp)?;
            Ok(())
        }

        async fn submit(&mut self, element_id: &str) -> Result<()> {
            // Call the prototype method; the form may have a field named "submit"
            let script = format!(
                "HTMLFormElement.prototype.submit.call(document.getElementById({}).form)",
                js_string(element_id)
            );
            self.page.evaluate(script).await.map_err(cdp)?;
            Ok(())
        }

        async fn element_exists(&mut self, element_id: &str) -> Result<bool> {
            Ok(self.page.find_element(format!("#{}", element_id)).await.is_ok())
        }

        async fn close(self: Box<Self>) {
            let mut this = *self;
            if let Err(e) = this.browser.close().await {
                warn!("failed to close browser: {}", e);
            }
            if let Err(e) = this.browser.wait().await {
                warn!("failed to reap browser process: {}", e);
            }
            this.events.abort();
            debug!("browser closed");
        }
    }
}
