//! Per-entity browser session lifecycle.
//!
//! A [`SessionManager`] owns at most one live browser at a time. It walks the
//! states `Closed → Launching → Ready → Navigating → Extracting → Closing →
//! Closed`; a navigation error that is not a timeout moves it to `Crashed`,
//! after which the browser is discarded and relaunched. [`SessionManager::close`]
//! is idempotent and never fails, so callers can run it on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{BrowserLauncher, BrowserSession, Page};
use crate::context::RunContext;
use crate::error::HarvestError;
use crate::models::SessionConfig;
use crate::retry::RetryPolicy;

/// Polls for the first `<img>` while waiting for results to render.
const IMG_PRESENT_SCRIPT: &str = "document.querySelector('img') !== null";
const IMG_POLL_INTERVAL: Duration = Duration::from_millis(250);

const SCROLL_SCRIPTS: &[&str] = &[
    "window.scrollTo(0, document.body.scrollHeight / 2)",
    "window.scrollTo(0, document.body.scrollHeight)",
    "window.scrollTo(0, 0)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Launching,
    Ready,
    Navigating,
    Extracting,
    Closing,
    Crashed,
}

/// Knobs for launch/navigation retries.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub launch_policy: RetryPolicy,
    /// Loads attempted per navigation, including reloads after timeouts.
    pub navigation_attempts: u32,
    /// Pause after load and between settle scrolls.
    pub settle_delay: Duration,
}

/// Build the results-page URL for an entity name.
#[must_use]
pub fn search_url(template: &str, query: &str) -> String {
    template.replace("{query}", &urlencoding::encode(query))
}

pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    config: SessionConfig,
    options: SessionOptions,
    ctx: RunContext,
    session: Option<Box<dyn BrowserSession>>,
    state: SessionState,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        config: SessionConfig,
        options: SessionOptions,
        ctx: RunContext,
    ) -> Self {
        Self {
            launcher,
            config,
            options,
            ctx,
            session: None,
            state: SessionState::Closed,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Launch the browser, retrying per the launch policy.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::SessionLaunch`] once every attempt has failed,
    /// or [`HarvestError::Cancelled`] if the run was stopped.
    pub async fn open(&mut self) -> Result<(), HarvestError> {
        if self.session.is_some() {
            return Ok(());
        }
        if self.ctx.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        self.state = SessionState::Launching;
        let launcher = Arc::clone(&self.launcher);
        let config = self.config.clone();
        let launch_timeout = self.config.page_timeout;

        let outcome = self
            .options
            .launch_policy
            .run(
                self.ctx.cancel_token(),
                |attempt| {
                    let launcher = Arc::clone(&launcher);
                    let config = config.clone();
                    async move {
                        debug!(attempt, engine = config.engine.as_str(), "Launching browser");
                        match tokio::time::timeout(launch_timeout, launcher.launch(&config)).await
                        {
                            Ok(result) => result,
                            Err(_) => Err(anyhow::anyhow!(
                                "browser launch timed out after {}s",
                                launch_timeout.as_secs()
                            )),
                        }
                    }
                },
                |_| true,
            )
            .await;

        match outcome.result {
            Ok(session) => {
                self.session = Some(session);
                self.ctx.stats().session_opened();
                self.state = SessionState::Ready;
                info!(attempts = outcome.attempts, "Browser session ready");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                if self.ctx.is_cancelled() {
                    return Err(HarvestError::Cancelled);
                }
                Err(HarvestError::SessionLaunch {
                    attempts: outcome.attempts,
                    message: format!("{e:#}"),
                })
            }
        }
    }

    /// Load `url`, reloading after timeouts and relaunching after crashes,
    /// then let lazy content settle.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::NavigationTimeout`] when every attempt timed
    /// out, [`HarvestError::Navigation`] when the last attempt failed
    /// otherwise, or a launch error if a relaunch failed.
    pub async fn navigate(&mut self, url: &str) -> Result<Page<'_>, HarvestError> {
        let max_attempts = self.options.navigation_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.ctx.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            if self.session.is_none() {
                self.open().await?;
            }
            let Some(session) = self.session.as_mut() else {
                return Err(HarvestError::Cancelled);
            };

            self.state = SessionState::Navigating;
            debug!(url = %url, attempt, "Navigating");

            match tokio::time::timeout(self.config.page_timeout, session.navigate(url)).await {
                Ok(Ok(())) => {
                    last_error = None;
                    break;
                }
                Ok(Err(e)) => {
                    warn!(url = %url, attempt, error = %format!("{e:#}"), "Browser crashed during navigation");
                    self.state = SessionState::Crashed;
                    self.discard_session().await;
                    last_error = Some(HarvestError::Navigation {
                        url: url.to_string(),
                        message: format!("{e:#}"),
                    });
                }
                Err(_) => {
                    warn!(
                        url = %url,
                        attempt,
                        timeout_secs = self.config.page_timeout.as_secs(),
                        "Page load timed out"
                    );
                    last_error = Some(HarvestError::NavigationTimeout {
                        url: url.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }

        if let Some(e) = last_error {
            return Err(e);
        }

        let Some(session) = self.session.as_deref() else {
            return Err(HarvestError::Cancelled);
        };
        settle(session, self.config.page_timeout, self.options.settle_delay).await;
        self.state = SessionState::Extracting;
        Ok(Page::new(session, url))
    }

    /// Close the browser if one is open. Safe to call in any state.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.state = SessionState::Closing;
            match tokio::time::timeout(self.config.page_timeout, session.close()).await {
                Ok(Ok(())) => debug!("Browser session closed"),
                Ok(Err(e)) => warn!("Error while closing browser: {e:#}"),
                Err(_) => warn!("Timed out closing browser; dropping it"),
            }
            self.ctx.stats().session_closed();
        }
        self.state = SessionState::Closed;
    }

    /// Tear down a crashed browser so the next attempt relaunches.
    async fn discard_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = tokio::time::timeout(self.config.page_timeout, session.close()).await;
            self.ctx.stats().session_closed();
        }
    }
}

/// Wait for results to appear, then scroll so lazily loaded images render.
///
/// Best effort: a page without images or a failing script is logged and
/// extraction proceeds on whatever loaded.
async fn settle(session: &dyn BrowserSession, timeout: Duration, delay: Duration) {
    let wait_for_img = async {
        loop {
            match session.evaluate(IMG_PRESENT_SCRIPT).await {
                Ok(serde_json::Value::Bool(true)) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Image presence check failed: {e:#}");
                    return;
                }
            }
            tokio::time::sleep(IMG_POLL_INTERVAL).await;
        }
    };

    if tokio::time::timeout(timeout, wait_for_img).await.is_err() {
        warn!("Timeout waiting for images to appear");
    }

    tokio::time::sleep(delay).await;
    for script in SCROLL_SCRIPTS {
        if let Err(e) = session.evaluate(script).await {
            debug!("Settle scroll failed: {e:#}");
            break;
        }
        tokio::time::sleep(delay / 2).await;
    }
}
