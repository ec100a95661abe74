//! Chromium backend over the DevTools protocol.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, BrowserSession};
use crate::constants::BROWSER_USER_AGENT;
use crate::models::{BrowserEngine, SessionConfig};

/// Window size the results page is rendered at.
pub const VIEWPORT_WIDTH: u32 = 1920;
pub const VIEWPORT_HEIGHT: u32 = 1080;

/// Launches a local Chromium or attaches to a remote one, depending on the
/// engine in the [`SessionConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher {
    engine: BrowserEngine,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(engine: BrowserEngine) -> Self {
        Self { engine }
    }
}

fn build_browser_config(config: &SessionConfig) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .request_timeout(config.page_timeout)
        .no_sandbox()
        .disable_default_args()
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-notifications")
        .arg("--disable-infobars")
        .arg("--disable-extensions")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .arg(format!("--user-agent={BROWSER_USER_AGENT}"));

    builder = if config.headless {
        builder.arg("--headless=new")
    } else {
        builder.with_head()
    };

    if let Some(ref chrome_path) = config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    fn engine(&self) -> BrowserEngine {
        self.engine
    }

    async fn launch(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>> {
        let (mut browser, mut handler) = match config.engine {
            BrowserEngine::Chromium => {
                info!(headless = config.headless, "Launching Chromium");
                Browser::launch(build_browser_config(config)?)
                    .await
                    .context("Failed to launch browser")?
            }
            BrowserEngine::Remote => {
                let ws_url = config
                    .ws_url
                    .as_deref()
                    .context("Remote engine selected without a DevTools websocket URL")?;
                info!(ws_url = %ws_url, "Connecting to remote Chromium");
                Browser::connect(ws_url)
                    .await
                    .context("Failed to connect to remote browser")?
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = match open_tab(&browser).await {
            Ok(page) => page,
            Err(e) => {
                if config.engine == BrowserEngine::Chromium {
                    let _ = browser.close().await;
                }
                handler_task.abort();
                return Err(e);
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            owns_process: config.engine == BrowserEngine::Chromium,
            closed: false,
        }))
    }
}

async fn open_tab(browser: &Browser) -> Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .context("Failed to create new page")?;
    page.execute(SetUserAgentOverrideParams::new(BROWSER_USER_AGENT.to_string()))
        .await
        .context("Failed to set user agent")?;
    Ok(page)
}

/// A running Chromium with one tab.
struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    /// Whether closing the session should terminate the browser process.
    owns_process: bool,
    closed: bool,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn markup(&self) -> Result<String> {
        self.page.content().await.context("Failed to read page content")
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .context("Script evaluation failed")?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.page.clone().close().await {
            debug!("Failed to close page: {e}");
        }

        let result = if self.owns_process {
            match self.browser.close().await {
                Ok(_) => {
                    if let Err(e) = self.browser.wait().await {
                        warn!("Failed waiting for browser exit: {e}");
                    }
                    info!("Browser shutdown complete");
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!("Failed to close browser: {e}")),
            }
        } else {
            debug!("Detaching from remote browser");
            Ok(())
        };

        self.handler_task.abort();
        result
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // Dropping `Browser` kills a process we launched; only the handler
        // task needs stopping here.
        self.handler_task.abort();
    }
}
