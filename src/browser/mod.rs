//! Browser automation capability used by the session manager and the
//! extraction strategies.
//!
//! Nothing outside [`chromium`] knows which automation engine is in use:
//! the rest of the crate talks to a [`BrowserLauncher`] and the
//! [`BrowserSession`] it hands out.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{BrowserEngine, SessionConfig};

pub mod chromium;

pub use chromium::ChromiumLauncher;

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Engine this launcher drives.
    fn engine(&self) -> BrowserEngine;

    /// Start a browser and return a session with one blank tab.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser process cannot be started or reached.
    async fn launch(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>>;
}

/// One running browser with a single tab.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in the tab and wait for the load to finish.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Serialized DOM of the current document.
    async fn markup(&self) -> Result<String>;

    /// Evaluate a JavaScript expression, awaiting it if it returns a promise.
    ///
    /// Returns `Value::Null` for `undefined` results.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Shut the browser down. Must be safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// A results page that finished loading, as seen by extraction strategies.
pub struct Page<'a> {
    session: &'a dyn BrowserSession,
    url: String,
}

impl std::fmt::Debug for Page<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl<'a> Page<'a> {
    #[must_use]
    pub fn new(session: &'a dyn BrowserSession, url: impl Into<String>) -> Self {
        Self {
            session,
            url: url.into(),
        }
    }

    /// URL the page was loaded from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// # Errors
    ///
    /// Returns an error if the browser cannot serialize the document.
    pub async fn markup(&self) -> Result<String> {
        self.session.markup().await
    }

    /// # Errors
    ///
    /// Returns an error if script evaluation fails.
    pub async fn evaluate(&self, script: &str) -> Result<Value> {
        self.session.evaluate(script).await
    }
}
