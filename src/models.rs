//! Plain data types that flow through the harvesting pipeline.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// One named subject (a country) to collect images for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
}

impl EntityRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Which automation backend drives the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    /// Launch a local Chromium/Chrome process over the DevTools protocol.
    #[default]
    Chromium,
    /// Attach to an already running Chromium through its DevTools websocket.
    Remote,
}

impl BrowserEngine {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Remote => "remote",
        }
    }
}

/// Browser settings shared by every session in a run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub engine: BrowserEngine,
    pub headless: bool,
    pub page_timeout: Duration,
    /// Chrome executable override (auto-detected when `None`).
    pub chrome_path: Option<PathBuf>,
    /// DevTools websocket URL, required for [`BrowserEngine::Remote`].
    pub ws_url: Option<String>,
}

/// Extraction technique that produced a candidate.
///
/// Declaration order is priority order: earlier variants are higher fidelity
/// and run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ClickThrough,
    Thumbnail,
    ScrollPagination,
    PageContent,
    EmbeddedData,
}

impl StrategyKind {
    #[must_use]
    pub fn priority(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClickThrough => "click_through",
            Self::Thumbnail => "thumbnail",
            Self::ScrollPagination => "scroll_pagination",
            Self::PageContent => "page_content",
            Self::EmbeddedData => "embedded_data",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image URL discovered on a results page, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub source_page_url: String,
    pub declared_width: Option<u32>,
    pub declared_height: Option<u32>,
    /// Lowercase format name (`jpeg`, `png`, ...) when it can be inferred.
    pub format: Option<String>,
    pub strategy: StrategyKind,
}

impl ImageCandidate {
    /// Declared pixel area, if both dimensions are known.
    #[must_use]
    pub fn declared_area(&self) -> Option<u64> {
        match (self.declared_width, self.declared_height) {
            (Some(w), Some(h)) => Some(u64::from(w) * u64::from(h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Success,
    Skipped,
    Failed,
}

/// Outcome of fetching a single candidate.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub candidate: ImageCandidate,
    pub local_path: Option<PathBuf>,
    pub byte_size: u64,
    pub status: DownloadStatus,
    pub error: Option<ErrorKind>,
    /// Number of HTTP attempts made, including the first.
    pub attempts: u32,
}

impl DownloadResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}

/// Per-entity summary produced by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct EntityOutcome {
    pub entry: EntityRecord,
    pub attempted: usize,
    pub succeeded: usize,
    pub archive_path: Option<PathBuf>,
}

impl EntityOutcome {
    /// Outcome for an entity that failed before any download was attempted.
    #[must_use]
    pub fn failed(entry: EntityRecord) -> Self {
        Self {
            entry,
            attempted: 0,
            succeeded: 0,
            archive_path: None,
        }
    }
}
