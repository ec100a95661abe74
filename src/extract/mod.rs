//! Candidate discovery on a loaded results page.
//!
//! Each [`ExtractionStrategy`] is an independent technique. The
//! [`StrategySet`] runs all of them in priority order under their own
//! timeout and concatenates whatever they find; a failing strategy is logged
//! and skipped so the others still contribute.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::Page;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::HarvestError;
use crate::models::{ImageCandidate, StrategyKind};

mod click_through;
mod embedded;
mod page_content;
mod scroll;
mod thumbnail;
pub mod urls;

pub use click_through::ClickThroughStrategy;
pub use embedded::EmbeddedDataStrategy;
pub use page_content::PageContentStrategy;
pub use scroll::ScrollPaginationStrategy;
pub use thumbnail::ThumbnailStrategy;

/// A technique for finding image URLs on a loaded page.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Produce zero or more candidates from the page.
    ///
    /// # Errors
    ///
    /// Any error is treated as a non-fatal failure of this strategy alone.
    async fn extract(&self, page: &Page<'_>) -> Result<Vec<ImageCandidate>>;
}

/// Ordered collection of strategies sharing a per-strategy timeout.
pub struct StrategySet {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    timeout: Duration,
}

impl StrategySet {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            timeout,
        }
    }

    /// Every built-in strategy, configured from `config`.
    #[must_use]
    pub fn standard(config: &Config) -> Self {
        let mut set = Self::new(config.strategy_timeout);
        set.register(Box::new(ClickThroughStrategy::new(
            config.click_through_limit,
            config.settle_delay,
        )));
        set.register(Box::new(ThumbnailStrategy));
        set.register(Box::new(ScrollPaginationStrategy::new(
            config.scroll_rounds,
            config.settle_delay,
        )));
        set.register(Box::new(PageContentStrategy));
        set.register(Box::new(EmbeddedDataStrategy));
        set
    }

    /// Add a strategy, keeping the set sorted by priority.
    pub fn register(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.kind().priority());
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Run every strategy and concatenate their output in priority order.
    pub async fn extract_all(&self, page: &Page<'_>, ctx: &RunContext) -> Vec<ImageCandidate> {
        let mut candidates = Vec::new();

        for strategy in &self.strategies {
            if ctx.is_cancelled() {
                debug!("Run cancelled, skipping remaining strategies");
                break;
            }

            let kind = strategy.kind();
            let result = match tokio::time::timeout(self.timeout, strategy.extract(page)).await {
                Ok(Ok(found)) => Ok(found),
                Ok(Err(e)) => Err(HarvestError::ExtractionStrategy {
                    strategy: kind.to_string(),
                    message: format!("{e:#}"),
                }),
                Err(_) => Err(HarvestError::ExtractionStrategy {
                    strategy: kind.to_string(),
                    message: format!("timed out after {}s", self.timeout.as_secs()),
                }),
            };

            match result {
                Ok(found) => {
                    info!(strategy = %kind, count = found.len(), "Strategy finished");
                    candidates.extend(found);
                }
                Err(e) => warn!("{e}"),
            }
        }

        candidates
    }
}
