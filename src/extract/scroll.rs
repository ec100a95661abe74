use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::thumbnail::thumbnails_from_markup;
use super::ExtractionStrategy;
use crate::browser::Page;
use crate::models::{ImageCandidate, StrategyKind};

/// Scrolls to the bottom, presses "show more" if present, and reports the
/// new document height so the loop can stop once nothing else loads.
const SCROLL_SCRIPT: &str = "(() => { \
    window.scrollTo(0, document.body.scrollHeight); \
    const more = document.querySelector('input.mye4qd, .mye4qd, [jsname=\"oHxHid\"]'); \
    if (more && more.offsetParent !== null) more.click(); \
    return document.body.scrollHeight; \
})()";

/// Loads further result pages by scrolling, then re-scrapes the grid.
#[derive(Debug, Clone, Copy)]
pub struct ScrollPaginationStrategy {
    rounds: usize,
    delay: Duration,
}

impl ScrollPaginationStrategy {
    #[must_use]
    pub fn new(rounds: usize, delay: Duration) -> Self {
        Self { rounds, delay }
    }
}

#[async_trait]
impl ExtractionStrategy for ScrollPaginationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ScrollPagination
    }

    async fn extract(&self, page: &Page<'_>) -> Result<Vec<ImageCandidate>> {
        let mut last_height = None;

        for round in 1..=self.rounds {
            let height = page
                .evaluate(SCROLL_SCRIPT)
                .await
                .with_context(|| format!("Scroll round {round} failed"))?
                .as_u64();
            tokio::time::sleep(self.delay).await;

            if height.is_some() && height == last_height {
                debug!(round, "Page stopped growing");
                break;
            }
            last_height = height;
        }

        let markup = page.markup().await?;
        Ok(thumbnails_from_markup(&markup, page.url(), self.kind()))
    }
}
