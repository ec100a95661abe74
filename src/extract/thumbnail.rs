use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};

use super::urls::{build_candidate, fetchable_source, parse_dimension};
use super::ExtractionStrategy;
use crate::browser::Page;
use crate::models::{ImageCandidate, StrategyKind};

/// Result-grid thumbnails across the layouts the search page has shipped.
pub(crate) const THUMBNAIL_SELECTOR: &str = "img.rg_i, img.Q4LuWd, img.YQ4gaf";

static THUMBNAILS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(THUMBNAIL_SELECTOR).expect("valid thumbnail selector"));

/// Scrapes the thumbnails in the results grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThumbnailStrategy;

#[async_trait]
impl ExtractionStrategy for ThumbnailStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Thumbnail
    }

    async fn extract(&self, page: &Page<'_>) -> Result<Vec<ImageCandidate>> {
        let markup = page.markup().await?;
        Ok(thumbnails_from_markup(&markup, page.url(), self.kind()))
    }
}

/// Collect grid thumbnails from serialized page markup.
pub(crate) fn thumbnails_from_markup(
    markup: &str,
    page_url: &str,
    strategy: StrategyKind,
) -> Vec<ImageCandidate> {
    let document = Html::parse_document(markup);
    let mut candidates = Vec::new();

    for element in document.select(&THUMBNAILS) {
        let attrs = element.value();
        let Some(src) = fetchable_source(|name| attrs.attr(name)) else {
            continue;
        };

        if let Some(candidate) = build_candidate(
            src,
            page_url,
            parse_dimension(attrs.attr("width")),
            parse_dimension(attrs.attr("height")),
            strategy,
        ) {
            candidates.push(candidate);
        }
    }

    candidates
}
