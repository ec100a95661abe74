use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};

use super::urls::{build_candidate, fetchable_source, parse_dimension};
use super::ExtractionStrategy;
use crate::browser::Page;
use crate::models::{ImageCandidate, StrategyKind};

static IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid img selector"));

/// Catch-all: every `<img>` on the page with a fetchable source.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageContentStrategy;

#[async_trait]
impl ExtractionStrategy for PageContentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PageContent
    }

    async fn extract(&self, page: &Page<'_>) -> Result<Vec<ImageCandidate>> {
        let markup = page.markup().await?;
        Ok(images_from_markup(&markup, page.url()))
    }
}

fn images_from_markup(markup: &str, page_url: &str) -> Vec<ImageCandidate> {
    let document = Html::parse_document(markup);
    document
        .select(&IMAGES)
        .filter_map(|element| {
            let attrs = element.value();
            let src = fetchable_source(|name| attrs.attr(name))?;
            build_candidate(
                src,
                page_url,
                parse_dimension(attrs.attr("width")),
                parse_dimension(attrs.attr("height")),
                StrategyKind::PageContent,
            )
        })
        .collect()
}
