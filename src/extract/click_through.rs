use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::thumbnail::THUMBNAIL_SELECTOR;
use super::urls::build_candidate;
use super::ExtractionStrategy;
use crate::browser::Page;
use crate::models::{ImageCandidate, StrategyKind};

/// Full-size image elements in the preview panel opened by a thumbnail click.
const PREVIEW_SELECTOR: &str = "img.r48jcc, img.n3VNCb, img.KAlRDb, img.sFlh5c, img.iPVvYb";

/// Sources in the preview panel that are placeholders, not the real image.
const PLACEHOLDER_MARKERS: &[&str] = &["data:image", "gstatic.com", "googleusercontent.com/gadgets"];

#[derive(Debug, Deserialize)]
struct PreviewImage {
    src: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Opens the first few results one by one and reads the full-size image from
/// the preview panel.
#[derive(Debug, Clone, Copy)]
pub struct ClickThroughStrategy {
    limit: usize,
    delay: Duration,
}

impl ClickThroughStrategy {
    #[must_use]
    pub fn new(limit: usize, delay: Duration) -> Self {
        Self { limit, delay }
    }
}

fn click_script(index: usize) -> String {
    format!(
        "(() => {{ \
            const thumbs = document.querySelectorAll({sel}); \
            const el = thumbs[{index}]; \
            if (!el) return false; \
            (el.closest('a, [role=button], [jsaction]') || el).click(); \
            return true; \
        }})()",
        sel = serde_json::to_string(THUMBNAIL_SELECTOR).unwrap_or_default(),
    )
}

fn preview_script() -> String {
    format!(
        "Array.from(document.querySelectorAll({sel})).map(img => ({{ \
            src: img.currentSrc || img.src || '', \
            width: img.naturalWidth || null, \
            height: img.naturalHeight || null \
        }}))",
        sel = serde_json::to_string(PREVIEW_SELECTOR).unwrap_or_default(),
    )
}

const CLOSE_PREVIEW_SCRIPT: &str = "(() => { \
    const btn = document.querySelector('[aria-label=\"Close\"], a.hm60ue'); \
    if (btn) btn.click(); \
    return true; \
})()";

fn is_placeholder(src: &str) -> bool {
    PLACEHOLDER_MARKERS.iter().any(|marker| src.contains(marker))
}

/// Turn the preview panel's images into candidates, dropping placeholders.
fn candidates_from_previews(
    previews: Vec<PreviewImage>,
    page_url: &str,
) -> Vec<ImageCandidate> {
    previews
        .into_iter()
        .filter(|p| !is_placeholder(&p.src))
        .filter_map(|p| {
            build_candidate(
                &p.src,
                page_url,
                p.width.filter(|w| *w > 0),
                p.height.filter(|h| *h > 0),
                StrategyKind::ClickThrough,
            )
        })
        .collect()
}

#[async_trait]
impl ExtractionStrategy for ClickThroughStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ClickThrough
    }

    async fn extract(&self, page: &Page<'_>) -> Result<Vec<ImageCandidate>> {
        let mut candidates = Vec::new();
        let preview = preview_script();

        for index in 0..self.limit {
            let clicked = page
                .evaluate(&click_script(index))
                .await
                .with_context(|| format!("Failed to click thumbnail {index}"))?;
            if clicked != serde_json::Value::Bool(true) {
                debug!(index, "No more thumbnails to open");
                break;
            }

            tokio::time::sleep(self.delay).await;

            let value = page
                .evaluate(&preview)
                .await
                .context("Failed to read preview panel")?;
            let previews: Vec<PreviewImage> = match value {
                serde_json::Value::Null => Vec::new(),
                other => serde_json::from_value(other).context("Unexpected preview payload")?,
            };
            candidates.extend(candidates_from_previews(previews, page.url()));

            if let Err(e) = page.evaluate(CLOSE_PREVIEW_SCRIPT).await {
                debug!("Failed to close preview: {e:#}");
            }
        }

        Ok(candidates)
    }
}
