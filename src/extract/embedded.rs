use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use super::urls::build_candidate;
use super::ExtractionStrategy;
use crate::browser::Page;
use crate::models::{ImageCandidate, StrategyKind};

static LD_JSON: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid ld+json selector")
});

/// Absolute image URLs embedded in inline script data.
static INLINE_IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'\\<>\[\]]+?\.(?:jpe?g|png|webp)(?:\?[^\s"'\\<>\[\]]*)?"#)
        .expect("valid inline image regex")
});

/// Structured-data keys that hold images.
const IMAGE_KEYS: &[&str] = &[
    "image",
    "images",
    "photo",
    "photos",
    "thumbnail",
    "thumbnailUrl",
    "contentUrl",
];

/// Pulls image URLs out of structured data and script payloads rather than
/// rendered elements.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedDataStrategy;

#[async_trait]
impl ExtractionStrategy for EmbeddedDataStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EmbeddedData
    }

    async fn extract(&self, page: &Page<'_>) -> Result<Vec<ImageCandidate>> {
        let markup = page.markup().await?;
        Ok(embedded_images(&markup, page.url()))
    }
}

fn embedded_images(markup: &str, page_url: &str) -> Vec<ImageCandidate> {
    let mut found = Vec::new();
    let document = Html::parse_document(markup);

    for script in document.select(&LD_JSON) {
        let text = script.text().collect::<String>();
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => collect_structured(&value, &mut found),
            Err(e) => tracing::debug!("Skipping malformed ld+json block: {e}"),
        }
    }

    let unescaped = markup.replace("\\u003d", "=").replace("\\u0026", "&");
    for m in INLINE_IMAGE_URL.find_iter(&unescaped) {
        found.push((m.as_str().to_string(), None, None));
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|(url, _, _)| seen.insert(url.clone()))
        .filter_map(|(url, width, height)| {
            build_candidate(&url, page_url, width, height, StrategyKind::EmbeddedData)
        })
        .collect()
}

type Found = (String, Option<u32>, Option<u32>);

/// Walk a JSON-LD value collecting image references under [`IMAGE_KEYS`].
fn collect_structured(value: &Value, out: &mut Vec<Found>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_structured(item, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                if IMAGE_KEYS.contains(&key.as_str()) {
                    collect_image_value(child, out);
                } else if child.is_object() || child.is_array() {
                    collect_structured(child, out);
                }
            }
        }
        _ => {}
    }
}

/// An image value is a URL string, an `ImageObject`, or a list of either.
fn collect_image_value(value: &Value, out: &mut Vec<Found>) {
    match value {
        Value::String(url) => out.push((url.clone(), None, None)),
        Value::Array(items) => {
            for item in items {
                collect_image_value(item, out);
            }
        }
        Value::Object(map) => {
            let url = map
                .get("contentUrl")
                .or_else(|| map.get("url"))
                .and_then(Value::as_str);
            if let Some(url) = url {
                out.push((url.to_string(), dimension(map.get("width")), dimension(map.get("height"))));
            }
            collect_structured(value, out);
        }
        _ => {}
    }
}

/// Schema.org dimensions are numbers, numeric strings, or `QuantitativeValue`s.
fn dimension(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => super::urls::parse_dimension(Some(s)),
        Value::Object(map) => dimension(map.get("value")),
        _ => None,
    }
    .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://search.example.com/";

    #[test]
    fn test_reads_image_objects_from_ld_json() {
        let html = r#"
            <script type="application/ld+json">
            {"@type": "Place", "name": "Peru",
             "image": {"@type": "ImageObject", "contentUrl": "https://img.example.org/machu.jpg",
                       "width": 1200, "height": "800"}}
            </script>
        "#;
        let found = embedded_images(html, PAGE);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://img.example.org/machu.jpg");
        assert_eq!(found[0].declared_width, Some(1200));
        assert_eq!(found[0].declared_height, Some(800));
        assert_eq!(found[0].strategy, StrategyKind::EmbeddedData);
    }

    #[test]
    fn test_reads_url_lists_and_nested_keys() {
        let html = r#"
            <script type="application/ld+json">
            [{"about": {"photos": ["https://img.example.org/a.png", "https://img.example.org/b.webp"]}},
             {"thumbnailUrl": "https://img.example.org/c.jpeg"}]
            </script>
        "#;
        let urls: Vec<_> = embedded_images(html, PAGE)
            .into_iter()
            .map(|c| c.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://img.example.org/a.png",
                "https://img.example.org/b.webp",
                "https://img.example.org/c.jpeg",
            ]
        );
    }

    #[test]
    fn test_scans_escaped_script_payloads() {
        let html = r#"<script>var data = ["https://img.example.org/q.jpg?w\u003d900\u0026h\u003d600", 5];</script>"#;
        let found = embedded_images(html, PAGE);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://img.example.org/q.jpg?w=900&h=600");
    }

    #[test]
    fn test_malformed_ld_json_is_ignored() {
        let html = r#"<script type="application/ld+json">{not json</script>"#;
        assert!(embedded_images(html, PAGE).is_empty());
    }

    #[test]
    fn test_same_url_reported_once() {
        let html = r#"
            <script type="application/ld+json">{"image": "https://img.example.org/x.png"}</script>
        "#;
        assert_eq!(embedded_images(html, PAGE).len(), 1);
    }
}
