//! Helpers for turning raw `src` values into candidates.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::models::{ImageCandidate, StrategyKind};

/// Side length requested when rewriting sized image-CDN URLs.
const HIGH_RES_SIZE: u32 = 2048;

/// `=w800-h600` style size suffix used by Google's image CDN.
static SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=w(\d+)-h(\d+)").expect("valid size regex"));

/// `=s1200` square size suffix.
static SQUARE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=s(\d+)").expect("valid square regex"));

/// Trailing `=w100-h100-p`, `=s64` or `=h200` sizing options on a CDN path.
static CDN_SIZE_OPTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=[swh]\d+(?:-[0-9A-Za-z]+)*$").expect("valid cdn options regex")
});

/// Only absolute http(s) URLs are worth fetching; `data:` and relative
/// sources are dropped at discovery time.
#[must_use]
pub fn is_fetchable(src: &str) -> bool {
    let src = src.trim();
    src.starts_with("https://") || src.starts_with("http://")
}

/// Attributes that may hold an image's real address, in preference order.
/// Lazily loaded images keep a placeholder in `src`.
const SOURCE_ATTRS: &[&str] = &["src", "data-src", "data-iurl"];

/// First fetchable source among an element's source attributes.
#[must_use]
pub fn fetchable_source<'a>(attr: impl Fn(&str) -> Option<&'a str>) -> Option<&'a str> {
    SOURCE_ATTRS
        .iter()
        .filter_map(|name| attr(name))
        .find(|value| is_fetchable(value))
}

fn is_image_cdn(host: &str) -> bool {
    host == "googleusercontent.com" || host.ends_with(".googleusercontent.com")
}

/// Ask the CDN for a large rendition when the URL path ends in sizing
/// options. The query string is left alone.
#[must_use]
pub fn high_res_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.host_str().is_some_and(is_image_cdn) {
        return url.to_string();
    }
    let Some(options) = CDN_SIZE_OPTIONS.find(parsed.path()) else {
        return url.to_string();
    };
    let path = format!(
        "{}=w{HIGH_RES_SIZE}-h{HIGH_RES_SIZE}",
        &parsed.path()[..options.start()]
    );
    parsed.set_path(&path);
    parsed.to_string()
}

/// Dimensions encoded in a CDN size suffix, if any.
#[must_use]
pub fn size_from_url(url: &str) -> (Option<u32>, Option<u32>) {
    if let Some(caps) = SIZE_SUFFIX.captures(url) {
        return (caps[1].parse().ok(), caps[2].parse().ok());
    }
    if let Some(caps) = SQUARE_SUFFIX.captures(url) {
        let side = caps[1].parse().ok();
        return (side, side);
    }
    (None, None)
}

/// Image format implied by the URL path's extension.
///
/// Returns `None` when the extension is missing or not an image type, so
/// the format can be checked after download instead.
#[must_use]
pub fn format_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mime = mime_guess::from_path(parsed.path()).first()?;
    if mime.type_() != mime_guess::mime::IMAGE {
        return None;
    }
    let subtype = mime.subtype().as_str().to_lowercase();
    Some(match subtype.as_str() {
        "jpg" | "pjpeg" => "jpeg".to_string(),
        "svg+xml" => "svg".to_string(),
        _ => subtype,
    })
}

/// Parse an HTML `width`/`height` attribute such as `"320"` or `"320px"`.
#[must_use]
pub fn parse_dimension(value: Option<&str>) -> Option<u32> {
    let digits: String = value?
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|v| *v > 0)
}

/// Build a candidate from a raw source, upgrading sized CDN URLs and filling
/// in whatever the URL reveals about size and format.
///
/// Returns `None` for sources that are not fetchable.
#[must_use]
pub fn build_candidate(
    src: &str,
    page_url: &str,
    width: Option<u32>,
    height: Option<u32>,
    strategy: StrategyKind,
) -> Option<ImageCandidate> {
    if !is_fetchable(src) {
        return None;
    }
    let original = src.trim();
    let url = high_res_url(original);
    let (url_width, url_height) = if url == original {
        size_from_url(&url)
    } else {
        (Some(HIGH_RES_SIZE), Some(HIGH_RES_SIZE))
    };

    Some(ImageCandidate {
        format: format_from_url(&url),
        declared_width: url_width.or(width),
        declared_height: url_height.or(height),
        url,
        source_page_url: page_url.to_string(),
        strategy,
    })
}
