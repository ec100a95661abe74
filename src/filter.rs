//! Merge, deduplicate, screen and rank extracted candidates.

use std::cmp::Reverse;
use std::collections::HashSet;

use tracing::debug;
use url::Url;

use crate::models::ImageCandidate;
use crate::normalize::normalize_url;

/// Formats accepted when a candidate's format is known up front.
pub const ALLOWED_FORMATS: &[&str] = &["jpeg", "png", "webp", "gif"];

/// Map tiles, UI sprites and ad pixels rather than content, as
/// `(host, path prefix)`. Subdomains of the host match too.
pub const BLOCKED_SOURCES: &[(&str, &str)] = &[
    ("maps.googleapis.com", "/"),
    ("maps.gstatic.com", "/"),
    ("googleusercontent.com", "/gadgets"),
    ("google.com", "/images"),
    ("gstatic.com", "/images"),
    ("doubleclick.net", "/"),
    ("googlesyndication.com", "/"),
];

/// Acceptance rules applied before anything is downloaded.
#[derive(Debug, Clone, Copy)]
pub struct FilterRules {
    pub min_width: u32,
    pub min_height: u32,
    /// Keep at most this many candidates; `0` keeps all.
    pub max_images: usize,
}

fn is_blocked_source(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let path = parsed.path();
    BLOCKED_SOURCES.iter().any(|(blocked, prefix)| {
        (host == *blocked || host.ends_with(&format!(".{blocked}"))) && path.starts_with(prefix)
    })
}

fn format_allowed(candidate: &ImageCandidate) -> bool {
    candidate
        .format
        .as_deref()
        .is_none_or(|format| ALLOWED_FORMATS.contains(&format))
}

fn large_enough(candidate: &ImageCandidate, rules: &FilterRules) -> bool {
    candidate.declared_width.is_none_or(|w| w >= rules.min_width)
        && candidate.declared_height.is_none_or(|h| h >= rules.min_height)
}

/// Reduce raw strategy output to the ranked list worth downloading.
///
/// Candidates are deduplicated on their normalized URL, keeping the first
/// occurrence, then screened by source, format and declared size. Survivors
/// are ordered by strategy priority and then by declared area, largest
/// first, with unknown sizes last. The relative order of otherwise equal
/// candidates is preserved. Finally the list is capped at `max_images`.
#[must_use]
pub fn filter_candidates(candidates: Vec<ImageCandidate>, rules: &FilterRules) -> Vec<ImageCandidate> {
    let total = candidates.len();
    let mut seen = HashSet::new();

    let mut kept: Vec<ImageCandidate> = candidates
        .into_iter()
        .filter(|candidate| seen.insert(normalize_url(&candidate.url)))
        .filter(|c| !is_blocked_source(&c.url))
        .filter(format_allowed)
        .filter(|c| large_enough(c, rules))
        .collect();

    kept.sort_by_key(|c| (c.strategy.priority(), Reverse(c.declared_area().map_or(0, |a| a + 1))));

    if rules.max_images > 0 {
        kept.truncate(rules.max_images);
    }

    debug!(total, kept = kept.len(), "Filtered candidates");
    kept
}
