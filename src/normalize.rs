//! Canonical form of image URLs, used as candidate identity.

use url::Url;

/// Query parameters that never change which image is served.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "gclsrc", "dclid", "igshid", "ref", "ref_src", "ref_url", "referer",
    "referrer", "ved", "usg", "sa", "ei",
];

/// Normalize an image URL so trivially different spellings compare equal.
///
/// Forces https, lowercases the host, strips default ports, tracking
/// parameters and fragments. Anything that is not an http(s) URL is
/// returned unchanged.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let Ok(mut normalized) = Url::parse(url.trim()) else {
        return url.to_string();
    };

    if normalized.scheme() != "http" && normalized.scheme() != "https" {
        return url.to_string();
    }

    if normalized.scheme() == "http" {
        let _ = normalized.set_scheme("https");
    }

    if let Some(host) = normalized.host_str() {
        let lower_host = host.to_lowercase();
        if host != lower_host {
            let _ = normalized.set_host(Some(&lower_host));
        }
    }

    if normalized.port() == Some(443) || normalized.port() == Some(80) {
        let _ = normalized.set_port(None);
    }

    let kept: Vec<(String, String)> = normalized
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        normalized.set_query(None);
    } else {
        normalized.query_pairs_mut().clear().extend_pairs(kept);
    }

    normalized.set_fragment(None);

    normalized.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str()) || lower.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_https() {
        assert_eq!(
            normalize_url("http://example.com/a.jpg"),
            "https://example.com/a.jpg"
        );
    }

    #[test]
    fn test_lowercase_host() {
        assert_eq!(
            normalize_url("https://IMAGES.Example.COM/Photo.JPG"),
            "https://images.example.com/Photo.JPG"
        );
    }

    #[test]
    fn test_remove_tracking_params() {
        assert_eq!(
            normalize_url("https://example.com/a.jpg?utm_source=x&w=800"),
            "https://example.com/a.jpg?w=800"
        );
        assert_eq!(
            normalize_url("https://example.com/a.jpg?fbclid=abc"),
            "https://example.com/a.jpg"
        );
    }

    #[test]
    fn test_keeps_size_params() {
        assert_eq!(
            normalize_url("https://example.com/img?s=1200&t=photo"),
            "https://example.com/img?s=1200&t=photo"
        );
    }

    #[test]
    fn test_remove_fragment_and_default_port() {
        assert_eq!(
            normalize_url("https://example.com:443/a.png#top"),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn test_non_http_passthrough() {
        assert_eq!(normalize_url("data:image/png;base64,AAAA"), "data:image/png;base64,AAAA");
        assert_eq!(normalize_url("not a url"), "not a url");
    }
}
