//! Shared constants used across the application.

/// User agent presented by the browser and the image downloader.
///
/// Search result pages render a reduced layout for unknown agents, so both
/// use the same desktop Chrome string.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
