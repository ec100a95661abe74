use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the harvesting pipeline.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("browser session could not be launched after {attempts} attempt(s): {message}")]
    SessionLaunch { attempts: u32, message: String },

    #[error("navigation to {url} timed out after {attempts} attempt(s)")]
    NavigationTimeout { url: String, attempts: u32 },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("extraction strategy {strategy} failed: {message}")]
    ExtractionStrategy { strategy: String, message: String },

    #[error("transient download failure for {url}: {message}")]
    DownloadTransient { url: String, message: String },

    #[error("permanent download failure for {url}: {message}")]
    DownloadPermanent { url: String, message: String },

    #[error("failed to write archive {}: {message}", path.display())]
    ArchiveWrite { path: PathBuf, message: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarvestError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionLaunch { .. } => ErrorKind::SessionLaunchFailure,
            Self::NavigationTimeout { .. } | Self::Navigation { .. } => {
                ErrorKind::NavigationTimeout
            }
            Self::ExtractionStrategy { .. } => ErrorKind::ExtractionStrategyFailure,
            Self::DownloadTransient { .. } => ErrorKind::DownloadTransientFailure,
            Self::DownloadPermanent { .. } | Self::Io { .. } => {
                ErrorKind::DownloadPermanentFailure
            }
            Self::ArchiveWrite { .. } => ErrorKind::ArchiveWriteFailure,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DownloadTransient { .. } | Self::NavigationTimeout { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Flat error classification recorded on download results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    SessionLaunchFailure,
    NavigationTimeout,
    ExtractionStrategyFailure,
    DownloadTransientFailure,
    DownloadPermanentFailure,
    ArchiveWriteFailure,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = HarvestError::DownloadPermanent {
            url: "https://example.com/a.jpg".to_string(),
            message: "HTTP 404".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::DownloadPermanentFailure);
        assert!(!err.is_transient());

        let err = HarvestError::DownloadTransient {
            url: "https://example.com/a.jpg".to_string(),
            message: "HTTP 503".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::DownloadTransientFailure);
        assert!(err.is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = HarvestError::SessionLaunch {
            attempts: 3,
            message: "no chrome".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "browser session could not be launched after 3 attempt(s): no chrome"
        );
    }
}
