//! Run-scoped state handed down from the orchestrator to every stage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Shared handle for one harvesting run: the stop signal plus counters.
///
/// Cheap to clone; clones observe the same token and statistics.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
    stats: Arc<RunStats>,
}

/// Counters updated by the pipeline stages.
#[derive(Debug, Default)]
pub struct RunStats {
    entities_finished: AtomicUsize,
    sessions_open: AtomicUsize,
    downloads_attempted: AtomicUsize,
    downloads_succeeded: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub entities_finished: usize,
    pub sessions_open: usize,
    pub downloads_attempted: usize,
    pub downloads_succeeded: usize,
    pub peak_in_flight: usize,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            stats: Arc::default(),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }
}

impl RunStats {
    pub fn entity_finished(&self) {
        self.entities_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.sessions_open.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_closed(&self) {
        self.sessions_open.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn download_attempted(&self) {
        self.downloads_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_succeeded(&self) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a fetch as started; the guard marks it finished on drop.
    #[must_use]
    pub fn fetch_started(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { stats: self }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entities_finished: self.entities_finished.load(Ordering::Relaxed),
            sessions_open: self.sessions_open.load(Ordering::SeqCst),
            downloads_attempted: self.downloads_attempted.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    stats: &'a RunStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
