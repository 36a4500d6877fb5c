//! Transfer progress reporting.

use std::sync::Arc;

/// Bytes transferred so far for one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes written to the staging file.
    pub transferred: u64,
    /// Total body size when the server reported one.
    pub total: Option<u64>,
}

/// Receives progress updates; implementations must tolerate frequent calls.
pub trait ProgressObserver: Send + Sync {
    /// Called after each chunk is written. `transferred` never decreases
    /// within one download.
    fn on_progress(&self, url: &str, progress: Progress);

    /// Called once when a download starts, before any bytes arrive.
    fn on_start(&self, url: &str, destination: &str) {
        let _ = (url, destination);
    }

    /// Called once when the body copy ends, successfully or not.
    fn on_finish(&self, url: &str) {
        let _ = url;
    }
}

/// Observer that discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressObserver for SilentProgress {
    fn on_progress(&self, _url: &str, _progress: Progress) {}
}

/// Shared handle to an observer.
pub type SharedObserver = Arc<dyn ProgressObserver>;

/// Construct the default silent observer handle.
#[must_use]
pub fn silent() -> SharedObserver {
    Arc::new(SilentProgress)
}
