use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for the job pipeline.
///
/// # Example
/// ```rust
/// use rzisp_core::metrics::Metrics;
///
/// let metrics = Metrics::default();
/// metrics.submit();
/// assert_eq!(metrics.submits(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    submits: AtomicU64,
    completions: AtomicU64,
    busy_skips: AtomicU64,
    errors: AtomicU64,
}

impl Metrics {
    /// Count an accelerator job submission.
    pub fn submit(&self) {
        self.submits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed job.
    pub fn complete(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a buffer deferred because a job was already in flight.
    pub fn busy_skip(&self) {
        self.busy_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a submission or completion error.
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of submissions.
    pub fn submits(&self) -> u64 {
        self.submits.load(Ordering::Relaxed)
    }

    /// Snapshot of completions.
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Relaxed)
    }

    /// Snapshot of busy deferrals.
    pub fn busy_skips(&self) -> u64 {
        self.busy_skips.load(Ordering::Relaxed)
    }

    /// Snapshot of errors.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Clone for Metrics {
    fn clone(&self) -> Self {
        let cloned = Metrics::default();
        cloned.submits.store(self.submits(), Ordering::Relaxed);
        cloned
            .completions
            .store(self.completions(), Ordering::Relaxed);
        cloned.busy_skips.store(self.busy_skips(), Ordering::Relaxed);
        cloned.errors.store(self.errors(), Ordering::Relaxed);
        cloned
    }
}
