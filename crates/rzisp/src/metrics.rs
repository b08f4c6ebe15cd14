use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: usize = 120;

/// Rolling timing metrics for one pipeline stage.
///
/// # Example
/// ```rust
/// use rzisp::metrics::StageMetrics;
///
/// let metrics = StageMetrics::default();
/// metrics.record(std::time::Duration::from_millis(5));
/// assert_eq!(metrics.total_samples(), 1);
/// ```
#[derive(Default, Clone)]
pub struct StageMetrics {
    inner: Arc<StageState>,
}

#[derive(Default)]
struct StageState {
    count: AtomicU64,
    last_nanos: AtomicU64,
    window: parking_lot::Mutex<VecDeque<(Instant, u64)>>,
}

impl StageMetrics {
    /// Record a single duration sample.
    pub fn record(&self, dur: Duration) {
        let nanos = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.inner.count.fetch_add(1, Ordering::Relaxed);
        self.inner.last_nanos.store(nanos, Ordering::Relaxed);
        let mut window = self.inner.window.lock();
        window.push_back((Instant::now(), nanos));
        while window.len() > DEFAULT_WINDOW {
            window.pop_front();
        }
    }

    /// Total samples recorded over the lifetime.
    pub fn total_samples(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Most recent sample in milliseconds.
    pub fn last_millis(&self) -> f64 {
        self.inner.last_nanos.load(Ordering::Relaxed) as f64 / 1e6
    }

    /// Rolling average in milliseconds, if any samples are in the window.
    pub fn avg_millis(&self) -> Option<f64> {
        let window = self.inner.window.lock();
        if window.is_empty() {
            return None;
        }
        let sum: u64 = window.iter().map(|(_, n)| n).sum();
        Some(sum as f64 / window.len() as f64 / 1e6)
    }

    /// Windowed throughput in events per second.
    pub fn rate(&self) -> Option<f64> {
        let window = self.inner.window.lock();
        let first = window.front()?.0;
        let last = window.back()?.0;
        let span = last.duration_since(first).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        Some((window.len() as f64 - 1.0) / span)
    }
}

/// Per-stage metrics of a running pipeline.
#[derive(Default, Clone)]
pub struct PipelineMetrics {
    /// Job dispatch (ready buffer to accelerator start).
    pub submit: StageMetrics,
    /// Completion digestion (accelerator result to dequeue wakeup).
    pub complete: StageMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_the_window() {
        let metrics = StageMetrics::default();
        metrics.record(Duration::from_millis(2));
        metrics.record(Duration::from_millis(4));
        let avg = metrics.avg_millis().unwrap();
        assert!((avg - 3.0).abs() < 0.1);
        assert_eq!(metrics.total_samples(), 2);
    }

    #[test]
    fn empty_window_has_no_average() {
        let metrics = StageMetrics::default();
        assert!(metrics.avg_millis().is_none());
        assert!(metrics.rate().is_none());
    }
}
