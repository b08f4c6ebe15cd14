use std::time::Duration;

/// Depth of the ready-buffer ring fed by the capture driver (matches the
/// receiver's slot count).
pub const DEFAULT_READY_RING_DEPTH: usize = 8;
/// Default cap on queued DMA address pairs.
pub const DEFAULT_DMA_QUEUE_DEPTH: usize = 32;
/// Default depth of the completion feedback channel.
pub const DEFAULT_FEEDBACK_DEPTH: usize = 4;
/// Default worker park timeout; bounds stop-signal latency.
pub const DEFAULT_WORKER_PARK_MS: u64 = 50;

/// Sizing knobs for the pipeline queues and workers.
///
/// # Example
/// ```rust
/// use rzisp::tunables::PipelineTunables;
///
/// let tunables = PipelineTunables {
///     dma_queue_depth: 64,
///     ..PipelineTunables::default()
/// };
/// assert_eq!(tunables.sanitized().dma_queue_depth, 64);
/// ```
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineTunables {
    pub ready_ring_depth: usize,
    pub dma_queue_depth: usize,
    pub feedback_depth: usize,
    pub worker_park_ms: u64,
}

impl Default for PipelineTunables {
    fn default() -> Self {
        PipelineTunables {
            ready_ring_depth: DEFAULT_READY_RING_DEPTH,
            dma_queue_depth: DEFAULT_DMA_QUEUE_DEPTH,
            feedback_depth: DEFAULT_FEEDBACK_DEPTH,
            worker_park_ms: DEFAULT_WORKER_PARK_MS,
        }
    }
}

impl PipelineTunables {
    /// Clamp every knob to a usable minimum.
    pub fn sanitized(self) -> Self {
        PipelineTunables {
            ready_ring_depth: self.ready_ring_depth.max(1),
            dma_queue_depth: self.dma_queue_depth.max(1),
            feedback_depth: self.feedback_depth.max(1),
            worker_park_ms: self.worker_park_ms.max(1),
        }
    }

    pub(crate) fn park_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_park_ms)
    }
}
