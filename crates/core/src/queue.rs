use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use crate::error::{IspError, IspResult};

/// Result of attempting to enqueue on a bounded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Value was accepted.
    Ok,
    /// Queue is full.
    Full,
    /// Queue is closed.
    Closed,
}

/// Result of attempting to dequeue from a bounded channel.
#[derive(Debug)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Queue has been closed and drained.
    Closed,
    /// Queue currently empty.
    Empty,
}

/// Bounded sender handle.
///
/// # Example
/// ```rust
/// use rzisp_core::queue::{bounded, SendOutcome};
///
/// let (tx, _rx) = bounded::<u8>(1);
/// assert_eq!(tx.send(1), SendOutcome::Ok);
/// assert_eq!(tx.send(2), SendOutcome::Full);
/// ```
#[derive(Clone)]
pub struct BoundedTx<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> BoundedTx<T> {
    /// Attempt to send without blocking.
    pub fn send(&self, value: T) -> SendOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return SendOutcome::Closed;
        }
        self.inner
            .queue
            .push(value)
            .map(|_| SendOutcome::Ok)
            .unwrap_or(SendOutcome::Full)
    }

    /// Close the queue to further sends.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

/// Bounded receiver handle.
#[derive(Clone)]
pub struct BoundedRx<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> BoundedRx<T> {
    /// Attempt to receive without blocking.
    pub fn recv(&self) -> RecvOutcome<T> {
        match self.inner.queue.pop() {
            Some(value) => RecvOutcome::Data(value),
            None => {
                if self.inner.closed.load(Ordering::Acquire) {
                    RecvOutcome::Closed
                } else {
                    RecvOutcome::Empty
                }
            }
        }
    }

    /// Mark the queue as closed; senders will see `Closed` and exit.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

struct ChannelInner<T> {
    queue: ArrayQueue<T>,
    closed: AtomicBool,
}

/// Create a bounded lock-free channel with the given capacity.
///
/// # Example
/// ```rust
/// use rzisp_core::queue::{bounded, RecvOutcome, SendOutcome};
///
/// let (tx, rx) = bounded::<u8>(4);
/// assert_eq!(tx.send(7), SendOutcome::Ok);
/// assert!(matches!(rx.recv(), RecvOutcome::Data(7)));
/// ```
pub fn bounded<T>(capacity: usize) -> (BoundedTx<T>, BoundedRx<T>) {
    let inner = Arc::new(ChannelInner {
        queue: ArrayQueue::new(capacity),
        closed: AtomicBool::new(false),
    });
    (
        BoundedTx {
            inner: inner.clone(),
        },
        BoundedRx { inner },
    )
}

/// One pending accelerator job: the physical addresses of the raw input
/// frame and the destination buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DmaJob {
    pub in_addr: u64,
    pub out_addr: u64,
}

/// FIFO of pending DMA address pairs awaiting submission.
///
/// Not internally locked: the dispatch path holds one mutex around the
/// busy check, the peek, and the submit-or-defer decision, which is what
/// guarantees at most one outstanding accelerator job.
///
/// # Example
/// ```rust
/// use rzisp_core::queue::{DmaJob, DmaJobQueue};
///
/// let mut q = DmaJobQueue::with_capacity(8);
/// q.enqueue(DmaJob { in_addr: 0xA, out_addr: 0xB }).unwrap();
/// assert_eq!(q.peek_head().unwrap().in_addr, 0xA);
/// ```
#[derive(Debug)]
pub struct DmaJobQueue {
    entries: VecDeque<DmaJob>,
    capacity: usize,
}

impl DmaJobQueue {
    /// Create a queue that rejects entries beyond `capacity`.
    pub fn with_capacity(capacity: usize) -> DmaJobQueue {
        DmaJobQueue {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an address pair at the tail.
    pub fn enqueue(&mut self, job: DmaJob) -> IspResult<()> {
        if self.entries.len() >= self.capacity {
            return Err(IspError::OutOfMemory);
        }
        self.entries.push_back(job);
        Ok(())
    }

    /// Oldest unconsumed entry without removing it.
    pub fn peek_head(&self) -> Option<DmaJob> {
        self.entries.front().copied()
    }

    /// Remove the oldest entry. Callers peek first to decide; popping an
    /// empty queue is a no-op.
    pub fn pop_head(&mut self) {
        self.entries.pop_front();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending entry (stream teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One finished accelerator job: its signed result and the index of the
/// capture buffer it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompletionRecord {
    /// 0 on success, negative errno-style code otherwise.
    pub code: i32,
    /// Capture buffer index the job was submitted for.
    pub index: u32,
}

/// FIFO of completion records bridging the accelerator completion context
/// back to blocked dequeue calls.
///
/// Pushes may run from the completion context, so the interior lock is
/// held only for the push or the head scan, never across caller logic.
/// Records are removed only when the head matches the requested index,
/// which keeps delivery in submission order.
///
/// # Example
/// ```rust
/// use rzisp_core::queue::CompletionQueue;
///
/// let q = CompletionQueue::new();
/// q.push_tail(0, 5);
/// q.push_tail(-22, 7);
/// assert_eq!(q.pop_head_if_match(7), None); // head is index 5
/// assert_eq!(q.pop_head_if_match(5).unwrap().code, 0);
/// assert_eq!(q.pop_head_if_match(7).unwrap().code, -22);
/// ```
#[derive(Debug, Default)]
pub struct CompletionQueue {
    entries: Mutex<VecDeque<CompletionRecord>>,
}

impl CompletionQueue {
    pub fn new() -> CompletionQueue {
        CompletionQueue::default()
    }

    /// Append a record at the tail.
    pub fn push_tail(&self, code: i32, index: u32) {
        self.entries
            .lock()
            .push_back(CompletionRecord { code, index });
    }

    /// Head record without removing it.
    pub fn peek_head(&self) -> Option<CompletionRecord> {
        self.entries.lock().front().copied()
    }

    /// Remove and return the head record only if its buffer index matches.
    pub fn pop_head_if_match(&self, index: u32) -> Option<CompletionRecord> {
        let mut entries = self.entries.lock();
        match entries.front() {
            Some(head) if head.index == index => entries.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every pending record (stream teardown).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Condition-variable wait point for the worker threads.
///
/// Wakes are sticky: a notification arriving while no thread waits is
/// consumed by the next `wait`, so a worker never sleeps through work
/// that was posted just before it parked.
///
/// # Example
/// ```rust
/// use rzisp_core::queue::WaitQueue;
/// use std::time::Duration;
///
/// let wq = WaitQueue::new();
/// wq.notify_all();
/// assert!(wq.wait_timeout(Duration::from_millis(1)));
/// ```
#[derive(Debug, Default)]
pub struct WaitQueue {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl WaitQueue {
    pub fn new() -> WaitQueue {
        WaitQueue::default()
    }

    /// Wake one waiting thread (or arm the next wait).
    pub fn notify_one(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_one();
    }

    /// Wake every waiting thread (or arm the next wait).
    pub fn notify_all(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_all();
    }

    /// Block until notified.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.condvar.wait(&mut pending);
        }
        *pending = false;
    }

    /// Block until notified or the timeout elapses. Returns true when a
    /// notification was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.condvar.wait_for(&mut pending, timeout);
        }
        let woke = *pending;
        *pending = false;
        woke
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_queue_fifo_order() {
        let mut q = DmaJobQueue::with_capacity(8);
        q.enqueue(DmaJob {
            in_addr: 0xA,
            out_addr: 0xB,
        })
        .unwrap();
        q.enqueue(DmaJob {
            in_addr: 0xC,
            out_addr: 0xD,
        })
        .unwrap();

        let head = q.peek_head().unwrap();
        assert_eq!((head.in_addr, head.out_addr), (0xA, 0xB));
        q.pop_head();
        let head = q.peek_head().unwrap();
        assert_eq!((head.in_addr, head.out_addr), (0xC, 0xD));
    }

    #[test]
    fn dma_queue_capacity_is_out_of_memory() {
        let mut q = DmaJobQueue::with_capacity(1);
        q.enqueue(DmaJob {
            in_addr: 1,
            out_addr: 2,
        })
        .unwrap();
        assert_eq!(
            q.enqueue(DmaJob {
                in_addr: 3,
                out_addr: 4,
            }),
            Err(IspError::OutOfMemory)
        );
    }

    #[test]
    fn dma_queue_pop_on_empty_is_noop() {
        let mut q = DmaJobQueue::with_capacity(4);
        q.pop_head();
        assert!(q.is_empty());
    }

    #[test]
    fn completion_queue_matches_only_at_head() {
        let q = CompletionQueue::new();
        q.push_tail(0, 5);
        q.push_tail(-22, 7);

        assert_eq!(q.pop_head_if_match(7), None);
        let first = q.pop_head_if_match(5).unwrap();
        assert_eq!((first.code, first.index), (0, 5));
        let second = q.pop_head_if_match(7).unwrap();
        assert_eq!((second.code, second.index), (-22, 7));
        assert!(q.is_empty());
    }

    #[test]
    fn completion_queue_preserves_submission_order() {
        let q = CompletionQueue::new();
        for idx in [1u32, 2, 3] {
            q.push_tail(0, idx);
        }
        for idx in [1u32, 2, 3] {
            // Later indices never match before earlier ones are consumed.
            assert_eq!(q.pop_head_if_match(idx + 1), None);
            assert!(q.pop_head_if_match(idx).is_some());
        }
    }

    #[test]
    fn bounded_channel_backpressure() {
        let (tx, rx) = bounded::<u32>(2);
        assert_eq!(tx.send(1), SendOutcome::Ok);
        assert_eq!(tx.send(2), SendOutcome::Ok);
        assert_eq!(tx.send(3), SendOutcome::Full);
        assert!(matches!(rx.recv(), RecvOutcome::Data(1)));
        tx.close();
        assert!(matches!(rx.recv(), RecvOutcome::Data(2)));
        assert!(matches!(rx.recv(), RecvOutcome::Closed));
    }

    #[test]
    fn wait_queue_sticky_notification() {
        let wq = WaitQueue::new();
        wq.notify_one();
        assert!(wq.wait_timeout(Duration::from_millis(1)));
        assert!(!wq.wait_timeout(Duration::from_millis(1)));
    }
}
