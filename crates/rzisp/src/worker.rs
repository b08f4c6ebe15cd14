//! The two pipeline worker threads and the state they share with the
//! ioctl shim.
//!
//! The go thread pumps ready capture buffers into the accelerator, one
//! job in flight at a time. The feedback thread digests completions: it
//! runs the engine's control loops, surfaces job errors to the dequeue
//! path, and pushes the exposure decisions to the camera sensor. The
//! accelerator completion context itself only posts the raw result into
//! a bounded channel; everything that can sleep happens on the threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use log::{debug, warn};
use parking_lot::Mutex;

use rzisp_core::prelude::*;
use rzisp_engine::prelude::{Accelerator, CompletionFn, Session};

use crate::metrics::PipelineMetrics;
use crate::sensor::CameraSensor;
use crate::tunables::PipelineTunables;

/// errno surfaced when a capture buffer arrives while a job is already in
/// flight; the dequeue path requeues the buffer on seeing it.
pub(crate) const EBUSY: i32 = -16;

/// Exposure-loop settings mirrored out of the engine for the control and
/// feedback paths.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AeSettings {
    pub ae_on: i32,
    pub expose_level: i32,
    pub target_y: i32,
    pub threshold: i32,
}

/// State shared between the ioctl shim, the worker threads, and the
/// accelerator completion hook.
pub(crate) struct Shared<A: Accelerator, S: CameraSensor> {
    pub session: Mutex<Session<A>>,
    pub sensor: Mutex<S>,
    pub dma: Mutex<DmaJobQueue>,
    pub completions: CompletionQueue,
    /// Indices of capture buffers the receiver finished filling.
    pub ready_ring: ArrayQueue<u32>,
    pub go_wait: WaitQueue,
    pub feedback_wait: WaitQueue,
    /// Woken whenever a completion record lands; blocked dequeue retries
    /// park here.
    pub dequeue_wait: WaitQueue,
    result_tx: BoundedTx<i32>,
    result_rx: BoundedRx<i32>,
    /// Single-job gate: true from submission until its completion has
    /// been digested.
    pub busy: AtomicBool,
    /// Buffer index of the job in flight.
    pub in_flight_index: AtomicU32,
    pub stop: AtomicBool,
    pub set_ae: Mutex<AeSettings>,
    pub counters: Metrics,
    pub metrics: PipelineMetrics,
    pub tunables: PipelineTunables,
}

impl<A: Accelerator, S: CameraSensor> Shared<A, S> {
    pub fn new(session: Session<A>, sensor: S, tunables: PipelineTunables) -> Shared<A, S> {
        let tunables = tunables.sanitized();
        let (result_tx, result_rx) = bounded(tunables.feedback_depth);
        Shared {
            session: Mutex::new(session),
            sensor: Mutex::new(sensor),
            dma: Mutex::new(DmaJobQueue::with_capacity(tunables.dma_queue_depth)),
            completions: CompletionQueue::new(),
            ready_ring: ArrayQueue::new(tunables.ready_ring_depth),
            go_wait: WaitQueue::new(),
            feedback_wait: WaitQueue::new(),
            dequeue_wait: WaitQueue::new(),
            result_tx,
            result_rx,
            busy: AtomicBool::new(false),
            in_flight_index: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            set_ae: Mutex::new(AeSettings::default()),
            counters: Metrics::default(),
            metrics: PipelineMetrics::default(),
            tunables,
        }
    }
}

/// Build the completion hook handed to the accelerator with each job.
/// Runs in the accelerator's completion context: post and wake, nothing
/// that can block.
pub(crate) fn completion_hook<A, S>(shared: &Arc<Shared<A, S>>) -> CompletionFn
where
    A: Accelerator + Send + 'static,
    S: CameraSensor + Send + 'static,
{
    let shared = Arc::clone(shared);
    Box::new(move |result| {
        if matches!(shared.result_tx.send(result), SendOutcome::Full) {
            // Cannot happen while the single-job gate holds; drop with a
            // trace so a broken accelerator shows up in logs.
            warn!("completion channel full, result {result} dropped");
        }
        shared.feedback_wait.notify_one();
    })
}

/// One dispatch step of the go thread: take the oldest ready buffer and
/// either submit it, defer it with a busy record, or drop the step when
/// no address pair is staged.
pub(crate) fn dispatch_ready<A, S>(shared: &Arc<Shared<A, S>>, index: u32)
where
    A: Accelerator + Send + 'static,
    S: CameraSensor + Send + 'static,
{
    // One lock spans the busy check, the peek, and the submit-or-defer
    // decision: this is the single-outstanding-job gate.
    let mut dma = shared.dma.lock();
    let Some(job) = dma.peek_head() else {
        return;
    };
    if job.in_addr == 0 || job.out_addr == 0 {
        return;
    }

    if shared.busy.load(Ordering::Acquire) {
        shared.completions.push_tail(EBUSY, index);
        shared.counters.busy_skip();
        shared.dequeue_wait.notify_all();
        debug!("buffer {index} deferred, job in flight");
        dma.pop_head();
        return;
    }

    shared.busy.store(true, Ordering::Release);
    let started = Instant::now();
    let done = completion_hook(shared);
    let result = shared.session.lock().submit(job.in_addr, job.out_addr, done);
    match result {
        Ok(()) => {
            shared.in_flight_index.store(index, Ordering::Release);
            shared.counters.submit();
            shared.metrics.submit.record(started.elapsed());
            debug!("buffer {index} submitted, out 0x{:x}", job.out_addr);
        }
        Err(err) => {
            shared.busy.store(false, Ordering::Release);
            shared.completions.push_tail(err.errno(), index);
            shared.counters.error();
            shared.dequeue_wait.notify_all();
            warn!("job submission for buffer {index} failed: {err}");
        }
    }
    dma.pop_head();
}

/// One feedback step: digest a completion result if one is pending.
/// Returns false when the channel was empty.
pub(crate) fn pump_completion<A, S>(shared: &Arc<Shared<A, S>>) -> bool
where
    A: Accelerator + Send + 'static,
    S: CameraSensor + Send + 'static,
{
    let result = match shared.result_rx.recv() {
        RecvOutcome::Data(result) => result,
        RecvOutcome::Empty | RecvOutcome::Closed => return false,
    };

    let started = Instant::now();
    let feedback = shared.session.lock().complete(result);
    if let Some(feedback) = feedback {
        if feedback.result < 0 {
            let index = shared.in_flight_index.load(Ordering::Acquire);
            shared.completions.push_tail(feedback.result, index);
            shared.counters.error();
            debug!("job for buffer {index} completed with {}", feedback.result);
        }
        shared.counters.complete();
    }
    shared.busy.store(false, Ordering::Release);
    shared.dequeue_wait.notify_all();
    shared.metrics.complete.record(started.elapsed());

    let ae_on = shared.set_ae.lock().ae_on != 0;
    if ae_on {
        let exposure = shared.session.lock().ae_get();
        let mut sensor = shared.sensor.lock();
        if let Err(errno) = sensor.set_gain(exposure.gain) {
            warn!("sensor gain update failed: {errno}");
        }
        if let Err(errno) = sensor.set_exposure(exposure.time) {
            warn!("sensor exposure update failed: {errno}");
        }
    }
    true
}

/// Join handles of a running worker pair.
pub(crate) struct Workers {
    pub go: JoinHandle<()>,
    pub feedback: JoinHandle<()>,
}

/// Spawn the go and feedback threads against the shared state.
pub(crate) fn spawn<A, S>(shared: Arc<Shared<A, S>>) -> Workers
where
    A: Accelerator + Send + 'static,
    S: CameraSensor + Send + 'static,
{
    shared.stop.store(false, Ordering::Release);

    let go_shared = Arc::clone(&shared);
    let go = std::thread::spawn(move || {
        let park = go_shared.tunables.park_timeout();
        loop {
            go_shared.go_wait.wait_timeout(park);
            if go_shared.stop.load(Ordering::Acquire) {
                break;
            }
            while let Some(index) = go_shared.ready_ring.pop() {
                dispatch_ready(&go_shared, index);
            }
        }
        debug!("go thread exiting");
    });

    let fb_shared = Arc::clone(&shared);
    let feedback = std::thread::spawn(move || {
        let park = fb_shared.tunables.park_timeout();
        loop {
            fb_shared.feedback_wait.wait_timeout(park);
            if fb_shared.stop.load(Ordering::Acquire) {
                break;
            }
            while pump_completion(&fb_shared) {}
        }
        debug!("feedback thread exiting");
    });

    Workers { go, feedback }
}
