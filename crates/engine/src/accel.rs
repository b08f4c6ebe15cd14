//! Accelerator job boundary.
//!
//! The engine never programs registers; it hands the accelerator driver
//! two memory regions (the configuration image and the parameter block)
//! and receives one completion per started job. The completion may run in
//! an arbitrary non-blocking context, so implementations must not call
//! back into the engine from `start`.

use std::sync::Arc;

use parking_lot::Mutex;

use rzisp_core::prelude::{IspError, IspResult};

/// One device-addressable region of a job descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRegion {
    pub address: u64,
    pub size: usize,
}

/// A submitted job: configuration image plus parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelJob {
    pub config: JobRegion,
    pub params: JobRegion,
}

/// Completion delivery for one job. Called exactly once with the signed
/// job result (0 = success).
pub type CompletionFn = Box<dyn FnOnce(i32) + Send>;

/// The accelerator driver seam.
pub trait Accelerator: Send {
    /// Claim the accelerator for this session.
    fn open(&mut self) -> IspResult<()>;
    /// Release the accelerator.
    fn close(&mut self) -> IspResult<()>;
    /// Start one job. At most one job is in flight at a time; the engine
    /// enforces that, implementations may rely on it.
    fn start(&mut self, job: AccelJob, done: CompletionFn) -> IspResult<()>;
}

#[derive(Default)]
struct SimulatedState {
    opened: bool,
    pending: Option<(AccelJob, CompletionFn)>,
    started: u64,
    fail_open: Option<i32>,
    fail_start: Option<i32>,
}

/// In-process accelerator used by tests and the synthetic pipeline: jobs
/// queue up until the harness fires their completions.
///
/// # Example
/// ```rust
/// use rzisp_engine::accel::{AccelJob, Accelerator, JobRegion, SimulatedAccelerator};
///
/// let mut accel = SimulatedAccelerator::new();
/// accel.open().unwrap();
/// let job = AccelJob {
///     config: JobRegion { address: 0x1000, size: 16 },
///     params: JobRegion { address: 0x2000, size: 0x78 },
/// };
/// accel.start(job, Box::new(|result| assert_eq!(result, 0))).unwrap();
/// assert!(accel.handle().finish(0));
/// ```
#[derive(Clone, Default)]
pub struct SimulatedAccelerator {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedAccelerator {
    pub fn new() -> SimulatedAccelerator {
        SimulatedAccelerator::default()
    }

    /// A cloneable handle for driving completions from the harness side.
    pub fn handle(&self) -> SimulatedAccelerator {
        self.clone()
    }

    /// Fire the pending job's completion with `result`. Returns false if
    /// no job was in flight.
    pub fn finish(&self, result: i32) -> bool {
        let pending = self.state.lock().pending.take();
        match pending {
            Some((_, done)) => {
                done(result);
                true
            }
            None => false,
        }
    }

    /// The job currently in flight, if any.
    pub fn in_flight(&self) -> Option<AccelJob> {
        self.state.lock().pending.as_ref().map(|(job, _)| *job)
    }

    /// Jobs started over the lifetime of the simulator.
    pub fn started(&self) -> u64 {
        self.state.lock().started
    }

    /// Make the next `open` fail with an errno-style code.
    pub fn fail_next_open(&self, errno: i32) {
        self.state.lock().fail_open = Some(errno);
    }

    /// Make the next `start` fail with an errno-style code.
    pub fn fail_next_start(&self, errno: i32) {
        self.state.lock().fail_start = Some(errno);
    }
}

impl Accelerator for SimulatedAccelerator {
    fn open(&mut self) -> IspResult<()> {
        let mut state = self.state.lock();
        if let Some(errno) = state.fail_open.take() {
            return Err(IspError::HardwareFault(errno));
        }
        state.opened = true;
        Ok(())
    }

    fn close(&mut self) -> IspResult<()> {
        let mut state = self.state.lock();
        state.opened = false;
        state.pending = None;
        Ok(())
    }

    fn start(&mut self, job: AccelJob, done: CompletionFn) -> IspResult<()> {
        let mut state = self.state.lock();
        if let Some(errno) = state.fail_start.take() {
            return Err(IspError::HardwareFault(errno));
        }
        if !state.opened || state.pending.is_some() {
            return Err(IspError::HardwareFault(-16)); // device busy
        }
        state.started += 1;
        state.pending = Some((job, done));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn job() -> AccelJob {
        AccelJob {
            config: JobRegion {
                address: 0x1000,
                size: 64,
            },
            params: JobRegion {
                address: 0x2000,
                size: 0x78,
            },
        }
    }

    #[test]
    fn completion_fires_once_with_result() {
        let mut accel = SimulatedAccelerator::new();
        accel.open().unwrap();
        let seen = Arc::new(AtomicI32::new(i32::MIN));
        let seen_cb = seen.clone();
        accel
            .start(job(), Box::new(move |r| seen_cb.store(r, Ordering::SeqCst)))
            .unwrap();
        assert!(accel.handle().finish(-5));
        assert_eq!(seen.load(Ordering::SeqCst), -5);
        assert!(!accel.handle().finish(0));
    }

    #[test]
    fn second_start_while_busy_is_rejected() {
        let mut accel = SimulatedAccelerator::new();
        accel.open().unwrap();
        accel.start(job(), Box::new(|_| {})).unwrap();
        assert_eq!(
            accel.start(job(), Box::new(|_| {})),
            Err(IspError::HardwareFault(-16))
        );
    }

    #[test]
    fn injected_failures_surface() {
        let mut accel = SimulatedAccelerator::new();
        accel.fail_next_open(-19);
        assert_eq!(accel.open(), Err(IspError::HardwareFault(-19)));
        accel.open().unwrap();
        accel.fail_next_start(-22);
        assert_eq!(
            accel.start(job(), Box::new(|_| {})),
            Err(IspError::HardwareFault(-22))
        );
        // The injected failure is one-shot.
        accel.start(job(), Box::new(|_| {})).unwrap();
    }
}
