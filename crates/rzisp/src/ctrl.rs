//! The ioctl shim: wraps a capture queue's ioctl surface and injects the
//! ISP lifecycle into it.
//!
//! The engine opens lazily on the first buffer query, worker threads run
//! for the life of the stream, and stream-off tears everything down in
//! stop/wake/join order before the engine releases the accelerator.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::debug;

use rzisp_core::prelude::*;
use rzisp_engine::prelude::{Accelerator, CAM_BUFFER_COUNT, IspFunc, Session};

use crate::metrics::PipelineMetrics;
use crate::sensor::{CameraSensor, CsiSubdev};
use crate::tunables::PipelineTunables;
use crate::video::{Capability, PixFormat, Selection, VideoQueue, VqResult, fourcc};
use crate::worker::{self, AeSettings, Shared, Workers};

const EINVAL: i32 = -22;
const ENOSPC: i32 = -28;
const EPIPE: i32 = -32;

/// Sentinel for "accelerator priority never set explicitly".
const DRP_LEVEL_UNSET: i32 = -1;

/// Identity the shim reports on `querycap`.
const DRIVER_NAME: &str = "rzv2l_isp";
const CARD_NAME: &str = "RZV2L_CRU";

#[derive(Debug, Clone, Copy)]
struct OpenInfo {
    in_format: InputFormat,
    out_format: OutputFormat,
    width: u16,
    height: u16,
    frame_interval: u16,
    opened: bool,
}

impl Default for OpenInfo {
    fn default() -> Self {
        OpenInfo {
            in_format: InputFormat::Raw10,
            out_format: OutputFormat::Uyvy,
            width: 0,
            height: 0,
            frame_interval: limits::FRM_INTERVAL_DEFAULT,
            opened: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CamBuffers {
    list: [u64; CAM_BUFFER_COUNT],
    count: usize,
    next: usize,
    got: bool,
}

#[derive(Debug, Clone, Copy)]
enum AeField {
    Enable,
    ExposeLevel,
    TargetLuma,
    Threshold,
}

/// The capture-shim instance for one video device.
///
/// Type parameters are the collaborator seams: the wrapped capture queue
/// `Q`, the CSI receiver `C`, the camera sensor `S`, and the accelerator
/// `A` inside the engine session.
pub struct IspCtrl<Q, C, A, S>
where
    Q: VideoQueue,
    C: CsiSubdev,
    A: Accelerator + Send + 'static,
    S: CameraSensor + Send + 'static,
{
    queue: Q,
    csi: C,
    shared: Arc<Shared<A, S>>,
    open_info: OpenInfo,
    cam: CamBuffers,
    drp_level: i32,
    set_infmt_flag: bool,
    workers: Option<Workers>,
}

impl<Q, C, A, S> IspCtrl<Q, C, A, S>
where
    Q: VideoQueue,
    C: CsiSubdev,
    A: Accelerator + Send + 'static,
    S: CameraSensor + Send + 'static,
{
    /// Wire a shim around a capture queue and its media pipeline.
    pub fn new(queue: Q, csi: C, sensor: S, session: Session<A>) -> Self {
        Self::with_tunables(queue, csi, sensor, session, PipelineTunables::default())
    }

    pub fn with_tunables(
        queue: Q,
        csi: C,
        sensor: S,
        session: Session<A>,
        tunables: PipelineTunables,
    ) -> Self {
        IspCtrl {
            queue,
            csi,
            shared: Arc::new(Shared::new(session, sensor, tunables)),
            open_info: OpenInfo::default(),
            cam: CamBuffers::default(),
            drp_level: DRP_LEVEL_UNSET,
            set_infmt_flag: false,
            workers: None,
        }
    }

    /// Pipeline stage metrics.
    pub fn metrics(&self) -> PipelineMetrics {
        self.shared.metrics.clone()
    }

    /// Pipeline event counters.
    pub fn counters(&self) -> Metrics {
        self.shared.counters.clone()
    }

    /// Completion records not yet matched by a dequeue.
    pub fn pending_completions(&self) -> usize {
        self.shared.completions.len()
    }

    // ---- capture-driver entry points -------------------------------

    /// Next raw camera buffer address, rotating through the fixed set.
    /// Zero until the first queued buffer fetched the set.
    pub fn camera_phys_addr(&mut self) -> u64 {
        if !self.cam.got {
            return 0;
        }
        let value = self.cam.list[self.cam.next];
        self.cam.next += 1;
        if self.cam.next >= self.cam.count {
            self.cam.next = 0;
        }
        value
    }

    /// Record a DMA address pair for the next hardware run.
    pub fn queue_dma(&self, in_addr: u64, out_addr: u64) -> IspResult<()> {
        self.shared
            .dma
            .lock()
            .enqueue(DmaJob { in_addr, out_addr })
    }

    /// A capture buffer finished filling; hand it to the go thread.
    pub fn buffer_ready(&self, index: u32) {
        // The ring overwrites its oldest entry when the go thread lags,
        // like the fixed receiver slot ring it mirrors.
        self.shared.ready_ring.force_push(index);
        self.shared.go_wait.notify_one();
    }

    /// Wait point for dequeue retries; notified on every completion.
    pub fn dequeue_wait(&self) -> &WaitQueue {
        &self.shared.dequeue_wait
    }

    // ---- ioctl surface ---------------------------------------------

    pub fn querycap(&mut self) -> VqResult<Capability> {
        let mut cap = self.queue.querycap()?;
        cap.driver = DRIVER_NAME.into();
        cap.card = CARD_NAME.into();
        Ok(cap)
    }

    pub fn try_fmt(&mut self, fmt: &mut PixFormat) -> VqResult<()> {
        self.queue.try_fmt(fmt)
    }

    pub fn g_fmt(&mut self) -> VqResult<PixFormat> {
        self.queue.g_fmt()
    }

    pub fn s_fmt(&mut self, fmt: &mut PixFormat) -> VqResult<()> {
        let out_format = match fmt.pixelformat {
            fourcc::YUYV => OutputFormat::Yuy2,
            fourcc::UYVY => OutputFormat::Uyvy,
            fourcc::RGB24 => OutputFormat::Rgb888,
            fourcc::ARGB32 => OutputFormat::Argb8888,
            fourcc::XRGB32 => OutputFormat::Xrgb8888,
            _ => return Err(EINVAL),
        };

        // A new format negotiation resets the pending open; the input
        // format and frame interval survive it.
        self.open_info.out_format = out_format;
        self.open_info.width = fmt.width;
        self.open_info.height = fmt.height;
        self.open_info.opened = false;
        *self.shared.set_ae.lock() = AeSettings::default();

        self.queue.s_fmt(fmt)
    }

    pub fn enum_fmt(&mut self, index: u32) -> VqResult<u32> {
        self.queue.enum_fmt(index)
    }

    pub fn g_selection(&mut self, sel: &mut Selection) -> VqResult<()> {
        self.queue.g_selection(sel)
    }

    pub fn s_selection(&mut self, sel: &mut Selection) -> VqResult<()> {
        self.queue.s_selection(sel)
    }

    pub fn enuminput(&mut self, index: u32) -> VqResult<String> {
        self.queue.enuminput(index)
    }

    pub fn g_input(&mut self) -> VqResult<u32> {
        self.queue.g_input()
    }

    pub fn s_input(&mut self, input: u32) -> VqResult<()> {
        self.queue.s_input(input)
    }

    pub fn reqbufs(&mut self, count: u32) -> VqResult<u32> {
        self.queue.reqbufs(count)
    }

    pub fn create_bufs(&mut self, count: u32) -> VqResult<u32> {
        self.queue.create_bufs(count)
    }

    pub fn querybuf(&mut self, index: u32) -> VqResult<()> {
        if !self.open_info.opened {
            self.isp_start()?;
            self.open_info.opened = true;
        }
        self.queue.querybuf(index)
    }

    pub fn qbuf(&mut self, index: u32) -> VqResult<()> {
        if !self.cam.got {
            let buffers = self
                .shared
                .session
                .lock()
                .input_buffers()
                .map_err(|e| e.errno())?;
            if buffers.iter().all(|a| *a == 0) {
                return Err(ENOSPC);
            }
            self.cam.list = buffers;
            self.cam.count = CAM_BUFFER_COUNT;
            self.cam.next = 0;
            self.cam.got = true;
            self.shared.dma.lock().clear();
        }
        self.queue.qbuf(index)
    }

    /// Dequeue a finished buffer. When the buffer's job completion is at
    /// the head of the completion queue, the buffer goes straight back to
    /// the capture queue and the job's stored error code is surfaced
    /// instead of the dequeue result.
    pub fn dqbuf(&mut self) -> VqResult<u32> {
        let index = self.queue.dqbuf()?;

        if let Some(record) = self.shared.completions.pop_head_if_match(index) {
            debug!("dqbuf {index}: surfacing deferred code {}", record.code);
            self.queue.qbuf(index)?;
            if record.code < 0 {
                return Err(record.code);
            }
        }
        Ok(index)
    }

    pub fn expbuf(&mut self, index: u32) -> VqResult<()> {
        self.queue.expbuf(index)
    }

    pub fn prepare_buf(&mut self, index: u32) -> VqResult<()> {
        self.queue.prepare_buf(index)
    }

    pub fn streamon(&mut self) -> VqResult<()> {
        let in_format = if self.set_infmt_flag {
            self.open_info.in_format
        } else {
            self.shared
                .session
                .lock()
                .get_param()
                .map(|p| p.in_format)
                .unwrap_or(self.open_info.in_format)
        };
        self.set_infmt_flag = false;

        let bus = in_format.bus_code();
        let (width, height) = (self.open_info.width, self.open_info.height);
        self.csi.set_format(bus, width, height).map_err(|_| EPIPE)?;
        self.shared
            .sensor
            .lock()
            .set_format(bus, width, height)
            .map_err(|_| EPIPE)?;

        // Prime the sensor with the current exposure decision so the
        // first frames are not wildly off before the loop engages.
        if self.shared.set_ae.lock().ae_on != 0 {
            let exposure = self.shared.session.lock().ae_get();
            let mut sensor = self.shared.sensor.lock();
            let _ = sensor.set_gain(exposure.gain);
            let _ = sensor.set_exposure(exposure.time);
        }

        self.queue.streamon()
    }

    pub fn streamoff(&mut self) -> VqResult<()> {
        let mut ret = self.queue.streamoff();
        if self.open_info.opened {
            ret = self.isp_finish();
            self.open_info.opened = false;
        }
        ret
    }

    pub fn log_status(&mut self) -> VqResult<()> {
        self.queue.log_status()
    }

    pub fn subscribe_event(&mut self, event: u32) -> VqResult<()> {
        self.queue.subscribe_event(event)
    }

    pub fn unsubscribe_event(&mut self, event: u32) -> VqResult<()> {
        self.queue.unsubscribe_event(event)
    }

    pub fn s_ctrl(&mut self, id: u32, value: ControlValue) -> VqResult<()> {
        let Some(cid) = IspCid::from_raw(id) else {
            let scalar = value.as_int().ok_or(EINVAL)?;
            return self.queue.s_ctrl(id, scalar);
        };

        match cid {
            IspCid::All => {
                let blob = value.as_blob().ok_or(EINVAL)?;
                self.shared
                    .session
                    .lock()
                    .set_all(blob)
                    .map_err(|e| e.errno())
            }
            _ => {
                let scalar = value.as_int().ok_or(EINVAL)?;
                self.s_ctrl_scalar(cid, scalar)
            }
        }
    }

    fn s_ctrl_scalar(&mut self, cid: IspCid, value: i32) -> VqResult<()> {
        match cid {
            IspCid::InFormat => {
                let format = match value {
                    0 => InputFormat::Raw8,
                    1 => InputFormat::Raw10,
                    2 => InputFormat::Raw12,
                    _ => return Err(EINVAL),
                };
                self.open_info.in_format = format;
                self.set_infmt_flag = true;
                Ok(())
            }
            IspCid::FrameInterval => {
                if !(0..=u16::MAX as i32).contains(&value) {
                    return Err(EINVAL);
                }
                self.open_info.frame_interval = value as u16;
                Ok(())
            }
            IspCid::BlackLevel => self.engine_set(IspFunc::BlackLevel, value),
            IspCid::WbPreset => self.engine_set(IspFunc::WhiteBalance, value),
            IspCid::Gamma => self.engine_set(IspFunc::Gamma, value),
            IspCid::CmxPreset => self.engine_set(IspFunc::ColorMatrix, value),
            IspCid::Nr2d => self.engine_set(IspFunc::Nr2d, value),
            IspCid::Nr3d => self.engine_set(IspFunc::Nr3d, value),
            IspCid::Emphasis => self.engine_set(IspFunc::Emphasis, value),
            IspCid::AwbEnable => self.engine_set(IspFunc::Awb, value),
            IspCid::DrpLevel => {
                if value < 0 {
                    return Err(EINVAL);
                }
                self.drp_level = value;
                Ok(())
            }
            IspCid::AeEnable => self.set_ae_field(value, AeField::Enable),
            IspCid::ExposeLevel => self.set_ae_field(value, AeField::ExposeLevel),
            IspCid::TargetLuma => self.set_ae_field(value, AeField::TargetLuma),
            IspCid::AeThreshold => self.set_ae_field(value, AeField::Threshold),
            IspCid::All => Err(EINVAL),
        }
    }

    pub fn g_ext_ctrl(&mut self, id: u32) -> VqResult<ControlValue> {
        let Some(cid) = IspCid::from_raw(id) else {
            return Err(EINVAL);
        };
        match cid {
            IspCid::InFormat => Ok(ControlValue::Int(self.open_info.in_format as i32)),
            IspCid::FrameInterval => Ok(ControlValue::Int(self.open_info.frame_interval as i32)),
            IspCid::DrpLevel => Ok(ControlValue::Int(self.drp_level)),
            IspCid::AeEnable => self.param_field(|p| p.ae_enabled as i32),
            IspCid::ExposeLevel => self.param_field(|p| p.expose_level),
            IspCid::TargetLuma => self.param_field(|p| p.target_luma),
            IspCid::AeThreshold => self.param_field(|p| p.threshold),
            IspCid::All => {
                let image = self
                    .shared
                    .session
                    .lock()
                    .get_all()
                    .map_err(|e| e.errno())?;
                Ok(ControlValue::Blob(image))
            }
            IspCid::BlackLevel => self.engine_get(IspFunc::BlackLevel),
            IspCid::WbPreset => self.engine_get(IspFunc::WhiteBalance),
            IspCid::Gamma => self.engine_get(IspFunc::Gamma),
            IspCid::CmxPreset => self.engine_get(IspFunc::ColorMatrix),
            IspCid::Nr2d => self.engine_get(IspFunc::Nr2d),
            IspCid::Nr3d => self.engine_get(IspFunc::Nr3d),
            IspCid::Emphasis => self.engine_get(IspFunc::Emphasis),
            IspCid::AwbEnable => self.engine_get(IspFunc::Awb),
        }
    }

    // ---- internals -------------------------------------------------

    fn engine_set(&mut self, func: IspFunc, value: i32) -> VqResult<()> {
        self.shared
            .session
            .lock()
            .set(func, value)
            .map_err(|e| e.errno())
    }

    fn engine_get(&mut self, func: IspFunc) -> VqResult<ControlValue> {
        self.shared
            .session
            .lock()
            .get(func)
            .map(ControlValue::Int)
            .map_err(|e| e.errno())
    }

    fn param_field(
        &mut self,
        pick: impl Fn(&rzisp_engine::prelude::SessionParams) -> i32,
    ) -> VqResult<ControlValue> {
        self.shared
            .session
            .lock()
            .get_param()
            .map(|p| ControlValue::Int(pick(&p)))
            .map_err(|e| e.errno())
    }

    /// Apply one field of the cached exposure quad, undoing the change
    /// when the engine rejects the combination.
    fn set_ae_field(&mut self, value: i32, field: AeField) -> VqResult<()> {
        let mut quad = *self.shared.set_ae.lock();
        match field {
            AeField::Enable => quad.ae_on = value,
            AeField::ExposeLevel => quad.expose_level = value,
            AeField::TargetLuma => quad.target_y = value,
            AeField::Threshold => quad.threshold = value,
        }
        let result = self.shared.session.lock().ae_set(
            quad.ae_on != 0,
            quad.expose_level,
            quad.target_y,
            quad.threshold,
        );
        match result {
            Ok(()) => {
                *self.shared.set_ae.lock() = quad;
                Ok(())
            }
            Err(err) => Err(err.errno()),
        }
    }

    /// Lazy engine bring-up on the first buffer query.
    fn isp_start(&mut self) -> VqResult<()> {
        let info = self.open_info;
        let source_fourcc = match info.in_format {
            InputFormat::Raw8 => fourcc::SRGGB8,
            InputFormat::Raw10 => fourcc::SRGGB10,
            InputFormat::Raw12 => fourcc::SRGGB12,
        };
        self.queue.set_source_format(source_fourcc);
        let stride = info.in_format.bytes_per_line(info.width);
        let geometry = FrameGeometry::new(info.width, info.height, stride);

        {
            let mut session = self.shared.session.lock();
            session
                .open(
                    geometry,
                    info.frame_interval,
                    info.in_format as u16,
                    info.out_format.to_raw() as u16,
                )
                .map_err(|e| e.errno())?;

            let params = session.get_param().map_err(|e| e.errno())?;
            if self.drp_level == DRP_LEVEL_UNSET {
                self.drp_level = params.drp_priority;
            }
            *self.shared.set_ae.lock() = AeSettings {
                ae_on: params.ae_enabled as i32,
                expose_level: params.expose_level,
                target_y: params.target_luma,
                threshold: params.threshold,
            };
        }

        self.shared.completions.clear();
        self.shared.dma.lock().clear();
        self.shared.busy.store(false, Ordering::Release);
        while self.shared.ready_ring.pop().is_some() {}
        self.cam = CamBuffers::default();

        self.workers = Some(worker::spawn(Arc::clone(&self.shared)));
        debug!("pipeline started {}x{}", info.width, info.height);
        Ok(())
    }

    /// Ordered teardown: stop flag, then wake, then join, feedback thread
    /// before go thread; both queues drain around the engine close.
    fn isp_finish(&mut self) -> VqResult<()> {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(workers) = self.workers.take() {
            self.shared.feedback_wait.notify_all();
            let _ = workers.feedback.join();
            self.shared.go_wait.notify_all();
            let _ = workers.go.join();
        }

        self.shared.dma.lock().clear();
        let ret = self
            .shared
            .session
            .lock()
            .close()
            .map_err(|e| e.errno());
        self.shared.completions.clear();
        self.shared.busy.store(false, Ordering::Release);
        while self.shared.ready_ring.pop().is_some() {}
        debug!("pipeline stopped");
        ret
    }
}
