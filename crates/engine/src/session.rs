//! The staging-engine session: one open stream's operating state, its
//! parameter block, and the per-frame control-loop bookkeeping.

use log::debug;

use rzisp_core::prelude::*;

use crate::accel::{AccelJob, Accelerator, CompletionFn, JobRegion};
use crate::ae::{AeController, SensorExposure, measure_luminance};
use crate::awb::{AwbController, CH_B, CH_R};
use crate::blob::{self, AeFields, AwbFields, BlobVersion, bit, pos};
use crate::config::ConfigSet;
use crate::gamma::gamma_table;
use crate::mem::{WorkRam, map, param};
use crate::state::OpState;
use crate::tuning::{
    self, CMX_PRESETS, EMPHASIS_CORING, EMPHASIS_STEPS, WB_PRESETS, WbPreset, nr2d_blend, nr3d,
};

/// Number of raw camera ring buffers carved out of the work region.
pub const CAM_BUFFER_COUNT: usize = 4;

/// Parameter functions addressable through `set`/`get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspFunc {
    All = 0,
    BlackLevel = 1,
    WhiteBalance = 2,
    Gamma = 3,
    ColorMatrix = 4,
    Nr2d = 5,
    Nr3d = 6,
    Emphasis = 7,
    Awb = 8,
}

impl IspFunc {
    pub fn from_raw(raw: i32) -> Option<IspFunc> {
        match raw {
            0 => Some(IspFunc::All),
            1 => Some(IspFunc::BlackLevel),
            2 => Some(IspFunc::WhiteBalance),
            3 => Some(IspFunc::Gamma),
            4 => Some(IspFunc::ColorMatrix),
            5 => Some(IspFunc::Nr2d),
            6 => Some(IspFunc::Nr3d),
            7 => Some(IspFunc::Emphasis),
            8 => Some(IspFunc::Awb),
            _ => None,
        }
    }
}

/// What a finished job hands back to the pipeline: the job result and the
/// output buffer it rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFeedback {
    pub result: i32,
    pub out_addr: u64,
}

/// Read accessor bundle for the session scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub in_format: InputFormat,
    pub frame_interval: u16,
    pub drp_priority: i32,
    pub ae_enabled: bool,
    pub expose_level: i32,
    pub target_luma: i32,
    pub threshold: i32,
}

/// One staging-engine session.
///
/// # Example
/// ```rust
/// use rzisp_core::prelude::FrameGeometry;
/// use rzisp_engine::accel::SimulatedAccelerator;
/// use rzisp_engine::session::Session;
///
/// let mut session = Session::new(SimulatedAccelerator::new(), 0x8000_0000);
/// session
///     .open(FrameGeometry::new(640, 480, 640), 33, 1, 0x01)
///     .unwrap();
/// session.close().unwrap();
/// ```
pub struct Session<A: Accelerator> {
    state: OpState,
    accel: A,
    work: WorkRam,
    configs: ConfigSet,
    config_size: usize,

    in_format: InputFormat,
    out_format: OutputFormat,
    geometry: FrameGeometry,
    frame_interval: u16,
    drp_priority: i32,

    ae: AeController,
    awb: AwbController,
    accumulate_on: bool,
    area: (u16, u16, u16, u16),
    /// Open-time white-balance gains feeding the luminance measurement.
    wb_luma_gain: [u16; 3],

    cmx_presets: [[u16; 9]; 4],
    wb_presets: [WbPreset; 4],

    val_bl: i32,
    val_wb: i32,
    val_gamma: i32,
    val_cmx: i32,
    val_2dnr: i32,
    val_3dnr: i32,
    val_emp: i32,
    val_awb: i32,

    all_v10: Vec<u8>,
    all_v11: Vec<u8>,
    active_version: BlobVersion,

    out_image_addr: u64,
}

impl<A: Accelerator> Session<A> {
    /// Bind a session to an accelerator and the reserved work region.
    pub fn new(accel: A, work_base: u64) -> Session<A> {
        Session::with_configs(accel, work_base, ConfigSet::default())
    }

    /// Bind with externally supplied configuration images.
    pub fn with_configs(accel: A, work_base: u64, configs: ConfigSet) -> Session<A> {
        Session {
            state: OpState::Init,
            accel,
            work: WorkRam::reserve(work_base),
            configs,
            config_size: 0,
            in_format: InputFormat::Raw10,
            out_format: OutputFormat::Uyvy,
            geometry: FrameGeometry::new(0, 0, 0),
            frame_interval: limits::FRM_INTERVAL_DEFAULT,
            drp_priority: 0,
            ae: AeController::new(limits::FRM_INTERVAL_DEFAULT),
            awb: AwbController::new(),
            accumulate_on: false,
            area: (0, 0, 0, 0),
            wb_luma_gain: WB_PRESETS[limits::WB_DEFAULT as usize].to_words(),
            cmx_presets: CMX_PRESETS,
            wb_presets: WB_PRESETS,
            val_bl: limits::BL_DEFAULT,
            val_wb: limits::WB_DEFAULT,
            val_gamma: limits::GAMMA_DEFAULT,
            val_cmx: limits::CMX_DEFAULT,
            val_2dnr: limits::NR2D_DEFAULT,
            val_3dnr: limits::NR3D_DEFAULT,
            val_emp: limits::EMP_DEFAULT,
            val_awb: 0,
            all_v10: blob::default_v10(),
            all_v11: blob::default_v11(),
            active_version: BlobVersion::V11,
            out_image_addr: 0,
        }
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    /// Shared handle to the work region (the simulated accelerator writes
    /// accumulator statistics through it).
    pub fn work_ram(&self) -> WorkRam {
        self.work.clone()
    }

    /// Configure the session and claim the accelerator.
    pub fn open(
        &mut self,
        geometry: FrameGeometry,
        frame_interval: u16,
        in_format_raw: u16,
        out_format_raw: u16,
    ) -> IspResult<()> {
        self.state.require(OpState::Init)?;

        geometry.validate()?;
        let in_format = InputFormat::from_raw(in_format_raw).ok_or(IspError::InvalidArgument)?;
        let out_format = OutputFormat::from_raw(out_format_raw).ok_or(IspError::InvalidArgument)?;

        self.accel.open()?;

        self.in_format = in_format;
        self.out_format = out_format;
        self.geometry = geometry;
        self.frame_interval = if frame_interval == 0 {
            limits::FRM_INTERVAL_DEFAULT
        } else {
            frame_interval
        };
        self.drp_priority = 0;

        self.stage_config(out_format.to_raw());

        self.ae = AeController::new(self.frame_interval);
        self.awb = AwbController::new();
        self.accumulate_on = true;
        self.area = (
            geometry.width / 4,
            geometry.height / 4,
            geometry.width / 2,
            geometry.height / 2,
        );
        self.cmx_presets = CMX_PRESETS;
        self.wb_presets = WB_PRESETS;
        self.wb_luma_gain = self.wb_presets[limits::WB_DEFAULT as usize].to_words();

        // The temporal filter's previous-frame area starts as mid gray.
        self.work
            .fill_u32(map::NR3D_SCRATCH, 0x8000_8000, map::NR3D_CLEAR_SIZE);

        self.write_default_params();
        self.work
            .write(map::GAMMA, &gamma_table(limits::GAMMA_DEFAULT));

        self.val_bl = limits::BL_DEFAULT;
        self.val_wb = limits::WB_DEFAULT;
        self.val_gamma = limits::GAMMA_DEFAULT;
        self.val_cmx = limits::CMX_DEFAULT;
        self.val_2dnr = limits::NR2D_DEFAULT;
        self.val_3dnr = limits::NR3D_DEFAULT;
        self.val_emp = limits::EMP_DEFAULT;
        self.val_awb = 0;
        self.all_v10 = blob::default_v10();
        self.all_v11 = blob::default_v11();
        self.active_version = BlobVersion::V11;

        self.state = OpState::Ready;
        debug!(
            "session open {}x{} stride {} interval {}ms",
            geometry.width, geometry.height, geometry.stride, self.frame_interval
        );
        Ok(())
    }

    /// Release the accelerator and drop back to the unconfigured state.
    pub fn close(&mut self) -> IspResult<()> {
        self.state.forbid(OpState::Init)?;
        self.accel.close()?;
        self.state = OpState::Init;
        debug!("session closed");
        Ok(())
    }

    /// Select and stage the configuration image for the current input
    /// depth and an output-format byte.
    fn stage_config(&mut self, out_format_byte: u8) {
        let family = match out_format_byte {
            0x00 | 0x01 => ColorFamily::Yuv,
            _ => ColorFamily::Rgb,
        };
        let image = self.configs.select(self.in_format, family);
        self.config_size = image.len();
        let image = image.to_vec();
        self.work.write(map::CONFIG, &image);
    }

    fn write_default_params(&mut self) {
        let mut block = [0u8; param::SIZE];
        let put_u32 = |block: &mut [u8], at: usize, v: u32| {
            block[at..at + 4].copy_from_slice(&v.to_le_bytes());
        };
        let put_u16 = |block: &mut [u8], at: usize, v: u16| {
            block[at..at + 2].copy_from_slice(&v.to_le_bytes());
        };
        let put_i16 = |block: &mut [u8], at: usize, v: i16| {
            block[at..at + 2].copy_from_slice(&v.to_le_bytes());
        };

        put_u32(&mut block, param::ACCUM_ADDR, self.work.addr_of(map::ACCUM) as u32);
        put_u32(&mut block, param::GAMMA_ADDR, self.work.addr_of(map::GAMMA) as u32);
        let nr3d_addr = if limits::NR3D_DEFAULT == 0 {
            0
        } else {
            self.work.addr_of(map::NR3D_SCRATCH) as u32
        };
        put_u32(&mut block, param::NR3D_ADDR, nr3d_addr);
        put_u16(&mut block, param::RECT, self.geometry.width);
        put_u16(&mut block, param::RECT + 2, self.geometry.height);
        put_u16(&mut block, param::RECT + 4, self.geometry.stride);
        let wb = self.wb_presets[limits::WB_DEFAULT as usize].to_words();
        for (i, word) in wb.iter().enumerate() {
            put_u16(&mut block, param::WB + i * 2, *word);
        }
        put_u16(&mut block, param::ACC_AREA, self.area.0);
        put_u16(&mut block, param::ACC_AREA + 2, self.area.1);
        put_u16(&mut block, param::ACC_AREA + 4, self.area.2);
        put_u16(&mut block, param::ACC_AREA + 6, self.area.3);
        for (i, coef) in self.cmx_presets[limits::CMX_DEFAULT as usize].iter().enumerate() {
            put_u16(&mut block, param::CMX + i * 2, *coef);
        }
        put_u16(&mut block, param::NR3D_DATA, nr3d::Y_THRES_A);
        put_u16(&mut block, param::NR3D_DATA + 2, nr3d::Y_THRES_B);
        put_u16(&mut block, param::NR3D_DATA + 4, nr3d::Y_TILT);
        put_u16(&mut block, param::NR3D_DATA + 6, nr3d::C_THRES_A);
        put_u16(&mut block, param::NR3D_DATA + 8, nr3d::C_THRES_B);
        put_u16(&mut block, param::NR3D_DATA + 10, nr3d::C_TILT);
        block[param::NR3D_DATA + 12] = nr3d::Y_COEF;
        block[param::NR3D_DATA + 13] = nr3d::C_COEF;
        block[param::NR3D_DATA + 14] = nr3d::Y_ALPHA_MAX;
        block[param::NR3D_DATA + 15] = nr3d::C_ALPHA_MAX;
        put_i16(&mut block, param::BL, -(limits::BL_DEFAULT as i16));
        put_i16(&mut block, param::BL + 2, -(limits::BL_DEFAULT as i16));
        put_i16(&mut block, param::BL + 4, -(limits::BL_DEFAULT as i16));
        block[param::GAMMA_FLAG] = if limits::GAMMA_DEFAULT == 100 { 0 } else { 1 };
        block[param::ACC_FLAG] = 1;
        put_u16(&mut block, param::NR2D, nr2d_blend(limits::NR2D_DEFAULT));
        block[param::EMP] = EMPHASIS_STEPS[limits::EMP_DEFAULT as usize];
        block[param::CORING] = EMPHASIS_CORING;
        block[param::OUT_FMT] = self.out_format.to_raw();
        put_u16(&mut block, param::AWB_THRESH_WHITE, tuning::awb::THRESH_WHITE);
        put_u16(&mut block, param::AWB_THRESH_SAT, tuning::awb::THRESH_SAT);
        put_u16(&mut block, param::AWB_THRESH_RGB_L, tuning::awb::THRESH_RGB_L);
        put_u16(&mut block, param::AWB_THRESH_RGB_H, tuning::awb::THRESH_RGB_H);
        let gains = self.awb.gains();
        put_u16(&mut block, param::R_GAIN, gains[CH_R] as u16);
        put_u16(&mut block, param::B_GAIN, gains[CH_B] as u16);
        put_u16(&mut block, param::WHITE_CLIP, tuning::awb::WHITE_CLIP);

        self.work.write(map::PARAM, &block);
    }

    /// Set one scalar parameter function.
    pub fn set(&mut self, func: IspFunc, value: i32) -> IspResult<()> {
        self.state.require(OpState::Ready)?;
        match func {
            IspFunc::All => Err(IspError::InvalidArgument),
            IspFunc::BlackLevel => {
                if !(limits::BL_MIN..=limits::BL_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                let bias = (-(value as i16)).to_le_bytes();
                let mut bytes = [0u8; 6];
                for ch in 0..3 {
                    bytes[ch * 2..ch * 2 + 2].copy_from_slice(&bias);
                }
                self.work.write(map::PARAM + param::BL, &bytes);
                self.val_bl = value;
                Ok(())
            }
            IspFunc::WhiteBalance => {
                if !(limits::WB_MIN..=limits::WB_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                self.write_wb_preset(value as usize);
                self.val_wb = value;
                Ok(())
            }
            IspFunc::Gamma => {
                if !(limits::GAMMA_MIN..=limits::GAMMA_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                self.work.write(map::GAMMA, &gamma_table(value));
                let flag = if value == limits::GAMMA_DEFAULT { 0u8 } else { 1u8 };
                self.work.write(map::PARAM + param::GAMMA_FLAG, &[flag]);
                self.val_gamma = value;
                Ok(())
            }
            IspFunc::ColorMatrix => {
                if !(limits::CMX_MIN..=limits::CMX_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                self.write_cmx_preset(value as usize);
                self.val_cmx = value;
                Ok(())
            }
            IspFunc::Nr2d => {
                if !(limits::NR2D_MIN..=limits::NR2D_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                self.work
                    .write(map::PARAM + param::NR2D, &nr2d_blend(value).to_le_bytes());
                self.val_2dnr = value;
                Ok(())
            }
            IspFunc::Nr3d => {
                if !(limits::NR3D_MIN..=limits::NR3D_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                let addr = if value == 0 {
                    0u32
                } else {
                    self.work.addr_of(map::NR3D_SCRATCH) as u32
                };
                self.work
                    .write(map::PARAM + param::NR3D_ADDR, &addr.to_le_bytes());
                self.val_3dnr = value;
                Ok(())
            }
            IspFunc::Emphasis => {
                if !(limits::EMP_MIN..=limits::EMP_MAX).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                let strength = EMPHASIS_STEPS[value as usize];
                self.work.write(map::PARAM + param::EMP, &[strength]);
                self.val_emp = value;
                Ok(())
            }
            IspFunc::Awb => {
                if !(0..=1).contains(&value) {
                    return Err(IspError::InvalidArgument);
                }
                self.val_awb = value;
                self.awb.set_manual(
                    value == 1,
                    limits::AWB_GAIN_DEFAULT,
                    limits::AWB_GAIN_DEFAULT,
                );
                Ok(())
            }
        }
    }

    fn write_wb_preset(&mut self, index: usize) {
        let words = self.wb_presets[index].to_words();
        let mut bytes = [0u8; 6];
        for (i, word) in words.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        self.work.write(map::PARAM + param::WB, &bytes);
    }

    fn write_cmx_preset(&mut self, index: usize) {
        let mut bytes = [0u8; 18];
        for (i, coef) in self.cmx_presets[index].iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&coef.to_le_bytes());
        }
        self.work.write(map::PARAM + param::CMX, &bytes);
    }

    fn save_both(&mut self, at: usize, bytes: &[u8]) {
        self.all_v10[at..at + bytes.len()].copy_from_slice(bytes);
        self.all_v11[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Apply a full-parameter image.
    ///
    /// Bits apply in ascending order; a validation failure in the late
    /// v1.1 AE/AWB sub-blocks aborts the call after the earlier bits have
    /// already been written. That partial-apply window matches the wire
    /// contract this engine replaces.
    pub fn set_all(&mut self, data: &[u8]) -> IspResult<()> {
        self.state.require(OpState::Ready)?;
        let version = blob::detect(data)?;
        self.active_version = version;
        let bits = blob::bitmap(data);

        if bits & bit::ACCUMULATE != 0 {
            let (_, _, w, h) = blob::accumulate_area(data);
            if w == 0 || h == 0 {
                return Err(IspError::InvalidArgument);
            }
        }

        if bits & bit::OUT_FORMAT != 0 {
            let byte = data[pos::OUT_FMT];
            self.work.write(map::PARAM + param::OUT_FMT, &[byte]);
            self.save_both(pos::OUT_FMT, &[byte]);
            self.stage_config(byte);
        }

        if bits & bit::ACCUMULATE != 0 {
            let on = data[pos::ACC_ON];
            self.work.write(map::PARAM + param::ACC_FLAG, &[on]);
            self.work
                .write(map::PARAM + param::ACC_AREA, &data[pos::AREA..pos::AREA + 8]);
            let (x, y, w, h) = blob::accumulate_area(data);
            self.area = (x, y, w, h);
            self.accumulate_on = on == 1 && w != 0 && h != 0;
            let saved = data[pos::ACC_ON..pos::ACC_ON + 9].to_vec();
            self.save_both(pos::ACC_ON, &saved);
        }

        if bits & bit::CMX_PRESET != 0 {
            for p in 0..4 {
                for i in 0..9 {
                    let at = pos::CMX_PRESET + p * 18 + i * 2;
                    self.cmx_presets[p][i] = blob::read_u16(data, at);
                }
            }
            self.val_cmx = -1;
            let saved = data[pos::CMX_PRESET..pos::CMX_PRESET + 72].to_vec();
            self.save_both(pos::CMX_PRESET, &saved);
        }

        if bits & bit::WB_PRESET != 0 {
            for p in 0..4 {
                let at = pos::WB_PRESET + p * 6;
                self.wb_presets[p] = WbPreset {
                    red: blob::read_u16(data, at),
                    green: blob::read_u16(data, at + 2),
                    blue: blob::read_u16(data, at + 4),
                };
            }
            self.val_wb = -1;
            let saved = data[pos::WB_PRESET..pos::WB_PRESET + 24].to_vec();
            self.save_both(pos::WB_PRESET, &saved);
        }

        if bits & bit::CMX_SELECT != 0 {
            let sel = data[pos::CMX_SELECT] as usize;
            if sel >= self.cmx_presets.len() {
                return Err(IspError::InvalidArgument);
            }
            self.write_cmx_preset(sel);
            self.val_cmx = -1;
            self.save_both(pos::CMX_SELECT, &[sel as u8]);
        }

        if bits & bit::WB_SELECT != 0 {
            let sel = data[pos::WB_SELECT] as usize;
            if sel >= self.wb_presets.len() {
                return Err(IspError::InvalidArgument);
            }
            self.write_wb_preset(sel);
            self.val_wb = -1;
            self.save_both(pos::WB_SELECT, &[sel as u8]);
        }

        if bits & bit::IMAGE_SIZE != 0 {
            self.work.write(
                map::PARAM + param::RECT,
                &data[pos::IMAGE_SIZE..pos::IMAGE_SIZE + 6],
            );
            let saved = data[pos::IMAGE_SIZE..pos::IMAGE_SIZE + 6].to_vec();
            self.save_both(pos::IMAGE_SIZE, &saved);
        }

        if bits & bit::NR3D != 0 {
            self.work.write(
                map::PARAM + param::NR3D_DATA,
                &data[pos::NR3D_DATA..pos::NR3D_DATA + 16],
            );
            self.val_3dnr = -1;
            let saved = data[pos::NR3D_DATA..pos::NR3D_DATA + 16].to_vec();
            self.save_both(pos::NR3D_DATA, &saved);
        }

        if bits & bit::BLACK_BIAS != 0 {
            self.work
                .write(map::PARAM + param::BL, &data[pos::BIAS..pos::BIAS + 6]);
            self.val_bl = -1;
            let saved = data[pos::BIAS..pos::BIAS + 6].to_vec();
            self.save_both(pos::BIAS, &saved);
        }

        if bits & bit::NR2D != 0 {
            self.work
                .write(map::PARAM + param::NR2D, &data[pos::NR2D..pos::NR2D + 2]);
            self.val_2dnr = -1;
            let saved = data[pos::NR2D..pos::NR2D + 2].to_vec();
            self.save_both(pos::NR2D, &saved);
        }

        if bits & bit::EMPHASIS != 0 {
            self.work
                .write(map::PARAM + param::EMP, &data[pos::EMP..pos::EMP + 2]);
            self.val_emp = -1;
            let saved = data[pos::EMP..pos::EMP + 2].to_vec();
            self.save_both(pos::EMP, &saved);
        }

        match version {
            BlobVersion::V10 => {
                if bits & bit::GAMMA_V10 != 0 {
                    self.work
                        .write(map::PARAM + param::GAMMA_FLAG, &[data[pos::GAMMA_ON_V10]]);
                    self.work.write(
                        map::GAMMA,
                        &data[pos::GAMMA_TBL_V10..pos::GAMMA_TBL_V10 + 0x100],
                    );
                    self.val_gamma = -1;
                    self.all_v10[pos::GAMMA_ON_V10..pos::GAMMA_ON_V10 + 0x101]
                        .copy_from_slice(&data[pos::GAMMA_ON_V10..pos::GAMMA_ON_V10 + 0x101]);
                }
            }
            BlobVersion::V11 => {
                if bits & bit::AE != 0 {
                    let ae = AeFields::parse(data)?;
                    self.all_v11[pos::AE_ON..pos::AE_ON + 5]
                        .copy_from_slice(&data[pos::AE_ON..pos::AE_ON + 5]);
                    self.ae
                        .set_parameters(ae.enabled, ae.expose_level, ae.target, ae.threshold);
                }
                if bits & bit::GAMMA_V11 != 0 {
                    self.work
                        .write(map::PARAM + param::GAMMA_FLAG, &[data[pos::GAMMA_ON_V11]]);
                    self.work.write(
                        map::GAMMA,
                        &data[pos::GAMMA_TBL_V11..pos::GAMMA_TBL_V11 + 0x100],
                    );
                    self.val_gamma = -1;
                    self.all_v11[pos::GAMMA_ON_V11..pos::GAMMA_ON_V11 + 0x101]
                        .copy_from_slice(&data[pos::GAMMA_ON_V11..pos::GAMMA_ON_V11 + 0x101]);
                }
                if bits & bit::AWB != 0 {
                    let awb = AwbFields::parse(data)?;
                    self.all_v11[pos::AWB_MANUAL..pos::AWB_MANUAL + 5]
                        .copy_from_slice(&data[pos::AWB_MANUAL..pos::AWB_MANUAL + 5]);
                    self.awb.set_manual(awb.manual, awb.rgain, awb.bgain);
                    self.val_awb = awb.manual as i32;
                }
            }
        }
        Ok(())
    }

    /// Reconfigure the exposure loop (resets history, rebuilds the
    /// exposure table).
    pub fn ae_set(
        &mut self,
        enabled: bool,
        expose_level: i32,
        target: i32,
        threshold: i32,
    ) -> IspResult<()> {
        self.state.require(OpState::Ready)?;
        self.ae.configure(enabled, expose_level, target, threshold)
    }

    /// Sensor gain/exposure pair for the current exposure level.
    pub fn ae_get(&self) -> SensorExposure {
        self.ae.sensor_exposure()
    }

    /// Stage a job: write the frame addresses and current white-balance
    /// gains, then start the accelerator. `done` is invoked once from the
    /// accelerator's completion context with the job result.
    pub fn submit(&mut self, in_addr: u64, out_addr: u64, done: CompletionFn) -> IspResult<()> {
        self.state.require(OpState::Ready)?;
        if in_addr == 0 || out_addr == 0 {
            return Err(IspError::InvalidArgument);
        }

        self.work
            .write(map::PARAM + param::SRC, &(in_addr as u32).to_le_bytes());
        self.work
            .write(map::PARAM + param::DST, &(out_addr as u32).to_le_bytes());
        let gains = self.awb.gains();
        self.work.write(
            map::PARAM + param::R_GAIN,
            &(gains[CH_R] as u16).to_le_bytes(),
        );
        self.work.write(
            map::PARAM + param::B_GAIN,
            &(gains[CH_B] as u16).to_le_bytes(),
        );

        self.out_image_addr = out_addr;

        let job = AccelJob {
            config: JobRegion {
                address: self.work.addr_of(map::CONFIG),
                size: self.config_size,
            },
            params: JobRegion {
                address: self.work.addr_of(map::PARAM),
                size: param::SIZE,
            },
        };
        self.accel.start(job, done)?;
        self.state = OpState::Run;
        Ok(())
    }

    /// Digest a job completion: run the control loops over the
    /// accumulated statistics and drop back to the idle state. Returns
    /// the feedback the pipeline forwards, or `None` when no job was in
    /// flight.
    pub fn complete(&mut self, result: i32) -> Option<FrameFeedback> {
        if self.state != OpState::Run {
            return None;
        }

        let stats = self.work.accum_stats();
        if self.ae.enabled() && self.accumulate_on {
            if let Some(lum) =
                measure_luminance(&stats, self.area.2, self.area.3, self.wb_luma_gain)
            {
                self.ae.evaluate(lum);
            }
        }
        self.awb.evaluate(&stats);

        self.state = OpState::Ready;
        Some(FrameFeedback {
            result,
            out_addr: self.out_image_addr,
        })
    }

    /// Physical addresses of the raw camera ring buffers. Valid whenever
    /// a session is open.
    pub fn input_buffers(&self) -> IspResult<[u64; CAM_BUFFER_COUNT]> {
        self.state.forbid(OpState::Init)?;
        let mut addrs = [0u64; CAM_BUFFER_COUNT];
        for (i, addr) in addrs.iter_mut().enumerate() {
            *addr = self.work.ring_addr(i);
        }
        Ok(addrs)
    }

    /// Read one scalar parameter function.
    pub fn get(&self, func: IspFunc) -> IspResult<i32> {
        self.state.require(OpState::Ready)?;
        match func {
            IspFunc::All => Err(IspError::InvalidArgument),
            IspFunc::BlackLevel => Ok(self.val_bl),
            IspFunc::WhiteBalance => Ok(self.val_wb),
            IspFunc::Gamma => Ok(self.val_gamma),
            IspFunc::ColorMatrix => Ok(self.val_cmx),
            IspFunc::Nr2d => Ok(self.val_2dnr),
            IspFunc::Nr3d => Ok(self.val_3dnr),
            IspFunc::Emphasis => Ok(self.val_emp),
            IspFunc::Awb => Ok(self.val_awb),
        }
    }

    /// Read back the retained full-parameter image for the version last
    /// applied (v1.1 after open).
    pub fn get_all(&self) -> IspResult<Vec<u8>> {
        self.state.require(OpState::Ready)?;
        Ok(match self.active_version {
            BlobVersion::V10 => self.all_v10.clone(),
            BlobVersion::V11 => self.all_v11.clone(),
        })
    }

    /// Read the session scalars.
    pub fn get_param(&self) -> IspResult<SessionParams> {
        self.state.require(OpState::Ready)?;
        Ok(SessionParams {
            in_format: self.in_format,
            frame_interval: self.frame_interval,
            drp_priority: self.drp_priority,
            ae_enabled: self.ae.enabled(),
            expose_level: self.ae.expose_level(),
            target_luma: self.ae.target(),
            threshold: self.ae.threshold(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::SimulatedAccelerator;
    use crate::mem::AccumStats;

    fn open_session() -> (Session<SimulatedAccelerator>, SimulatedAccelerator) {
        let accel = SimulatedAccelerator::new();
        let handle = accel.handle();
        let mut session = Session::new(accel, 0x8000_0000);
        session
            .open(FrameGeometry::new(640, 480, 640), 33, 1, 0x01)
            .unwrap();
        (session, handle)
    }

    #[test]
    fn open_transitions_to_ready() {
        let (session, _) = open_session();
        assert_eq!(session.state(), OpState::Ready);
        let params = session.get_param().unwrap();
        assert_eq!(params.in_format, InputFormat::Raw10);
        assert_eq!(params.frame_interval, 33);
        assert!(!params.ae_enabled);
        assert_eq!(params.expose_level, 100);
    }

    #[test]
    fn open_rejects_odd_geometry_and_stays_init() {
        let accel = SimulatedAccelerator::new();
        let mut session = Session::new(accel, 0x8000_0000);
        assert_eq!(
            session.open(FrameGeometry::new(641, 480, 642), 33, 1, 0x01),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(session.state(), OpState::Init);
    }

    #[test]
    fn open_rejects_unknown_formats() {
        let accel = SimulatedAccelerator::new();
        let mut session = Session::new(accel, 0x8000_0000);
        assert_eq!(
            session.open(FrameGeometry::new(640, 480, 640), 33, 5, 0x01),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(
            session.open(FrameGeometry::new(640, 480, 640), 33, 1, 0x05),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(session.state(), OpState::Init);
    }

    #[test]
    fn open_propagates_accelerator_fault_and_recovers() {
        let accel = SimulatedAccelerator::new();
        let handle = accel.handle();
        let mut session = Session::new(accel, 0x8000_0000);
        handle.fail_next_open(-19);
        assert_eq!(
            session.open(FrameGeometry::new(640, 480, 640), 33, 1, 0x01),
            Err(IspError::HardwareFault(-19))
        );
        assert_eq!(session.state(), OpState::Init);
        // The fault was transient; a later open succeeds.
        session
            .open(FrameGeometry::new(640, 480, 640), 33, 1, 0x01)
            .unwrap();
    }

    #[test]
    fn submit_with_zero_address_keeps_ready() {
        let (mut session, _) = open_session();
        assert_eq!(
            session.submit(0, 0, Box::new(|_| {})),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(session.state(), OpState::Ready);
    }

    #[test]
    fn submit_failure_does_not_enter_run() {
        let (mut session, handle) = open_session();
        handle.fail_next_start(-16);
        assert_eq!(
            session.submit(0x1000, 0x2000, Box::new(|_| {})),
            Err(IspError::HardwareFault(-16))
        );
        assert_eq!(session.state(), OpState::Ready);
    }

    #[test]
    fn submit_and_complete_cycle() {
        let (mut session, handle) = open_session();
        session.submit(0x1000, 0x2000, Box::new(|_| {})).unwrap();
        assert_eq!(session.state(), OpState::Run);
        // Setters are refused while the hardware owns the block.
        assert_eq!(
            session.set(IspFunc::BlackLevel, 10),
            Err(IspError::NotReady)
        );
        assert!(handle.finish(0));
        let feedback = session.complete(0).unwrap();
        assert_eq!(feedback.out_addr, 0x2000);
        assert_eq!(session.state(), OpState::Ready);
        // A completion with no job in flight is a no-op.
        assert!(session.complete(0).is_none());
    }

    #[test]
    fn setters_require_ready_state() {
        let accel = SimulatedAccelerator::new();
        let mut session = Session::new(accel, 0x8000_0000);
        assert_eq!(session.set(IspFunc::Gamma, 220), Err(IspError::NotReady));
        assert_eq!(session.ae_set(true, 0, 128, 10), Err(IspError::NotReady));
        assert_eq!(session.get(IspFunc::Gamma), Err(IspError::NotReady));
        assert_eq!(session.get_param().err(), Some(IspError::NotReady));
        assert_eq!(session.close(), Err(IspError::NotReady));
        assert!(session.input_buffers().is_err());
    }

    #[test]
    fn scalar_set_get_round_trip() {
        let (mut session, _) = open_session();
        session.set(IspFunc::BlackLevel, 32).unwrap();
        session.set(IspFunc::Gamma, 220).unwrap();
        session.set(IspFunc::Nr2d, 50).unwrap();
        session.set(IspFunc::Emphasis, 2).unwrap();
        assert_eq!(session.get(IspFunc::BlackLevel), Ok(32));
        assert_eq!(session.get(IspFunc::Gamma), Ok(220));
        assert_eq!(session.get(IspFunc::Nr2d), Ok(50));
        assert_eq!(session.get(IspFunc::Emphasis), Ok(2));
    }

    #[test]
    fn scalar_range_violations_leave_values() {
        let (mut session, _) = open_session();
        assert_eq!(
            session.set(IspFunc::BlackLevel, 128),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(
            session.set(IspFunc::Gamma, 0),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(
            session.set(IspFunc::Emphasis, 4),
            Err(IspError::InvalidArgument)
        );
        assert_eq!(session.get(IspFunc::BlackLevel), Ok(limits::BL_DEFAULT));
        assert_eq!(session.get(IspFunc::Gamma), Ok(limits::GAMMA_DEFAULT));
    }

    #[test]
    fn black_level_writes_negated_bias() {
        let (mut session, _) = open_session();
        session.set(IspFunc::BlackLevel, 32).unwrap();
        let work = session.work_ram();
        assert_eq!(work.read_u16(map::PARAM + param::BL), (-32i16) as u16);
    }

    #[test]
    fn input_buffers_are_ring_slots() {
        let (session, _) = open_session();
        let addrs = session.input_buffers().unwrap();
        let work = session.work_ram();
        for (i, addr) in addrs.iter().enumerate() {
            assert_eq!(*addr, work.ring_addr(i));
        }
    }

    #[test]
    fn blob_round_trip_applies_only_set_bits() {
        let (mut session, _) = open_session();
        let before = session.get_all().unwrap();

        let mut image = blob::default_v11();
        // Touch only black bias and 2DNR.
        let bits = bit::BLACK_BIAS | bit::NR2D;
        image[pos::MAP..pos::MAP + 2].copy_from_slice(&bits.to_le_bytes());
        image[pos::BIAS..pos::BIAS + 6].copy_from_slice(&[0xE0, 0xFF, 0xE0, 0xFF, 0xE0, 0xFF]);
        image[pos::NR2D..pos::NR2D + 2].copy_from_slice(&[0x80, 0x00]);

        session.set_all(&image).unwrap();
        let after = session.get_all().unwrap();

        assert_eq!(&after[pos::BIAS..pos::BIAS + 6], &image[pos::BIAS..pos::BIAS + 6]);
        assert_eq!(&after[pos::NR2D..pos::NR2D + 2], &image[pos::NR2D..pos::NR2D + 2]);
        // Untouched regions keep their prior bytes.
        assert_eq!(
            &after[pos::CMX_PRESET..pos::CMX_PRESET + 72],
            &before[pos::CMX_PRESET..pos::CMX_PRESET + 72]
        );
        assert_eq!(after[pos::OUT_FMT], before[pos::OUT_FMT]);
        // Scalar caches for the blob-written fields go stale.
        assert_eq!(session.get(IspFunc::BlackLevel), Ok(-1));
        assert_eq!(session.get(IspFunc::Nr2d), Ok(-1));
        assert_eq!(session.get(IspFunc::Gamma), Ok(limits::GAMMA_DEFAULT));
    }

    #[test]
    fn blob_rejects_zero_accumulate_area() {
        let (mut session, _) = open_session();
        let mut image = blob::default_v11();
        image[pos::MAP..pos::MAP + 2].copy_from_slice(&bit::ACCUMULATE.to_le_bytes());
        image[pos::AREA_W..pos::AREA_W + 2].copy_from_slice(&0u16.to_le_bytes());
        assert_eq!(session.set_all(&image), Err(IspError::InvalidArgument));
    }

    #[test]
    fn blob_bad_signature_is_rejected_untouched() {
        let (mut session, _) = open_session();
        let before = session.get_all().unwrap();
        let mut image = blob::default_v11();
        image[pos::SIG + 7] = b'9';
        assert_eq!(session.set_all(&image), Err(IspError::InvalidArgument));
        assert_eq!(session.get_all().unwrap(), before);
    }

    #[test]
    fn blob_late_ae_failure_leaves_earlier_bits_applied() {
        let (mut session, _) = open_session();
        let mut image = blob::default_v11();
        let bits = bit::BLACK_BIAS | bit::AE;
        image[pos::MAP..pos::MAP + 2].copy_from_slice(&bits.to_le_bytes());
        image[pos::BIAS..pos::BIAS + 6].copy_from_slice(&[0xE0, 0xFF, 0xE0, 0xFF, 0xE0, 0xFF]);
        image[pos::AE_THRESHOLD] = 0; // out of range

        assert_eq!(session.set_all(&image), Err(IspError::InvalidArgument));
        // The bias bit had already applied when validation failed.
        assert_eq!(session.get(IspFunc::BlackLevel), Ok(-1));
        let after = session.get_all().unwrap();
        assert_eq!(&after[pos::BIAS..pos::BIAS + 6], &image[pos::BIAS..pos::BIAS + 6]);
    }

    #[test]
    fn blob_v10_selects_legacy_image_for_get() {
        let (mut session, _) = open_session();
        let image = blob::default_v10();
        session.set_all(&image).unwrap();
        let out = session.get_all().unwrap();
        assert_eq!(out.len(), blob::SIZE_V10);
        assert_eq!(&out[pos::SIG..pos::SIG + 8], blob::SIG_V10);
    }

    #[test]
    fn ae_set_validates_and_reconfigures() {
        let (mut session, _) = open_session();
        assert_eq!(
            session.ae_set(true, 500, 128, 10),
            Err(IspError::InvalidArgument)
        );
        session.ae_set(true, 0, 128, 10).unwrap();
        let params = session.get_param().unwrap();
        assert!(params.ae_enabled);
        assert_eq!(params.expose_level, 0);
    }

    #[test]
    fn completion_runs_the_exposure_loop() {
        let (mut session, handle) = open_session();
        session.ae_set(true, 0, 200, 10).unwrap();
        let work = session.work_ram();

        for _ in 0..3 {
            session.submit(0x1000, 0x2000, Box::new(|_| {})).unwrap();
            // Dark frame: zero sums over the 320x240 window.
            work.store_accum_stats(AccumStats::default());
            assert!(handle.finish(0));
            session.complete(0).unwrap();
        }
        // Two settle frames, then one +2dB step.
        assert_eq!(session.get_param().unwrap().expose_level, 20);
    }

    #[test]
    fn submit_stages_addresses_and_gains() {
        let (mut session, handle) = open_session();
        session.submit(0x1234_5678, 0x2000_0000, Box::new(|_| {})).unwrap();
        let work = session.work_ram();
        assert_eq!(work.read_u32(map::PARAM + param::SRC), 0x1234_5678);
        assert_eq!(work.read_u32(map::PARAM + param::DST), 0x2000_0000);
        assert_eq!(work.read_u16(map::PARAM + param::R_GAIN), 256);
        assert_eq!(work.read_u16(map::PARAM + param::B_GAIN), 256);
        let job = handle.in_flight().unwrap();
        assert_eq!(job.params.size, param::SIZE);
        assert_eq!(job.config.address, work.addr_of(map::CONFIG));
    }

    #[test]
    fn close_requires_open_session() {
        let (mut session, _) = open_session();
        session.close().unwrap();
        assert_eq!(session.state(), OpState::Init);
        assert_eq!(session.close(), Err(IspError::NotReady));
    }
}
