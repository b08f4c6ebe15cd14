#![doc = include_str!("../README.md")]

pub mod accel;
pub mod ae;
pub mod awb;
pub mod blob;
pub mod config;
pub mod gamma;
pub mod mem;
pub mod session;
pub mod state;
pub mod tuning;

pub mod prelude {
    pub use crate::{
        accel::{AccelJob, Accelerator, CompletionFn, JobRegion, SimulatedAccelerator},
        ae::{AeController, AeTable, SensorExposure, measure_luminance},
        awb::AwbController,
        blob::{AeFields, AwbFields, BlobVersion},
        config::ConfigSet,
        gamma::gamma_table,
        mem::{AccumStats, WorkRam},
        session::{CAM_BUFFER_COUNT, FrameFeedback, IspFunc, Session, SessionParams},
        state::OpState,
    };
}
