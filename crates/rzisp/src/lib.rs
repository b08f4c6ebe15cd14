#![doc = include_str!("../README.md")]

pub use rzisp_core as core;
pub use rzisp_engine as engine;

pub mod ctrl;
pub mod metrics;
pub mod sensor;
pub mod tunables;
pub mod video;
mod worker;

pub mod prelude {
    pub use crate::ctrl::IspCtrl;
    pub use crate::metrics::{PipelineMetrics, StageMetrics};
    pub use crate::sensor::{CameraSensor, CsiSubdev};
    pub use crate::tunables::PipelineTunables;
    pub use crate::video::{Capability, PixFormat, Selection, VideoQueue, VqResult, fourcc};
    pub use rzisp_core::prelude::*;
    pub use rzisp_engine::prelude::*;
}
