#![doc = include_str!("../README.md")]

pub mod controls;
pub mod error;
pub mod format;
pub mod metrics;
pub mod queue;

pub mod prelude {
    pub use crate::{
        controls::{ALL_BLOB_DIMS, ControlValue, IspCid},
        error::{IspError, IspResult},
        format::{
            ColorFamily, FrameGeometry, IN_FORMAT_DEFAULT, InputFormat, OutputFormat, limits,
        },
        metrics::Metrics,
        queue::{
            BoundedRx, BoundedTx, CompletionQueue, CompletionRecord, DmaJob, DmaJobQueue,
            RecvOutcome, SendOutcome, WaitQueue, bounded,
        },
    };
}
