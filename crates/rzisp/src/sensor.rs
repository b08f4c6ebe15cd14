//! Media-pipeline subdevice seams: the CSI receiver and the camera
//! sensor behind it.

use crate::video::VqResult;

/// The CSI-2 receiver subdevice.
pub trait CsiSubdev {
    /// Program the active media-bus format.
    fn set_format(&mut self, bus_code: u32, width: u16, height: u16) -> VqResult<()>;
}

/// The camera sensor subdevice, including the two controls the exposure
/// loop drives.
pub trait CameraSensor {
    /// Program the active media-bus format.
    fn set_format(&mut self, bus_code: u32, width: u16, height: u16) -> VqResult<()>;
    /// Analog gain in tenths of a dB, mapped to registers by the sensor
    /// driver's own lookup table.
    fn set_gain(&mut self, tenth_db: i32) -> VqResult<()>;
    /// Exposure time in tenths of a millisecond, scaled to line counts by
    /// the sensor driver.
    fn set_exposure(&mut self, tenth_ms: i32) -> VqResult<()>;
}
