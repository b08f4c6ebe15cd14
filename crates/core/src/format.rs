use crate::error::{IspError, IspResult};

/// Raw value accepted everywhere an unspecified input format is allowed;
/// resolves to [`InputFormat::Raw10`].
pub const IN_FORMAT_DEFAULT: u16 = 0xFFFF;

/// Maximum frame width accepted by the processing block.
pub const WIDTH_MAX: u16 = 2592;
/// Maximum frame height accepted by the processing block.
pub const HEIGHT_MAX: u16 = 1944;

/// Bayer input bit depth coming off the camera receiver.
///
/// # Example
/// ```rust
/// use rzisp_core::format::InputFormat;
///
/// assert_eq!(InputFormat::from_raw(0xFFFF), Some(InputFormat::Raw10));
/// assert_eq!(InputFormat::Raw12.bytes_per_line(640), 1280);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputFormat {
    Raw8 = 0,
    Raw10 = 1,
    Raw12 = 2,
}

impl InputFormat {
    /// Decode the wire value, resolving the default sentinel to RAW10.
    pub fn from_raw(raw: u16) -> Option<InputFormat> {
        match raw {
            0 => Some(InputFormat::Raw8),
            1 => Some(InputFormat::Raw10),
            2 => Some(InputFormat::Raw12),
            IN_FORMAT_DEFAULT => Some(InputFormat::Raw10),
            _ => None,
        }
    }

    /// Media-bus code the CSI receiver and sensor are programmed with.
    pub fn bus_code(&self) -> u32 {
        // MEDIA_BUS_FMT_SRGGB{8,10,12}_1X{8,10,12}
        match self {
            InputFormat::Raw8 => 0x3014,
            InputFormat::Raw10 => 0x300f,
            InputFormat::Raw12 => 0x3012,
        }
    }

    /// Line stride in bytes for a given width.
    ///
    /// The receiver stores 10/12-bit samples in 16-bit memory words.
    pub fn bytes_per_line(&self, width: u16) -> u16 {
        match self {
            InputFormat::Raw8 => width,
            InputFormat::Raw10 | InputFormat::Raw12 => width.saturating_mul(2),
        }
    }
}

/// Output pixel format written by the processing block.
///
/// # Example
/// ```rust
/// use rzisp_core::format::{ColorFamily, OutputFormat};
///
/// assert_eq!(OutputFormat::Yuy2.family(), ColorFamily::Yuv);
/// assert_eq!(OutputFormat::Argb8888.family(), ColorFamily::Rgb);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutputFormat {
    Uyvy = 0x00,
    Yuy2 = 0x01,
    Rgb888 = 0x10,
    Argb8888 = 0x11,
    Xrgb8888 = 0x12,
}

/// Broad output family; selects which precompiled configuration image the
/// accelerator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorFamily {
    Yuv,
    Rgb,
}

impl OutputFormat {
    /// Decode the wire value.
    pub fn from_raw(raw: u16) -> Option<OutputFormat> {
        match raw {
            0x00 => Some(OutputFormat::Uyvy),
            0x01 => Some(OutputFormat::Yuy2),
            0x10 => Some(OutputFormat::Rgb888),
            0x11 => Some(OutputFormat::Argb8888),
            0x12 => Some(OutputFormat::Xrgb8888),
            _ => None,
        }
    }

    /// The parameter-block byte for this format.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    pub fn family(&self) -> ColorFamily {
        match self {
            OutputFormat::Uyvy | OutputFormat::Yuy2 => ColorFamily::Yuv,
            _ => ColorFamily::Rgb,
        }
    }
}

/// Frame dimensions as programmed into the parameter block.
///
/// # Example
/// ```rust
/// use rzisp_core::format::FrameGeometry;
///
/// assert!(FrameGeometry::new(640, 480, 640).validate().is_ok());
/// assert!(FrameGeometry::new(641, 480, 642).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameGeometry {
    pub width: u16,
    pub height: u16,
    pub stride: u16,
}

impl FrameGeometry {
    pub fn new(width: u16, height: u16, stride: u16) -> FrameGeometry {
        FrameGeometry {
            width,
            height,
            stride,
        }
    }

    /// Hardware acceptance check: all dimensions non-zero and even, and
    /// within the block's line-buffer limits.
    pub fn validate(&self) -> IspResult<()> {
        let odd = (self.width | self.height | self.stride) & 1 != 0;
        let zero = self.width == 0 || self.height == 0 || self.stride == 0;
        if odd || zero || self.width > WIDTH_MAX || self.height > HEIGHT_MAX {
            return Err(IspError::InvalidArgument);
        }
        Ok(())
    }
}

/// Numeric ranges and defaults for every tunable on the control surface.
pub mod limits {
    /// Black-level bias, applied negated to all three channels.
    pub const BL_MIN: i32 = 0;
    pub const BL_MAX: i32 = 127;
    pub const BL_DEFAULT: i32 = 16;

    /// White-balance preset selector.
    pub const WB_MIN: i32 = 0;
    pub const WB_MAX: i32 = 3;
    pub const WB_DEFAULT: i32 = 1;

    /// Gamma in hundredths; 100 disables correction.
    pub const GAMMA_MIN: i32 = 1;
    pub const GAMMA_MAX: i32 = 9999;
    pub const GAMMA_DEFAULT: i32 = 100;

    /// Color-matrix preset selector.
    pub const CMX_MIN: i32 = 0;
    pub const CMX_MAX: i32 = 3;
    pub const CMX_DEFAULT: i32 = 1;

    /// 2D noise-reduction blend percentage.
    pub const NR2D_MIN: i32 = 0;
    pub const NR2D_MAX: i32 = 100;
    pub const NR2D_DEFAULT: i32 = 25;

    /// 3D noise reduction on/off.
    pub const NR3D_MIN: i32 = 0;
    pub const NR3D_MAX: i32 = 1;
    pub const NR3D_DEFAULT: i32 = 1;

    /// Unsharp-mask strength step.
    pub const EMP_MIN: i32 = 0;
    pub const EMP_MAX: i32 = 3;
    pub const EMP_DEFAULT: i32 = 0;

    /// Exposure level in tenths of a dB.
    pub const EXPOSE_LV_MIN: i32 = -400;
    pub const EXPOSE_LV_MAX: i32 = 400;
    pub const EXPOSE_LV_DEFAULT: i32 = 100;

    /// Auto-exposure target luminance.
    pub const TARGET_LUMA_MIN: i32 = 1;
    pub const TARGET_LUMA_MAX: i32 = 254;
    pub const TARGET_LUMA_DEFAULT: i32 = 118;

    /// Auto-exposure step threshold.
    pub const THRESHOLD_MIN: i32 = 1;
    pub const THRESHOLD_MAX: i32 = 64;
    pub const THRESHOLD_DEFAULT: i32 = 10;

    /// Frame interval in milliseconds.
    pub const FRM_INTERVAL_MIN: i32 = 1;
    pub const FRM_INTERVAL_MAX: i32 = 10000;
    pub const FRM_INTERVAL_DEFAULT: u16 = 33;

    /// Manual white-balance channel gain (256 = 1.0x).
    pub const AWB_GAIN_MIN: i32 = 64;
    pub const AWB_GAIN_MAX: i32 = 1023;
    pub const AWB_GAIN_DEFAULT: i32 = 256;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_format_default_resolves_to_raw10() {
        assert_eq!(
            InputFormat::from_raw(IN_FORMAT_DEFAULT),
            Some(InputFormat::Raw10)
        );
        assert_eq!(InputFormat::from_raw(3), None);
    }

    #[test]
    fn stride_doubles_for_packed_raw() {
        assert_eq!(InputFormat::Raw8.bytes_per_line(1280), 1280);
        assert_eq!(InputFormat::Raw10.bytes_per_line(1280), 2560);
        assert_eq!(InputFormat::Raw12.bytes_per_line(1280), 2560);
    }

    #[test]
    fn output_format_families() {
        assert_eq!(OutputFormat::Uyvy.family(), ColorFamily::Yuv);
        assert_eq!(OutputFormat::Rgb888.family(), ColorFamily::Rgb);
        assert_eq!(OutputFormat::Xrgb8888.family(), ColorFamily::Rgb);
        assert_eq!(OutputFormat::from_raw(0x13), None);
    }

    #[test]
    fn geometry_limits() {
        assert!(FrameGeometry::new(2592, 1944, 5184).validate().is_ok());
        assert!(FrameGeometry::new(2594, 1944, 5188).validate().is_err());
        assert!(FrameGeometry::new(2592, 1946, 5184).validate().is_err());
        assert!(FrameGeometry::new(0, 480, 640).validate().is_err());
        assert!(FrameGeometry::new(640, 480, 0).validate().is_err());
        assert!(FrameGeometry::new(640, 480, 641).validate().is_err());
    }
}
