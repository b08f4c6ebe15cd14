use crate::format::limits;

/// Base of the camera control class the vendor ids live in.
pub const CAMERA_CLASS_BASE: u32 = 0x009a_0900;

/// Size of the "all parameters" blob control payload.
pub const ALL_BLOB_DIMS: usize = 512;

/// Vendor control identifiers exposed on the video device.
///
/// # Example
/// ```rust
/// use rzisp_core::controls::IspCid;
///
/// assert_eq!(IspCid::from_raw(IspCid::Gamma.raw()), Some(IspCid::Gamma));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IspCid {
    /// Input pixel-format selector (RAW8/10/12).
    InFormat,
    /// Frame interval in milliseconds.
    FrameInterval,
    /// Black-level bias.
    BlackLevel,
    /// White-balance preset selector.
    WbPreset,
    /// Gamma value in hundredths.
    Gamma,
    /// Color-matrix preset selector.
    CmxPreset,
    /// 2D noise-reduction blend strength.
    Nr2d,
    /// 3D noise reduction on/off.
    Nr3d,
    /// Unsharp-mask emphasis strength.
    Emphasis,
    /// Accelerator priority level (reserved).
    DrpLevel,
    /// Auto-exposure enable.
    AeEnable,
    /// Exposure level in tenths of a dB.
    ExposeLevel,
    /// Auto-exposure target luminance.
    TargetLuma,
    /// Auto-exposure step threshold.
    AeThreshold,
    /// Versioned full-parameter blob.
    All,
    /// Auto-white-balance auto/manual selector.
    AwbEnable,
}

impl IspCid {
    /// The wire control id.
    pub fn raw(&self) -> u32 {
        let offset = match self {
            IspCid::InFormat => 34,
            IspCid::FrameInterval => 35,
            IspCid::BlackLevel => 36,
            IspCid::WbPreset => 37,
            IspCid::Gamma => 38,
            IspCid::CmxPreset => 39,
            IspCid::Nr2d => 40,
            IspCid::Nr3d => 41,
            IspCid::Emphasis => 42,
            IspCid::DrpLevel => 43,
            IspCid::AeEnable => 44,
            IspCid::ExposeLevel => 45,
            IspCid::TargetLuma => 46,
            IspCid::AeThreshold => 47,
            IspCid::All => 48,
            IspCid::AwbEnable => 49,
        };
        CAMERA_CLASS_BASE + offset
    }

    /// Decode a wire control id.
    pub fn from_raw(raw: u32) -> Option<IspCid> {
        let offset = raw.checked_sub(CAMERA_CLASS_BASE)?;
        match offset {
            34 => Some(IspCid::InFormat),
            35 => Some(IspCid::FrameInterval),
            36 => Some(IspCid::BlackLevel),
            37 => Some(IspCid::WbPreset),
            38 => Some(IspCid::Gamma),
            39 => Some(IspCid::CmxPreset),
            40 => Some(IspCid::Nr2d),
            41 => Some(IspCid::Nr3d),
            42 => Some(IspCid::Emphasis),
            43 => Some(IspCid::DrpLevel),
            44 => Some(IspCid::AeEnable),
            45 => Some(IspCid::ExposeLevel),
            46 => Some(IspCid::TargetLuma),
            47 => Some(IspCid::AeThreshold),
            48 => Some(IspCid::All),
            49 => Some(IspCid::AwbEnable),
            _ => None,
        }
    }

    /// Inclusive value range for scalar controls; `None` for the blob.
    pub fn range(&self) -> Option<(i32, i32)> {
        match self {
            IspCid::InFormat => Some((0, 2)),
            IspCid::FrameInterval => Some((limits::FRM_INTERVAL_MIN, limits::FRM_INTERVAL_MAX)),
            IspCid::BlackLevel => Some((limits::BL_MIN, limits::BL_MAX)),
            IspCid::WbPreset => Some((limits::WB_MIN, limits::WB_MAX)),
            IspCid::Gamma => Some((limits::GAMMA_MIN, limits::GAMMA_MAX)),
            IspCid::CmxPreset => Some((limits::CMX_MIN, limits::CMX_MAX)),
            IspCid::Nr2d => Some((limits::NR2D_MIN, limits::NR2D_MAX)),
            IspCid::Nr3d => Some((limits::NR3D_MIN, limits::NR3D_MAX)),
            IspCid::Emphasis => Some((limits::EMP_MIN, limits::EMP_MAX)),
            IspCid::DrpLevel => Some((0, 0)),
            IspCid::AeEnable => Some((0, 1)),
            IspCid::ExposeLevel => Some((limits::EXPOSE_LV_MIN, limits::EXPOSE_LV_MAX)),
            IspCid::TargetLuma => Some((limits::TARGET_LUMA_MIN, limits::TARGET_LUMA_MAX)),
            IspCid::AeThreshold => Some((limits::THRESHOLD_MIN, limits::THRESHOLD_MAX)),
            IspCid::All => None,
            IspCid::AwbEnable => Some((0, 1)),
        }
    }

    /// Human-readable control name as advertised to userspace.
    pub fn name(&self) -> &'static str {
        match self {
            IspCid::InFormat => "isp.in_format",
            IspCid::FrameInterval => "isp.frame_interval",
            IspCid::BlackLevel => "isp.black_level",
            IspCid::WbPreset => "isp.wb_preset",
            IspCid::Gamma => "isp.gamma",
            IspCid::CmxPreset => "isp.cmx_preset",
            IspCid::Nr2d => "isp.2dnr",
            IspCid::Nr3d => "isp.3dnr",
            IspCid::Emphasis => "isp.emphasis",
            IspCid::DrpLevel => "isp.drp_level",
            IspCid::AeEnable => "isp.ae",
            IspCid::ExposeLevel => "isp.expose_level",
            IspCid::TargetLuma => "isp.target_luma",
            IspCid::AeThreshold => "isp.ae_threshold",
            IspCid::All => "isp.all_params",
            IspCid::AwbEnable => "isp.awb",
        }
    }
}

/// Value carried by a control transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlValue {
    Int(i32),
    Blob(Vec<u8>),
}

impl ControlValue {
    /// The scalar payload, if this is a scalar value.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ControlValue::Int(v) => Some(*v),
            ControlValue::Blob(_) => None,
        }
    }

    /// The blob payload, if this is a blob value.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            ControlValue::Int(_) => None,
            ControlValue::Blob(b) => Some(b.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_round_trip() {
        for cid in [
            IspCid::InFormat,
            IspCid::FrameInterval,
            IspCid::BlackLevel,
            IspCid::WbPreset,
            IspCid::Gamma,
            IspCid::CmxPreset,
            IspCid::Nr2d,
            IspCid::Nr3d,
            IspCid::Emphasis,
            IspCid::DrpLevel,
            IspCid::AeEnable,
            IspCid::ExposeLevel,
            IspCid::TargetLuma,
            IspCid::AeThreshold,
            IspCid::All,
            IspCid::AwbEnable,
        ] {
            assert_eq!(IspCid::from_raw(cid.raw()), Some(cid));
        }
        assert_eq!(IspCid::from_raw(CAMERA_CLASS_BASE + 50), None);
        assert_eq!(IspCid::from_raw(7), None);
    }

    #[test]
    fn scalar_ranges_match_limits() {
        assert_eq!(IspCid::Gamma.range(), Some((1, 9999)));
        assert_eq!(IspCid::ExposeLevel.range(), Some((-400, 400)));
        assert_eq!(IspCid::All.range(), None);
    }

    #[test]
    fn value_accessors() {
        assert_eq!(ControlValue::Int(3).as_int(), Some(3));
        assert!(ControlValue::Int(3).as_blob().is_none());
        let blob = ControlValue::Blob(vec![1, 2, 3]);
        assert_eq!(blob.as_blob().map(|b| b.len()), Some(3));
    }
}
