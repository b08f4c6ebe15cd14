//! Fixed tuning data consumed by the processing block: color presets,
//! noise-reduction coefficients, and the fixed-point constants of the
//! white-balance loop.

/// One white-balance preset as programmed into the gain region of the
/// parameter block, in hardware order (R, G, B), 4.12 fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WbPreset {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl WbPreset {
    /// Gain region bytes in hardware order.
    pub fn to_words(&self) -> [u16; 3] {
        [self.red, self.green, self.blue]
    }
}

/// White-balance presets: Daylight, Neutral, Interior, Lamp.
pub const WB_PRESETS: [WbPreset; 4] = [
    WbPreset {
        red: 0x1a16,
        green: 0x1041,
        blue: 0x167a,
    },
    WbPreset {
        red: 0x1656,
        green: 0x1041,
        blue: 0x18d8,
    },
    WbPreset {
        red: 0x1297,
        green: 0x1041,
        blue: 0x1b3d,
    },
    WbPreset {
        red: 0x10dd,
        green: 0x1041,
        blue: 0x21e4,
    },
];

/// Color-matrix presets, row-major 3x3 coefficients in 4.12 fixed point:
/// Truecolor, Standard, Vivid, Sepia.
pub const CMX_PRESETS: [[u16; 9]; 4] = [
    [
        0x2125, 0x02e2, 0xfbc8, 0xfffd, 0x1df6, 0x0291, 0xfec5, 0xf74b, 0x289b,
    ],
    [
        0x2c69, 0xf78e, 0xfb2c, 0xfddd, 0x22c9, 0x0163, 0xfdf0, 0xf68a, 0x2c82,
    ],
    [
        0x2521, 0xfa89, 0xfcdd, 0xfbe1, 0x27ad, 0xff26, 0x00f1, 0xf172, 0x2c25,
    ],
    [
        0x0a20, 0x195a, 0x0509, 0x0848, 0x1f51, 0xfd2f, 0x07d7, 0x1092, 0x0731,
    ],
];

/// Fixed 3DNR filter parameters written once at open.
pub mod nr3d {
    pub const Y_THRES_A: u16 = 8;
    pub const Y_THRES_B: u16 = 16;
    pub const Y_TILT: u16 = 512;
    pub const C_THRES_A: u16 = 8;
    pub const C_THRES_B: u16 = 16;
    pub const C_TILT: u16 = 512;
    pub const Y_COEF: u8 = 64;
    pub const C_COEF: u8 = 32;
    pub const Y_ALPHA_MAX: u8 = 128;
    pub const C_ALPHA_MAX: u8 = 128;
}

/// Unsharp-mask strength steps indexed by the emphasis control (0..=3).
pub const EMPHASIS_STEPS: [u8; 4] = [0, 30, 60, 90];
/// Coring value paired with any emphasis strength.
pub const EMPHASIS_CORING: u8 = 28;

/// 2DNR blend scaling from the 0..=100 control value to the 8.8 register.
pub fn nr2d_blend(value: i32) -> u16 {
    ((value as u32 * 256 + 50) / 100) as u16
}

/// Fixed-point geometry and band limits of the white-balance loop.
pub mod awb {
    /// Fractional bits of the working fixed-point ratios.
    pub const SHIFT: u32 = 16;
    /// 1.0 in working fixed point.
    pub const UNITY: u64 = 1 << SHIFT;
    /// Shift from working fixed point down to the integer gain register.
    pub const GAIN_DIV: u32 = 8;
    /// Neutral integer channel gain (1.0x).
    pub const NEUTRAL_GAIN: i32 = 256;
    /// Green reference gain in working fixed point.
    pub const WB_GAIN_G: u64 = UNITY;

    /// Clamp band for the green/blue ratio.
    pub const RATIO_B_LIMIT_L: u64 = 0x8000; // 0.5x
    pub const RATIO_B_LIMIT_H: u64 = 0x2_8000; // 2.5x
    /// Clamp band for the green/red ratio.
    pub const RATIO_R_LIMIT_L: u64 = 0x8000;
    pub const RATIO_R_LIMIT_H: u64 = 0x2_8000;

    /// Escalating distance tiers of the variable-speed convergence, as
    /// ratios of target to previously applied gain.
    pub const SPEED_TH_1H: u64 = 0x1_0400; // ~1.016x
    pub const SPEED_TH_1L: u64 = 0xFC00; // ~0.984x
    pub const SPEED_TH_2H: u64 = 0x1_1000; // 1.0625x
    pub const SPEED_TH_2L: u64 = 0xF000; // 0.9375x
    pub const SPEED_TH_3H: u64 = 0x1_4000; // 1.25x
    pub const SPEED_TH_3L: u64 = 0xC000; // 0.75x

    /// Per-frame convergence coefficients (fraction of remaining distance
    /// applied), matched to the tiers above.
    pub const SPEED_COEF_1: u64 = 0x1000; // 1/16
    pub const SPEED_COEF_2: u64 = 0x4000; // 1/4
    pub const SPEED_COEF_3: u64 = 0x8000; // 1/2

    /// Minimum accumulated pixel count for a trustworthy measurement.
    pub const RELIABILITY_TH: u32 = 1024;
    /// Minimum mean green level; below this the scene is treated as black
    /// and the gains hold.
    pub const PREVENT_BLACK_TH: u32 = 16;

    /// Detection threshold words consumed directly by the hardware.
    pub const THRESH_WHITE: u16 = 230;
    pub const THRESH_SAT: u16 = 240;
    pub const THRESH_RGB_L: u16 = 64;
    pub const THRESH_RGB_H: u16 = 230;
    pub const WHITE_CLIP: u16 = 0x03FF;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nr2d_blend_rounds_to_register_units() {
        assert_eq!(nr2d_blend(0), 0);
        assert_eq!(nr2d_blend(25), 64);
        assert_eq!(nr2d_blend(100), 256);
    }

    #[test]
    fn presets_share_the_green_reference() {
        for preset in WB_PRESETS {
            assert_eq!(preset.green, 0x1041);
        }
    }

    #[test]
    fn speed_tiers_are_nested() {
        use awb::*;
        assert!(SPEED_TH_1H < SPEED_TH_2H && SPEED_TH_2H < SPEED_TH_3H);
        assert!(SPEED_TH_1L > SPEED_TH_2L && SPEED_TH_2L > SPEED_TH_3L);
        assert!(SPEED_COEF_1 < SPEED_COEF_2 && SPEED_COEF_2 < SPEED_COEF_3);
        // Coefficients stay below unity so a step can never overshoot.
        assert!(SPEED_COEF_3 < UNITY);
    }
}
