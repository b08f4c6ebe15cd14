//! Auto-white-balance control loop.
//!
//! Runs every completed frame on the hardware's white-detection block:
//! per-channel sums over the detected pixels. Gains converge toward the
//! measured green/red and green/blue ratios in 16-bit fixed point with a
//! distance-scaled convergence speed, and hold whenever the measurement
//! is unreliable or the scene is near black.

use crate::mem::AccumStats;
use crate::tuning::awb::*;

use rzisp_core::format::limits::{AWB_GAIN_MAX, AWB_GAIN_MIN};

/// Channel indices of the gain arrays.
pub const CH_R: usize = 0;
pub const CH_G: usize = 1;
pub const CH_B: usize = 2;

/// White-balance loop state.
///
/// # Example
/// ```rust
/// use rzisp_engine::awb::{AwbController, CH_G};
///
/// let awb = AwbController::new();
/// assert_eq!(awb.gains()[CH_G], 256);
/// ```
#[derive(Debug)]
pub struct AwbController {
    enabled: bool,
    manual: bool,
    manual_rgain: i64,
    manual_bgain: i64,
    gain: [i32; 3],
    gain_prev: [u64; 3],
}

impl Default for AwbController {
    fn default() -> Self {
        Self::new()
    }
}

impl AwbController {
    /// Fresh controller: loop enabled, gains pinned to the neutral manual
    /// values until a caller switches to auto.
    pub fn new() -> AwbController {
        AwbController {
            enabled: true,
            manual: true,
            manual_rgain: NEUTRAL_GAIN as i64,
            manual_bgain: NEUTRAL_GAIN as i64,
            gain: [NEUTRAL_GAIN; 3],
            gain_prev: [UNITY; 3],
        }
    }

    /// Enable or disable the whole loop. Disabled, every evaluation
    /// resets to neutral.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Switch between auto convergence and fixed manual gains.
    pub fn set_manual(&mut self, manual: bool, rgain: i32, bgain: i32) {
        self.manual = manual;
        self.manual_rgain = rgain as i64;
        self.manual_bgain = bgain as i64;
    }

    pub fn manual(&self) -> bool {
        self.manual
    }

    /// Integer channel gains currently applied to the parameter block.
    pub fn gains(&self) -> [i32; 3] {
        self.gain
    }

    /// One evaluation over a finished frame's detection statistics.
    pub fn evaluate(&mut self, stats: &AccumStats) {
        if !self.enabled {
            self.gain = [NEUTRAL_GAIN; 3];
            self.gain_prev = [UNITY; 3];
            return;
        }

        let count = stats.awb_count as u64;
        let sum_r = stats.awb_sum_r as u64;
        let sum_g = stats.awb_sum_g as u64;
        let sum_b = stats.awb_sum_b as u64;

        // Channel ratios in working fixed point; zero sums read as unity.
        let ratio_b = if sum_b == 0 || sum_g == 0 {
            UNITY
        } else {
            (sum_g << SHIFT) / sum_b
        };
        let ratio_r = if sum_r == 0 || sum_g == 0 {
            UNITY
        } else {
            (sum_g << SHIFT) / sum_r
        };

        let ratio_b = ratio_b.clamp(RATIO_B_LIMIT_L, RATIO_B_LIMIT_H);
        let ratio_r = ratio_r.clamp(RATIO_R_LIMIT_L, RATIO_R_LIMIT_H);

        let reliable = count >= RELIABILITY_TH as u64;
        let prevent_black = count != 0 && sum_g / count >= PREVENT_BLACK_TH as u64;

        // Convergence speed scales with how far the target sits from the
        // previously applied gain.
        let gain_ratio_b = (ratio_b << SHIFT) / self.gain_prev[CH_B];
        let gain_ratio_r = (ratio_r << SHIFT) / self.gain_prev[CH_R];
        let outside = |lo: u64, hi: u64| {
            gain_ratio_b >= hi || gain_ratio_r >= hi || gain_ratio_b <= lo || gain_ratio_r <= lo
        };
        let coefficient = if outside(SPEED_TH_3L, SPEED_TH_3H) {
            SPEED_COEF_3
        } else if outside(SPEED_TH_2L, SPEED_TH_2H) {
            SPEED_COEF_2
        } else if outside(SPEED_TH_1L, SPEED_TH_1H) {
            SPEED_COEF_1
        } else {
            0
        };

        let (ctrl_r, ctrl_b) = if self.manual {
            (self.manual_rgain, self.manual_bgain)
        } else if reliable && prevent_black {
            let step_r =
                ((ratio_r as i64 - self.gain_prev[CH_R] as i64) * coefficient as i64) >> SHIFT;
            let step_b =
                ((ratio_b as i64 - self.gain_prev[CH_B] as i64) * coefficient as i64) >> SHIFT;
            (
                self.gain_prev[CH_R] as i64 + step_r,
                self.gain_prev[CH_B] as i64 + step_b,
            )
        } else {
            (self.gain_prev[CH_R] as i64, self.gain_prev[CH_B] as i64)
        };

        let (fixed_r, fixed_b) = if self.manual {
            (ctrl_r as i32, ctrl_b as i32)
        } else {
            ((ctrl_r >> GAIN_DIV) as i32, (ctrl_b >> GAIN_DIV) as i32)
        };
        let fixed_g = (WB_GAIN_G >> GAIN_DIV) as i32;

        self.gain[CH_R] = fixed_r.clamp(AWB_GAIN_MIN, AWB_GAIN_MAX);
        self.gain[CH_G] = fixed_g.clamp(AWB_GAIN_MIN, AWB_GAIN_MAX);
        self.gain[CH_B] = fixed_b.clamp(AWB_GAIN_MIN, AWB_GAIN_MAX);

        self.gain_prev[CH_R] = ctrl_r.max(0) as u64;
        self.gain_prev[CH_B] = ctrl_b.max(0) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_controller() -> AwbController {
        let mut awb = AwbController::new();
        awb.set_manual(false, NEUTRAL_GAIN as i32, NEUTRAL_GAIN as i32);
        awb
    }

    fn stats(count: u32, r: u32, g: u32, b: u32) -> AccumStats {
        AccumStats {
            awb_count: count,
            awb_sum_r: r,
            awb_sum_g: g,
            awb_sum_b: b,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_resets_to_neutral() {
        let mut awb = auto_controller();
        awb.evaluate(&stats(100_000, 1000, 3000, 1000));
        awb.set_enabled(false);
        awb.evaluate(&stats(100_000, 1000, 3000, 1000));
        assert_eq!(awb.gains(), [NEUTRAL_GAIN; 3]);
        assert_eq!(awb.gain_prev, [UNITY; 3]);
    }

    #[test]
    fn manual_gains_apply_verbatim() {
        let mut awb = AwbController::new();
        awb.set_manual(true, 300, 128);
        awb.evaluate(&stats(100_000, 1, 1, 1));
        assert_eq!(awb.gains()[CH_R], 300);
        assert_eq!(awb.gains()[CH_B], 128);
        assert_eq!(awb.gains()[CH_G], (WB_GAIN_G >> GAIN_DIV) as i32);
    }

    #[test]
    fn unreliable_measurement_holds_previous_gain() {
        let mut awb = auto_controller();
        let prev = awb.gain_prev;
        // Reddish scene but far too few detected pixels.
        awb.evaluate(&stats(10, 4000, 2000, 2000));
        assert_eq!(awb.gain_prev, prev);
    }

    #[test]
    fn near_black_scene_holds_previous_gain() {
        let mut awb = auto_controller();
        let prev = awb.gain_prev;
        // Plenty of pixels but mean green below the black floor.
        awb.evaluate(&stats(100_000, 400_000, 800_000, 400_000));
        assert_eq!(awb.gain_prev, prev);
    }

    #[test]
    fn converges_between_previous_and_target() {
        let mut awb = auto_controller();
        // Green double red: target R ratio = 2.0, clamped band allows it.
        let measurement = stats(100_000, 100_000_000, 200_000_000, 200_000_000);
        let target = 2 * UNITY;
        let mut last = awb.gain_prev[CH_R];
        for _ in 0..64 {
            awb.evaluate(&measurement);
            let applied = awb.gain_prev[CH_R];
            assert!(applied >= last, "gain moved away from target");
            assert!(applied <= target, "gain overshot the target ratio");
            last = applied;
        }
        // After enough frames the loop settles inside the speed-1 band.
        assert!(last > target - (target / 16));
    }

    #[test]
    fn ratio_clamp_bounds_extreme_scenes() {
        let mut awb = auto_controller();
        // Almost no blue: unclamped ratio would exceed the band ceiling.
        let measurement = stats(100_000, 200_000_000, 200_000_000, 1_000);
        for _ in 0..256 {
            awb.evaluate(&measurement);
        }
        assert!(awb.gain_prev[CH_B] <= RATIO_B_LIMIT_H);
        // Settled inside the innermost speed band below the ratio ceiling.
        let ceiling = (RATIO_B_LIMIT_H >> GAIN_DIV) as i32;
        assert!(awb.gains()[CH_B] <= ceiling.min(AWB_GAIN_MAX));
        assert!(awb.gains()[CH_B] >= ceiling * 31 / 32);
    }

    #[test]
    fn dead_band_freezes_small_errors() {
        let mut awb = auto_controller();
        // Target ratio within the innermost speed tier of unity.
        let measurement = stats(100_000, 200_000_000, 201_000_000, 201_000_000);
        let before = awb.gain_prev;
        awb.evaluate(&measurement);
        assert_eq!(awb.gain_prev, before);
    }

    #[test]
    fn zero_sums_read_as_unity_ratio() {
        let mut awb = auto_controller();
        awb.evaluate(&stats(100_000, 0, 0, 0));
        // Unity target equals the starting gain: nothing moves.
        assert_eq!(awb.gain_prev[CH_R], UNITY);
        assert_eq!(awb.gains()[CH_R], NEUTRAL_GAIN);
    }
}
