//! Auto-exposure control loop.
//!
//! The loop runs once per completed frame on the hardware-accumulated
//! channel sums, steps the exposure level in tenths of a dB toward the
//! target luminance, and translates the level into a sensor gain /
//! exposure-time pair through a per-interval lookup table.

use rzisp_core::format::limits::{
    EXPOSE_LV_DEFAULT, EXPOSE_LV_MAX, EXPOSE_LV_MIN, TARGET_LUMA_DEFAULT, TARGET_LUMA_MAX,
    TARGET_LUMA_MIN, THRESHOLD_DEFAULT, THRESHOLD_MAX, THRESHOLD_MIN,
};
use rzisp_core::prelude::{IspError, IspResult};

use crate::mem::AccumStats;

/// Frames to wait after pushing new sensor settings before trusting the
/// measurement again.
pub const CAMERA_SETTLE_FRAMES: i32 = 2;

/// Entries in the exposure-level history ring.
const HISTORY_LEN: usize = 4;
/// History ring seed; values outside the level range so a fresh ring can
/// never read as oscillating.
const HISTORY_INIT: i32 = 0xFF;

/// Step thresholds as multiples of the configured threshold.
const TIER_HIGH: i32 = 3;
const TIER_MID: i32 = 2;

const LEVEL_SPAN: usize = (EXPOSE_LV_MAX - EXPOSE_LV_MIN) as usize + 1;
/// Tenths of dB covered by exposure time before gain takes over.
const TIME_SPAN_TENTH_DB: i32 = 500;
/// Tenths of dB of analog gain headroom.
const GAIN_SPAN_TENTH_DB: i32 = 300;

/// Sensor settings for one exposure level: analog gain in tenths of a dB
/// and exposure time in tenths of a millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorExposure {
    pub gain: i32,
    pub time: i32,
}

/// Per-interval exposure lookup table, indexed by `EXPOSE_LV_MAX - level`
/// (so index 0 is the brightest level).
///
/// The base curve spends exposure time first (20·log10 scale, one table
/// step per tenth of a dB) and analog gain past the time span. Rebuilding
/// for a frame interval walks from darkest to brightest converting every
/// infeasible time step into an extra gain step, pinning the time at the
/// last feasible value.
///
/// # Example
/// ```rust
/// use rzisp_engine::ae::AeTable;
///
/// let table = AeTable::build(33);
/// let darkest = table.lookup(-400);
/// assert_eq!(darkest.gain, 0);
/// assert_eq!(darkest.time, 1);
/// ```
#[derive(Debug, Clone)]
pub struct AeTable {
    entries: Vec<SensorExposure>,
}

impl AeTable {
    fn base_entry(index: usize) -> SensorExposure {
        let total = (LEVEL_SPAN - 1 - index) as i32;
        let gain = (total - TIME_SPAN_TENTH_DB).clamp(0, GAIN_SPAN_TENTH_DB);
        let time_tenth_db = total.min(TIME_SPAN_TENTH_DB);
        let time = 10f64.powf(time_tenth_db as f64 / 200.0).round() as i32;
        SensorExposure { gain, time }
    }

    /// Build the table for a frame interval in milliseconds.
    pub fn build(frame_interval_ms: u16) -> AeTable {
        let budget = frame_interval_ms as i32 * 10;
        let mut entries = vec![SensorExposure { gain: 0, time: 0 }; LEVEL_SPAN];
        let mut limit_time = 1;
        let mut extra_gain = 0;
        for index in (0..LEVEL_SPAN).rev() {
            let base = Self::base_entry(index);
            if base.time > budget {
                extra_gain += 1;
            } else {
                limit_time = base.time;
            }
            entries[index] = SensorExposure {
                gain: base.gain + extra_gain,
                time: limit_time,
            };
        }
        AeTable { entries }
    }

    /// Sensor settings for an exposure level.
    pub fn lookup(&self, level: i32) -> SensorExposure {
        self.entries[(EXPOSE_LV_MAX - level) as usize]
    }
}

/// Luminance of the measurement window from the accumulated channel sums.
///
/// Channel means are normalized by the window pixel count (red and blue
/// have one Bayer site per 2x2 quad, green two), corrected by the 4.12
/// white-balance gains, then weighted 0.299/0.687/0.114.
pub fn measure_luminance(stats: &AccumStats, area_w: u16, area_h: u16, wb: [u16; 3]) -> Option<i32> {
    let pixels = area_w as u64 * area_h as u64;
    if pixels == 0 {
        return None;
    }
    let red = (stats.sum_r as u64 * 4 / pixels) * wb[0] as u64 / 0x1000;
    let green = (stats.sum_g as u64 * 2 / pixels) * wb[1] as u64 / 0x1000;
    let blue = (stats.sum_b as u64 * 4 / pixels) * wb[2] as u64 / 0x1000;
    Some(((red * 299 + green * 687 + blue * 114) / (1000 * 0x10)) as i32)
}

/// Closed-loop exposure controller state.
///
/// # Example
/// ```rust
/// use rzisp_engine::ae::AeController;
///
/// let mut ae = AeController::new(33);
/// ae.configure(true, 0, 128, 10).unwrap();
/// assert!(ae.enabled());
/// ```
#[derive(Debug)]
pub struct AeController {
    enabled: bool,
    expose_level: i32,
    target: i32,
    threshold: i32,
    settle_wait: i32,
    history: [i32; HISTORY_LEN],
    table: AeTable,
    frame_interval: u16,
}

impl AeController {
    /// Fresh controller with power-on defaults, disabled.
    pub fn new(frame_interval_ms: u16) -> AeController {
        AeController {
            enabled: false,
            expose_level: EXPOSE_LV_DEFAULT,
            target: TARGET_LUMA_DEFAULT,
            threshold: THRESHOLD_DEFAULT,
            settle_wait: CAMERA_SETTLE_FRAMES,
            history: Self::history_seed(),
            table: AeTable::build(frame_interval_ms),
            frame_interval: frame_interval_ms,
        }
    }

    fn history_seed() -> [i32; HISTORY_LEN] {
        let mut history = [0; HISTORY_LEN];
        for (i, slot) in history.iter_mut().enumerate() {
            *slot = HISTORY_INIT - i as i32;
        }
        history
    }

    /// Reconfigure the loop. Resets the oscillation history, re-arms the
    /// settle wait, and rebuilds the exposure table.
    pub fn configure(
        &mut self,
        enabled: bool,
        expose_level: i32,
        target: i32,
        threshold: i32,
    ) -> IspResult<()> {
        let level_ok = (EXPOSE_LV_MIN..=EXPOSE_LV_MAX).contains(&expose_level);
        let target_ok = (TARGET_LUMA_MIN..=TARGET_LUMA_MAX).contains(&target);
        let threshold_ok = (THRESHOLD_MIN..=THRESHOLD_MAX).contains(&threshold);
        if !level_ok || !target_ok || !threshold_ok {
            return Err(IspError::InvalidArgument);
        }
        self.enabled = enabled;
        self.expose_level = expose_level;
        self.target = target;
        self.threshold = threshold;
        self.settle_wait = CAMERA_SETTLE_FRAMES;
        self.history = Self::history_seed();
        self.table = AeTable::build(self.frame_interval);
        Ok(())
    }

    /// Replace the loop parameters without touching the oscillation
    /// history or the exposure table (the full-blob apply path). Only the
    /// settle wait re-arms.
    pub fn set_parameters(&mut self, enabled: bool, expose_level: i32, target: i32, threshold: i32) {
        self.enabled = enabled;
        self.expose_level = expose_level;
        self.target = target;
        self.threshold = threshold;
        self.settle_wait = CAMERA_SETTLE_FRAMES;
    }

    /// Change the frame interval (rebuilds the exposure table).
    pub fn set_frame_interval(&mut self, frame_interval_ms: u16) {
        self.frame_interval = frame_interval_ms;
        self.table = AeTable::build(frame_interval_ms);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn expose_level(&self) -> i32 {
        self.expose_level
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Sensor gain/exposure for the current level.
    pub fn sensor_exposure(&self) -> SensorExposure {
        self.table.lookup(self.expose_level)
    }

    /// One control step on a measured luminance. Returns the level after
    /// the step; frames inside the settle window are skipped.
    pub fn evaluate(&mut self, luminance: i32) -> i32 {
        if self.settle_wait > 0 {
            self.settle_wait -= 1;
            return self.expose_level;
        }

        let mut threshold = self.threshold;
        if self.history[0] == self.history[2] && self.history[1] == self.history[3] {
            // The level has been flipping between two values; widen the
            // dead band to damp the hunting.
            threshold *= 2;
        }

        let last_level = self.expose_level;
        if luminance < self.target - threshold * TIER_HIGH {
            self.expose_level += 20; // +2.0 dB
        } else if luminance < self.target - threshold * TIER_MID {
            self.expose_level += 5; // +0.5 dB
        } else if luminance < self.target - threshold {
            self.expose_level += 1; // +0.1 dB
        }
        if luminance > self.target + threshold * TIER_HIGH {
            self.expose_level -= 20;
        } else if luminance > self.target + threshold * TIER_MID {
            self.expose_level -= 5;
        } else if luminance > self.target + threshold {
            self.expose_level -= 1;
        }

        self.expose_level = self.expose_level.clamp(EXPOSE_LV_MIN, EXPOSE_LV_MAX);

        if self.expose_level != last_level {
            self.settle_wait = CAMERA_SETTLE_FRAMES;
        }
        if self.expose_level != self.history[0] {
            self.history.rotate_right(1);
            self.history[0] = self.expose_level;
        }
        self.expose_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled(enabled: bool, level: i32, target: i32, threshold: i32) -> AeController {
        let mut ae = AeController::new(33);
        ae.configure(enabled, level, target, threshold).unwrap();
        ae.settle_wait = 0;
        ae
    }

    #[test]
    fn configure_rejects_out_of_range() {
        let mut ae = AeController::new(33);
        assert_eq!(ae.configure(true, 401, 128, 10), Err(IspError::InvalidArgument));
        assert_eq!(ae.configure(true, 0, 0, 10), Err(IspError::InvalidArgument));
        assert_eq!(ae.configure(true, 0, 255, 10), Err(IspError::InvalidArgument));
        assert_eq!(ae.configure(true, 0, 128, 0), Err(IspError::InvalidArgument));
        assert_eq!(ae.configure(true, 0, 128, 65), Err(IspError::InvalidArgument));
        assert!(ae.configure(true, -400, 1, 64).is_ok());
    }

    #[test]
    fn settle_window_skips_evaluations() {
        let mut ae = AeController::new(33);
        ae.configure(true, 0, 128, 10).unwrap();
        // Two settle frames pass untouched even with a huge error.
        assert_eq!(ae.evaluate(0), 0);
        assert_eq!(ae.evaluate(0), 0);
        assert_eq!(ae.evaluate(0), 20);
    }

    #[test]
    fn deep_underexposure_steps_by_twenty_to_clamp() {
        let mut ae = settled(true, 0, 200, 10);
        let mut level = 0;
        // Luminance pinned far below target - 3*threshold.
        for _ in 0..40 {
            let next = ae.evaluate(0);
            ae.settle_wait = 0;
            if next != level {
                assert_eq!(next - level, 20);
            }
            level = next;
        }
        assert_eq!(level, 400);
        // Clamped: further evaluations hold at the ceiling.
        assert_eq!(ae.evaluate(0), 400);
    }

    #[test]
    fn step_tiers_scale_with_distance() {
        let mut ae = settled(true, 0, 128, 10);
        assert_eq!(ae.evaluate(128 - 31), 20);

        let mut ae = settled(true, 0, 128, 10);
        assert_eq!(ae.evaluate(128 - 21), 5);

        let mut ae = settled(true, 0, 128, 10);
        assert_eq!(ae.evaluate(128 - 11), 1);

        let mut ae = settled(true, 0, 128, 10);
        assert_eq!(ae.evaluate(128), 0);

        let mut ae = settled(true, 0, 128, 10);
        assert_eq!(ae.evaluate(128 + 31), -20);
    }

    #[test]
    fn oscillation_doubles_the_threshold() {
        let mut ae = settled(true, 100, 128, 10);
        ae.history = [100, 101, 100, 101];
        // 15 beyond target is past the configured threshold (10) but
        // inside the doubled band (20): damped, no step.
        assert_eq!(ae.evaluate(128 - 15), 100);

        let mut ae = settled(true, 100, 128, 10);
        ae.history = [100, 101, 100, 102];
        // Same error without the oscillating history does step.
        assert_eq!(ae.evaluate(128 - 15), 101);
    }

    #[test]
    fn history_records_the_level_and_holds_while_steady() {
        let mut ae = settled(true, 100, 128, 10);
        let seeded = ae.history;
        // The first pass records the live level into the freshly seeded
        // ring even without a step.
        ae.evaluate(128);
        assert_eq!(ae.history, [100, seeded[0], seeded[1], seeded[2]]);
        // A steady level does not shift again.
        ae.evaluate(128);
        assert_eq!(ae.history, [100, seeded[0], seeded[1], seeded[2]]);
        // A step pushes the new level in.
        ae.evaluate(0);
        assert_eq!(ae.history[0], 120);
        assert_eq!(ae.history[1], 100);
    }

    #[test]
    fn table_converts_infeasible_time_into_gain() {
        let wide = AeTable::build(33);
        let tight = AeTable::build(10);
        // Brightest entry: the 33ms table fits the whole time curve, the
        // 10ms table pins time at the interval budget and adds gain.
        let wide_top = wide.lookup(400);
        let tight_top = tight.lookup(400);
        assert!(tight_top.time <= 100);
        assert_eq!(wide_top.time, 316);
        assert!(tight_top.gain > wide_top.gain);
    }

    #[test]
    fn luminance_weights_favor_green() {
        let stats = AccumStats {
            sum_r: 0,
            sum_g: 320 * 240 / 2 * 128,
            sum_b: 0,
            ..Default::default()
        };
        // Unity white balance (0x1000 = 1.0 in 4.12). Mean green is 128,
        // weighted 0.687 and scaled by the 1/16 accumulator headroom.
        let lum = measure_luminance(&stats, 320, 240, [0x1000; 3]).unwrap();
        assert_eq!(lum, 128 * 687 / (1000 * 0x10));
        // Zero-sized window yields no measurement.
        assert!(measure_luminance(&stats, 0, 240, [0x1000; 3]).is_none());
    }
}
