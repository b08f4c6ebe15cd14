//! Gamma lookup-table synthesis.
//!
//! The control value is the gamma exponent in hundredths (100 = 1.0 =
//! identity). The hardware consumes a 256-entry 8-bit curve. Granularity
//! narrows with magnitude: single steps below 1.00, tenths up to 9.99,
//! whole units up to 99.99, matching the three precomputed table banks
//! the curve generator was derived from.

use rzisp_core::format::limits::{GAMMA_DEFAULT, GAMMA_MAX};

const TBL1_LIMIT: i32 = 100;
const TBL2_LIMIT: i32 = 1000;

/// Quantize a raw control value to the granularity of its bank, falling
/// back to the default for out-of-range input.
fn quantize(gamma: i32) -> i32 {
    let gamma = if gamma <= 0 || gamma > GAMMA_MAX {
        GAMMA_DEFAULT
    } else {
        gamma
    };
    if gamma < TBL1_LIMIT {
        gamma
    } else if gamma < TBL2_LIMIT {
        gamma - (gamma - TBL1_LIMIT) % 10
    } else {
        gamma - (gamma - TBL2_LIMIT) % 100
    }
}

/// Build the 256-entry curve for a gamma control value.
///
/// # Example
/// ```rust
/// use rzisp_engine::gamma::gamma_table;
///
/// let identity = gamma_table(100);
/// assert_eq!(identity[0], 0);
/// assert_eq!(identity[128], 128);
/// assert_eq!(identity[255], 255);
/// ```
pub fn gamma_table(gamma: i32) -> [u8; 256] {
    let gamma = quantize(gamma);
    let exponent = 100.0 / gamma as f64;
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let normalized = i as f64 / 255.0;
        *entry = (normalized.powf(exponent) * 255.0).round().min(255.0) as u8;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_at_default() {
        let table = gamma_table(100);
        for (i, v) in table.iter().enumerate() {
            assert_eq!(*v as usize, i);
        }
    }

    #[test]
    fn brightening_curve_above_default() {
        // gamma 2.20 lifts midtones.
        let table = gamma_table(220);
        assert!(table[64] > 64);
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 255);
    }

    #[test]
    fn darkening_curve_below_default() {
        let table = gamma_table(45);
        assert!(table[64] < 64);
    }

    #[test]
    fn quantization_banks() {
        assert_eq!(quantize(99), 99);
        assert_eq!(quantize(105), 100);
        assert_eq!(quantize(219), 210);
        assert_eq!(quantize(1250), 1200);
    }

    #[test]
    fn out_of_range_falls_back_to_default() {
        assert_eq!(gamma_table(0), gamma_table(100));
        assert_eq!(gamma_table(10000), gamma_table(100));
    }

    #[test]
    fn curves_are_monotonic() {
        for gamma in [30, 100, 220, 999, 2500] {
            let table = gamma_table(gamma);
            for w in table.windows(2) {
                assert!(w[1] >= w[0], "gamma {gamma} not monotonic");
            }
        }
    }
}
