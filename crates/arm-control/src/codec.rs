//! Raw-unit / normalized-percentage conversions.
//!
//! Raw values are 12-bit servo register units. Normalized values are
//! percentages: bipolar joints span `[-100, 100]`, unipolar (jaw) joints
//! `[0, 100]`. Before a joint is calibrated a fixed default mapping keeps the
//! system usable: bipolar joints assume center 2048 with 2048 units of travel
//! each way, unipolar joints assume the full `0..=4095` register range.

use crate::calibration::JointCalibration;
use crate::joint::JointKind;
use servo_transport::{RAW_CENTER, RAW_MAX};

/// Map a raw servo position to a normalized percentage.
///
/// With a complete calibration the raw input is bounded to the discovered
/// `[min, max]` before mapping; the discovered range is never extrapolated.
pub fn normalize(raw: u16, kind: JointKind, calibration: Option<&JointCalibration>) -> f64 {
    match calibration.and_then(JointCalibration::bounds) {
        Some((min, max)) => {
            if max == min {
                // Degenerate discovered range; zero beats dividing by it.
                return 0.0;
            }
            let bounded = raw.clamp(min, max);
            let t = f64::from(bounded - min) / f64::from(max - min);
            match kind {
                JointKind::Bipolar => t * 200.0 - 100.0,
                JointKind::Unipolar => t * 100.0,
            }
        }
        None => match kind {
            JointKind::Bipolar => {
                (f64::from(raw) - f64::from(RAW_CENTER)) / f64::from(RAW_CENTER) * 100.0
            }
            JointKind::Unipolar => f64::from(raw) / f64::from(RAW_MAX) * 100.0,
        },
    }
}

/// Algebraic inverse of [`normalize`], rounded to the nearest raw unit and
/// bounded to the calibrated range (or the full register range when
/// uncalibrated).
pub fn denormalize(value: f64, kind: JointKind, calibration: Option<&JointCalibration>) -> u16 {
    match calibration.and_then(JointCalibration::bounds) {
        Some((min, max)) => {
            let t = match kind {
                JointKind::Bipolar => (value + 100.0) / 200.0,
                JointKind::Unipolar => value / 100.0,
            };
            let raw = f64::from(min) + t * f64::from(max - min);
            (raw.round() as i64).clamp(i64::from(min), i64::from(max)) as u16
        }
        None => {
            let raw = match kind {
                JointKind::Bipolar => {
                    value / 100.0 * f64::from(RAW_CENTER) + f64::from(RAW_CENTER)
                }
                JointKind::Unipolar => value / 100.0 * f64::from(RAW_MAX),
            };
            (raw.round() as i64).clamp(0, i64::from(RAW_MAX)) as u16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn calibrated(min: u16, max: u16) -> JointCalibration {
        JointCalibration {
            is_calibrated: true,
            min_raw: Some(min),
            max_raw: Some(max),
        }
    }

    #[test]
    fn bipolar_maps_discovered_range_onto_plus_minus_100() {
        let cal = calibrated(1000, 3000);
        assert_relative_eq!(normalize(1000, JointKind::Bipolar, Some(&cal)), -100.0);
        assert_relative_eq!(normalize(2000, JointKind::Bipolar, Some(&cal)), 0.0);
        assert_relative_eq!(normalize(3000, JointKind::Bipolar, Some(&cal)), 100.0);
    }

    #[test]
    fn unipolar_maps_discovered_range_onto_0_100() {
        let cal = calibrated(2000, 3600);
        assert_relative_eq!(normalize(2000, JointKind::Unipolar, Some(&cal)), 0.0);
        assert_relative_eq!(normalize(3600, JointKind::Unipolar, Some(&cal)), 100.0);
        assert_relative_eq!(normalize(2800, JointKind::Unipolar, Some(&cal)), 50.0);
    }

    #[test]
    fn raw_outside_discovered_range_is_bounded_not_extrapolated() {
        let cal = calibrated(1000, 3000);
        assert_relative_eq!(normalize(500, JointKind::Bipolar, Some(&cal)), -100.0);
        assert_relative_eq!(normalize(4000, JointKind::Bipolar, Some(&cal)), 100.0);
    }

    #[test]
    fn degenerate_range_normalizes_to_zero() {
        let cal = calibrated(2048, 2048);
        assert_relative_eq!(normalize(2048, JointKind::Bipolar, Some(&cal)), 0.0);
        assert_relative_eq!(normalize(100, JointKind::Bipolar, Some(&cal)), 0.0);
    }

    #[test]
    fn uncalibrated_falls_back_to_default_mapping() {
        assert_relative_eq!(normalize(2048, JointKind::Bipolar, None), 0.0);
        assert_relative_eq!(normalize(0, JointKind::Bipolar, None), -100.0);
        assert_relative_eq!(normalize(4095, JointKind::Unipolar, None), 100.0);
        assert_relative_eq!(normalize(0, JointKind::Unipolar, None), 0.0);
    }

    #[test]
    fn incomplete_calibration_counts_as_uncalibrated() {
        let cal = JointCalibration {
            is_calibrated: false,
            min_raw: Some(1000),
            max_raw: Some(3000),
        };
        assert_relative_eq!(normalize(2048, JointKind::Bipolar, Some(&cal)), 0.0);
    }

    #[test]
    fn denormalize_bounds_to_calibrated_range() {
        let cal = calibrated(1000, 3000);
        assert_eq!(denormalize(-100.0, JointKind::Bipolar, Some(&cal)), 1000);
        assert_eq!(denormalize(100.0, JointKind::Bipolar, Some(&cal)), 3000);
        assert_eq!(denormalize(250.0, JointKind::Bipolar, Some(&cal)), 3000);
        assert_eq!(denormalize(0.0, JointKind::Bipolar, Some(&cal)), 2000);
    }

    #[test]
    fn denormalize_uncalibrated_bounds_to_register_range() {
        assert_eq!(denormalize(0.0, JointKind::Bipolar, None), 2048);
        assert_eq!(denormalize(-100.0, JointKind::Bipolar, None), 0);
        assert_eq!(denormalize(100.0, JointKind::Unipolar, None), 4095);
        assert_eq!(denormalize(900.0, JointKind::Bipolar, None), 4095);
    }

    #[test]
    fn round_trip_stays_within_one_raw_unit() {
        let cal = calibrated(1200, 3300);
        for kind in [JointKind::Bipolar, JointKind::Unipolar] {
            let (lo, hi) = kind.bounds();
            for value in [lo, (lo + hi) / 2.0, hi, lo + 0.3, hi - 0.7] {
                let raw = denormalize(value, kind, Some(&cal));
                let back = normalize(raw, kind, Some(&cal));
                let unit = match kind {
                    JointKind::Bipolar => 200.0 / 2100.0,
                    JointKind::Unipolar => 100.0 / 2100.0,
                };
                assert!(
                    (back - value).abs() <= unit,
                    "{kind:?} {value} -> {raw} -> {back}"
                );
            }
        }
    }
}
