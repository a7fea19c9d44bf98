//! Per-joint calibration state and the interactive calibration session.
//!
//! A joint is calibrated once its discovered raw range is wide enough to map
//! onto the normalized scale. Calibration lives with the physical connection
//! that produced it; presets saved to disk can short-circuit the interactive
//! session entirely.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use servo_transport::RAW_MAX;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::watch;
use tracing::warn;

/// Discovered raw range for one joint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointCalibration {
    pub is_calibrated: bool,
    pub min_raw: Option<u16>,
    pub max_raw: Option<u16>,
}

impl JointCalibration {
    /// Bounds usable for value mapping; `None` until calibration completes.
    pub fn bounds(&self) -> Option<(u16, u16)> {
        if !self.is_calibrated {
            return None;
        }
        match (self.min_raw, self.max_raw) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// The full register range, used by the "skip calibration" path.
    pub fn full_range() -> Self {
        Self {
            is_calibrated: true,
            min_raw: Some(0),
            max_raw: Some(RAW_MAX),
        }
    }
}

/// Calibration for every joint of one arm. Serializes to a JSON preset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSet {
    pub joints: HashMap<String, JointCalibration>,
}

impl CalibrationSet {
    pub fn get(&self, joint: &str) -> Option<&JointCalibration> {
        self.joints.get(joint)
    }

    /// True while any named joint lacks a complete calibration.
    pub fn needs_calibration(&self, names: &[String]) -> bool {
        names
            .iter()
            .any(|n| self.joints.get(n).map(|c| c.bounds().is_none()).unwrap_or(true))
    }

    /// Mark every named joint calibrated over the full register range.
    pub fn mark_full_range(&mut self, names: &[String]) {
        for name in names {
            self.joints
                .insert(name.clone(), JointCalibration::full_range());
        }
    }

    pub fn merge(&mut self, other: CalibrationSet) {
        self.joints.extend(other.joints);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ControlError::BadPreset(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| ControlError::BadPreset(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ControlError::BadPreset(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ControlError::BadPreset(format!("{}: {e}", path.display())))
    }
}

#[derive(Clone, Copy, Debug)]
struct RangeTrack {
    min: u16,
    max: u16,
    last: u16,
}

/// Result of completing a calibration session.
#[derive(Clone, Debug)]
pub struct CalibrationOutcome {
    pub calibrations: CalibrationSet,
    /// Raw position each joint was left at, used to re-seed normalized state.
    pub final_positions: HashMap<String, u16>,
    /// Joints whose discovered range never reached the threshold; they stay
    /// uncalibrated and the caller decides whether to re-run.
    pub below_threshold: Vec<String>,
}

/// An in-progress calibration: tracks the widening raw range per joint as
/// the arm is moved through its travel by hand.
pub struct CalibrationSession {
    threshold: u16,
    ranges: HashMap<String, RangeTrack>,
    progress_tx: watch::Sender<f64>,
}

impl CalibrationSession {
    /// Start a session from the joints' current raw positions; each range
    /// begins as a single point.
    pub fn begin(initial: &HashMap<String, u16>, threshold: u16) -> Self {
        let ranges = initial
            .iter()
            .map(|(name, &raw)| {
                (
                    name.clone(),
                    RangeTrack {
                        min: raw,
                        max: raw,
                        last: raw,
                    },
                )
            })
            .collect();
        let (progress_tx, _) = watch::channel(0.0);
        Self {
            threshold,
            ranges,
            progress_tx,
        }
    }

    /// Fold one sampled raw position into the joint's discovered range.
    pub fn record(&mut self, joint: &str, raw: u16) {
        let Some(track) = self.ranges.get_mut(joint) else {
            return;
        };
        track.last = raw;
        if raw < track.min {
            track.min = raw;
        }
        if raw > track.max {
            track.max = raw;
        }
        let progress = self.progress();
        let _ = self.progress_tx.send(progress);
    }

    /// Aggregate progress: the average per-joint range coverage, capped at
    /// 100 per joint.
    pub fn progress(&self) -> f64 {
        if self.ranges.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .ranges
            .values()
            .map(|t| {
                let range = f64::from(t.max - t.min);
                (range / f64::from(self.threshold) * 100.0).min(100.0)
            })
            .sum();
        total / self.ranges.len() as f64
    }

    pub fn watch_progress(&self) -> watch::Receiver<f64> {
        self.progress_tx.subscribe()
    }

    /// Finish the session. Joints that swept at least the threshold become
    /// calibrated; the rest are reported back uncalibrated.
    pub fn complete(self) -> CalibrationOutcome {
        let mut calibrations = CalibrationSet::default();
        let mut final_positions = HashMap::new();
        let mut below_threshold = Vec::new();
        for (name, track) in &self.ranges {
            let range = track.max - track.min;
            let calibrated = range >= self.threshold;
            if !calibrated {
                warn!(
                    joint = name.as_str(),
                    range,
                    threshold = self.threshold,
                    "joint range below calibration threshold, leaving uncalibrated"
                );
                below_threshold.push(name.clone());
            }
            calibrations.joints.insert(
                name.clone(),
                JointCalibration {
                    is_calibrated: calibrated,
                    min_raw: Some(track.min),
                    max_raw: Some(track.max),
                },
            );
            final_positions.insert(name.clone(), track.last);
        }
        below_threshold.sort();
        CalibrationOutcome {
            calibrations,
            final_positions,
            below_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn initial(pairs: &[(&str, u16)]) -> HashMap<String, u16> {
        pairs.iter().map(|&(n, r)| (n.to_string(), r)).collect()
    }

    #[test]
    fn range_widens_only_outward() {
        let mut session = CalibrationSession::begin(&initial(&[("Rotation", 2000)]), 500);
        session.record("Rotation", 2200);
        session.record("Rotation", 2100);
        session.record("Rotation", 1800);
        let outcome = session.complete();
        let cal = outcome.calibrations.get("Rotation").unwrap();
        assert_eq!(cal.min_raw, Some(1800));
        assert_eq!(cal.max_raw, Some(2200));
    }

    #[test]
    fn exactly_threshold_range_calibrates() {
        let mut session = CalibrationSession::begin(&initial(&[("Rotation", 1800)]), 500);
        session.record("Rotation", 2300);
        let outcome = session.complete();
        assert!(outcome.calibrations.get("Rotation").unwrap().is_calibrated);
        assert!(outcome.below_threshold.is_empty());
    }

    #[test]
    fn one_short_of_threshold_stays_uncalibrated() {
        let mut session = CalibrationSession::begin(&initial(&[("Rotation", 1800)]), 500);
        session.record("Rotation", 2299);
        let outcome = session.complete();
        assert!(!outcome.calibrations.get("Rotation").unwrap().is_calibrated);
        assert_eq!(outcome.below_threshold, vec!["Rotation".to_string()]);
    }

    #[test]
    fn final_position_is_last_sample_not_extreme() {
        let mut session = CalibrationSession::begin(&initial(&[("Jaw", 2000)]), 500);
        session.record("Jaw", 3600);
        session.record("Jaw", 2500);
        let outcome = session.complete();
        assert_eq!(outcome.final_positions.get("Jaw"), Some(&2500));
    }

    #[test]
    fn progress_averages_joints_and_caps_at_100() {
        let mut session =
            CalibrationSession::begin(&initial(&[("Rotation", 2000), ("Jaw", 2000)]), 500);
        // Rotation sweeps double the threshold, Jaw not at all.
        session.record("Rotation", 3000);
        assert_relative_eq!(session.progress(), 50.0);
        session.record("Jaw", 2250);
        assert_relative_eq!(session.progress(), 75.0);
    }

    #[test]
    fn unknown_joint_samples_are_ignored() {
        let mut session = CalibrationSession::begin(&initial(&[("Rotation", 2000)]), 500);
        session.record("Ghost", 100);
        let outcome = session.complete();
        assert!(!outcome.final_positions.contains_key("Ghost"));
    }

    #[test]
    fn full_range_skip_marks_everything_calibrated() {
        let mut set = CalibrationSet::default();
        set.mark_full_range(&["Rotation".to_string(), "Jaw".to_string()]);
        assert!(!set.needs_calibration(&["Rotation".to_string(), "Jaw".to_string()]));
        assert_eq!(set.get("Jaw").unwrap().bounds(), Some((0, 4095)));
    }

    #[test]
    fn preset_round_trips_through_json() {
        let mut set = CalibrationSet::default();
        set.joints.insert(
            "Rotation".to_string(),
            JointCalibration {
                is_calibrated: true,
                min_raw: Some(1000),
                max_raw: Some(3000),
            },
        );
        let json = serde_json::to_string(&set).unwrap();
        let back: CalibrationSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn preset_saves_and_loads_from_disk() {
        let mut set = CalibrationSet::default();
        set.joints.insert(
            "Jaw".to_string(),
            JointCalibration {
                is_calibrated: true,
                min_raw: Some(2000),
                max_raw: Some(3600),
            },
        );
        let path = std::env::temp_dir().join("arm-calibration-preset-test.json");
        set.save(&path).unwrap();
        let back = CalibrationSet::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, set);
        assert!(!back.needs_calibration(&["Jaw".to_string()]));
    }

    #[test]
    fn missing_preset_file_is_reported() {
        let err = CalibrationSet::load(Path::new("/nonexistent/preset.json")).unwrap_err();
        assert!(matches!(err, ControlError::BadPreset(_)));
    }

    #[test]
    fn needs_calibration_until_every_joint_has_bounds() {
        let names = vec!["Rotation".to_string(), "Jaw".to_string()];
        let mut set = CalibrationSet::default();
        assert!(set.needs_calibration(&names));
        set.joints.insert(
            "Rotation".to_string(),
            JointCalibration::full_range(),
        );
        assert!(set.needs_calibration(&names));
        set.joints.insert("Jaw".to_string(), JointCalibration::full_range());
        assert!(!set.needs_calibration(&names));
    }
}
