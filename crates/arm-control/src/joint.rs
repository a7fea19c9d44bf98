use serde::{Deserialize, Serialize};
use std::time::Instant;
use time::OffsetDateTime;

/// How a joint's normalized value is ranged.
///
/// Every arm joint is bipolar except the jaw/gripper, which only opens one
/// way from its closed position.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    /// Normalized range `[-100, 100]`, zero at center.
    #[default]
    Bipolar,
    /// Normalized range `[0, 100]`.
    Unipolar,
}

impl JointKind {
    pub fn bounds(self) -> (f64, f64) {
        match self {
            JointKind::Bipolar => (-100.0, 100.0),
            JointKind::Unipolar => (0.0, 100.0),
        }
    }

    /// Clamp a normalized value into this kind's range.
    pub fn clamp(self, value: f64) -> f64 {
        let (lo, hi) = self.bounds();
        value.clamp(lo, hi)
    }
}

/// Live state of one joint. `value` is always normalized and always inside
/// the kind's range; the Robot's apply step is the only mutator.
#[derive(Clone, Debug)]
pub struct JointState {
    pub name: String,
    pub kind: JointKind,
    pub value: f64,
    /// Mechanical travel limits in radians, when the descriptor declares them.
    pub limits: Option<(f64, f64)>,
    pub servo_id: Option<u8>,
}

/// A batch of normalized joint targets moving through the command pipeline.
/// Transient; never persisted.
#[derive(Clone, Debug)]
pub struct RobotCommand {
    pub joints: Vec<(String, f64)>,
    pub timestamp: Instant,
}

impl RobotCommand {
    pub fn new(joints: Vec<(String, f64)>) -> Self {
        Self {
            joints,
            timestamp: Instant::now(),
        }
    }

    pub fn single(name: impl Into<String>, value: f64) -> Self {
        Self::new(vec![(name.into(), value)])
    }
}

/// Connection health of a driver, published on a watch channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub error: Option<String>,
    pub last_connected: Option<OffsetDateTime>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            is_connected: true,
            error: None,
            last_connected: Some(OffsetDateTime::now_utc()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            is_connected: false,
            error: Some(error.into()),
            last_connected: None,
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}
