use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every tunable the control core exposes. All fields have working defaults;
/// deserialize a partial JSON object over them to override.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Serial link speed for STS-class buses.
    pub baud_rate: u32,
    /// Hardware consumer / calibration sampling cadence.
    pub poll_interval_ms: u64,
    /// Raw units a servo must move before the consumer emits an update.
    pub raw_change_threshold: u16,
    /// Commands closer together than this are dedup candidates.
    pub dedup_window_ms: u64,
    /// Largest per-joint delta (normalized units) still considered "the same".
    pub dedup_epsilon: f64,
    /// Raw range a joint must sweep during calibration to count as calibrated.
    pub calibration_range_threshold: u16,
    /// Bounded retries for position reads/writes.
    pub write_retries: u32,
    pub retry_delay_ms: u64,
    /// Pause between per-servo torque writes so the bus is not overwhelmed.
    pub inter_write_delay_ms: u64,
    /// Pending commands kept while one is in flight; oldest dropped beyond this.
    pub command_queue_capacity: usize,
    /// Relay producer full-state keep-alive cadence.
    pub state_sync_interval_ms: u64,
    /// Quiet period after which a relay consumer logs a health warning.
    pub message_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            baud_rate: 1_000_000,
            poll_interval_ms: 20,
            raw_change_threshold: 4,
            dedup_window_ms: 16,
            dedup_epsilon: 0.5,
            calibration_range_threshold: 500,
            write_retries: 3,
            retry_delay_ms: 100,
            inter_write_delay_ms: 10,
            command_queue_capacity: 32,
            state_sync_interval_ms: 5_000,
            message_timeout_ms: 5_000,
        }
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn inter_write_delay(&self) -> Duration {
        Duration::from_millis(self.inter_write_delay_ms)
    }

    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_millis(self.state_sync_interval_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}
