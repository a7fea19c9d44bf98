//! Shared handle to one physical servo bus.
//!
//! Several logical drivers (a calibration session, a consumer, a producer)
//! can hold the same [`ArmBus`]; every read or write goes through one async
//! mutex, so traffic on the wire is strictly serialized and "port is busy"
//! failures cannot happen by construction. Reads and writes that touch more
//! than one servo use the batched bus forms.

use crate::calibration::{CalibrationOutcome, CalibrationSession, CalibrationSet};
use crate::codec;
use crate::config::ControlConfig;
use crate::descriptor::ArmDescriptor;
use crate::error::{ControlError, Result};
use crate::joint::{ConnectionStatus, JointKind};
use servo_transport::ServoBus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
struct JointBinding {
    name: String,
    servo_id: u8,
    kind: JointKind,
}

pub struct ArmBus {
    bus: Mutex<Box<dyn ServoBus>>,
    joints: Vec<JointBinding>,
    config: ControlConfig,
    calibration: StdMutex<CalibrationSet>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ArmBus {
    /// Wrap an already-open bus.
    pub fn new(bus: Box<dyn ServoBus>, descriptor: &ArmDescriptor, config: ControlConfig) -> Arc<Self> {
        let joints = descriptor
            .joints
            .iter()
            .map(|j| JointBinding {
                name: j.name.clone(),
                servo_id: j.servo_id,
                kind: j.kind,
            })
            .collect();
        let (status_tx, _) = watch::channel(ConnectionStatus::connected());
        Arc::new(Self {
            bus: Mutex::new(bus),
            joints,
            config,
            calibration: StdMutex::new(CalibrationSet::default()),
            status_tx,
        })
    }

    /// Open a backend on `port` and wrap it.
    pub fn open<B: ServoBus + 'static>(
        port: &str,
        descriptor: &ArmDescriptor,
        config: ControlConfig,
    ) -> Result<Arc<Self>> {
        let bus =
            B::open(port, config.baud_rate).map_err(|e| ControlError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(Box::new(bus), descriptor, config))
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }

    pub fn servo_ids(&self) -> Vec<u8> {
        self.joints.iter().map(|j| j.servo_id).collect()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    fn binding(&self, joint: &str) -> Result<&JointBinding> {
        self.joints
            .iter()
            .find(|j| j.name == joint)
            .ok_or_else(|| ControlError::UnknownJoint(joint.to_string()))
    }

    fn calibration_guard(&self) -> std::sync::MutexGuard<'_, CalibrationSet> {
        match self.calibration.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ----- calibration state -----

    pub fn needs_calibration(&self) -> bool {
        self.calibration_guard()
            .needs_calibration(&self.joint_names())
    }

    pub fn calibration(&self) -> CalibrationSet {
        self.calibration_guard().clone()
    }

    /// Load a preset, marking its joints calibrated without a session.
    pub fn apply_preset(&self, preset: CalibrationSet) {
        self.calibration_guard().merge(preset);
    }

    /// Assume full register range on every joint, bypassing the session.
    pub fn skip_calibration(&self) {
        let names = self.joint_names();
        self.calibration_guard().mark_full_range(&names);
    }

    // ----- value mapping -----

    pub fn normalize(&self, joint: &str, raw: u16) -> Result<f64> {
        let binding = self.binding(joint)?;
        let cal = self.calibration_guard();
        Ok(codec::normalize(raw, binding.kind, cal.get(joint)))
    }

    /// Map a normalized value back to `(servo_id, raw)` for the wire.
    pub fn denormalize(&self, joint: &str, value: f64) -> Result<(u8, u16)> {
        let binding = self.binding(joint)?;
        let cal = self.calibration_guard();
        Ok((
            binding.servo_id,
            codec::denormalize(value, binding.kind, cal.get(joint)),
        ))
    }

    // ----- bus I/O -----

    /// Read every joint's raw position, batched when the arm has more than
    /// one servo. Bounded retries before surfacing a read failure.
    pub async fn read_all_raw(&self) -> Result<HashMap<String, u16>> {
        let ids = self.servo_ids();
        let mut bus = self.bus.lock().await;
        let mut attempt = 0;
        let pairs = loop {
            let res = if ids.len() == 1 {
                bus.read_position(ids[0]).map(|raw| vec![(ids[0], raw)])
            } else {
                bus.sync_read_positions(&ids)
            };
            match res {
                Ok(pairs) => break pairs,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.write_retries {
                        self.note_error(format!("position read failed: {e}"));
                        return Err(ControlError::HardwareReadFailed {
                            servo_id: ids.first().copied().unwrap_or(0),
                            source: e,
                        });
                    }
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        };
        drop(bus);
        let mut out = HashMap::with_capacity(pairs.len());
        for (id, raw) in pairs {
            if let Some(binding) = self.joints.iter().find(|j| j.servo_id == id) {
                out.insert(binding.name.clone(), raw);
            }
        }
        Ok(out)
    }

    /// Write raw goal positions, batched when more than one servo changes.
    /// Retried up to the configured maximum with a fixed delay; exhaustion
    /// surfaces the servo id and the last underlying error.
    pub async fn write_targets(&self, targets: &[(u8, u16)]) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let mut bus = self.bus.lock().await;
        let mut attempt = 0;
        loop {
            let res = if targets.len() == 1 {
                bus.write_position(targets[0].0, targets[0].1)
            } else {
                bus.sync_write_positions(targets)
            };
            match res {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.write_retries {
                        self.note_error(format!("position write failed: {e}"));
                        return Err(ControlError::HardwareWriteFailed {
                            servo_id: targets[0].0,
                            source: e,
                        });
                    }
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    /// Torque-enable every servo. Sequential with a fixed inter-write pause;
    /// a servo that does not answer is logged and skipped.
    pub async fn lock_all(&self) {
        self.set_torque(true).await;
    }

    /// Torque-release every servo so the arm can be moved by hand.
    pub async fn unlock_all(&self) {
        self.set_torque(false).await;
    }

    async fn set_torque(&self, enabled: bool) {
        let mut bus = self.bus.lock().await;
        let count = self.joints.len();
        for (i, joint) in self.joints.iter().enumerate() {
            if let Err(e) = bus.write_torque_enable(joint.servo_id, enabled) {
                warn!(
                    servo_id = joint.servo_id,
                    enabled, "torque write failed: {e}"
                );
            }
            if i + 1 < count {
                tokio::time::sleep(self.config.inter_write_delay()).await;
            }
        }
    }

    fn note_error(&self, message: String) {
        self.status_tx.send_modify(|s| s.error = Some(message));
    }

    // ----- calibration session -----

    /// Begin an interactive calibration: every joint's range resets to its
    /// current position and a sampler task starts widening ranges as the arm
    /// is moved. The servos must be unlocked for hand movement.
    pub async fn start_calibration(self: &Arc<Self>) -> Result<CalibrationHandle> {
        self.unlock_all().await;
        let initial = self.read_all_raw().await?;
        let session = CalibrationSession::begin(&initial, self.config.calibration_range_threshold);
        let progress = session.watch_progress();
        let session = Arc::new(StdMutex::new(session));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let sampler_bus = Arc::clone(self);
        let sampler_session = Arc::clone(&session);
        let poll = self.config.poll_interval();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
                match sampler_bus.read_all_raw().await {
                    Ok(samples) => {
                        let mut session = match sampler_session.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        for (name, raw) in samples {
                            session.record(&name, raw);
                        }
                    }
                    Err(e) => debug!("calibration sample skipped: {e}"),
                }
            }
        });

        Ok(CalibrationHandle {
            bus: Arc::clone(self),
            session,
            progress,
            stop_tx,
            task,
        })
    }
}

/// A running calibration session. Complete it to fold the discovered ranges
/// into the bus's calibration set, or cancel to discard them.
pub struct CalibrationHandle {
    bus: Arc<ArmBus>,
    session: Arc<StdMutex<CalibrationSession>>,
    progress: watch::Receiver<f64>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CalibrationHandle {
    /// Live aggregate progress, 0..=100.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Record one raw sample out-of-band (tests and manual tooling).
    pub fn record(&self, joint: &str, raw: u16) {
        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        session.record(joint, raw);
    }

    async fn stop_sampler(&mut self) {
        let _ = self.stop_tx.send(true);
        let _ = (&mut self.task).await;
    }

    /// Stop sampling and apply the outcome. Joints below the range threshold
    /// are reported in the outcome and remain uncalibrated.
    pub async fn complete(mut self) -> Result<CalibrationOutcome> {
        self.stop_sampler().await;
        let session = Arc::try_unwrap(self.session)
            .map_err(|_| ControlError::NoCalibrationSession)?;
        let session = match session.into_inner() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcome = session.complete();
        self.bus.apply_preset(outcome.calibrations.clone());
        Ok(outcome)
    }

    /// Stop sampling and discard everything the session observed.
    pub async fn cancel(mut self) {
        self.stop_sampler().await;
    }
}
