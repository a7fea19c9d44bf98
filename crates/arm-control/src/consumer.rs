//! Consumer role: observe the world, emit commands into the Robot.
//!
//! A hardware consumer watches a physical arm being moved by hand; a remote
//! consumer subscribes to a relay room. Either way the Robot sees a stream
//! of normalized [`RobotCommand`]s through its sink.

use crate::bus::ArmBus;
use crate::error::{ControlError, Result};
use crate::joint::{ConnectionStatus, RobotCommand};
use crate::robot::CommandSink;
use async_trait::async_trait;
use relay_client::{RelayConsumer, RelayEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Exactly one Consumer drives a Robot at a time.
#[async_trait]
pub trait Consumer: Send {
    fn name(&self) -> &str;

    /// Begin observing; emitted commands go into `sink`.
    async fn start(&mut self, sink: CommandSink) -> Result<()>;

    /// Stop observing and release any held resources.
    async fn stop(&mut self) -> Result<()>;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

/// Polls a physical arm and emits the joints that moved.
///
/// Servos stay torque-released for the whole session so the arm can be
/// positioned by hand while software reads along.
pub struct HardwareConsumer {
    bus: Arc<ArmBus>,
    status_tx: watch::Sender<ConnectionStatus>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl HardwareConsumer {
    pub fn new(bus: Arc<ArmBus>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            bus,
            status_tx,
            stop_tx: None,
            task: None,
        }
    }
}

#[async_trait]
impl Consumer for HardwareConsumer {
    fn name(&self) -> &str {
        "hardware-consumer"
    }

    async fn start(&mut self, sink: CommandSink) -> Result<()> {
        if self.task.is_some() {
            debug!("hardware consumer already listening");
            return Ok(());
        }
        if self.bus.needs_calibration() {
            let err = ControlError::CalibrationRequired;
            let _ = self.status_tx.send(ConnectionStatus::failed(err.to_string()));
            return Err(err);
        }

        // Manual manipulation stays possible while we listen.
        self.bus.unlock_all().await;
        let mut last = self.bus.read_all_raw().await?;

        let bus = Arc::clone(&self.bus);
        let threshold = self.bus.config().raw_change_threshold;
        let poll = self.bus.config().poll_interval();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
                let samples = match bus.read_all_raw().await {
                    Ok(samples) => samples,
                    Err(e) => {
                        debug!("consumer poll skipped: {e}");
                        continue;
                    }
                };
                let mut changed = Vec::new();
                for (name, raw) in samples {
                    let moved = last
                        .get(&name)
                        .map(|prev| prev.abs_diff(raw) > threshold)
                        .unwrap_or(true);
                    if !moved {
                        continue;
                    }
                    last.insert(name.clone(), raw);
                    match bus.normalize(&name, raw) {
                        Ok(value) => changed.push((name, value)),
                        Err(e) => warn!("cannot normalize sampled joint: {e}"),
                    }
                }
                if !changed.is_empty() {
                    sink.send(RobotCommand::new(changed));
                }
            }
        }));
        self.stop_tx = Some(stop_tx);
        let _ = self.status_tx.send(ConnectionStatus::connected());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        // Release the servos no matter how the session ended.
        self.bus.unlock_all().await;
        let _ = self.status_tx.send(ConnectionStatus::disconnected());
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}

/// Forwards every inbound room message as a command.
pub struct RemoteConsumer {
    relay: Box<dyn RelayConsumer>,
    workspace_id: String,
    room_id: String,
    participant_id: String,
    message_timeout: Duration,
    status_tx: watch::Sender<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl RemoteConsumer {
    pub fn new(
        relay: Box<dyn RelayConsumer>,
        workspace_id: impl Into<String>,
        room_id: impl Into<String>,
        participant_id: impl Into<String>,
        message_timeout: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            relay,
            workspace_id: workspace_id.into(),
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            message_timeout,
            status_tx,
            task: None,
        }
    }
}

#[async_trait]
impl Consumer for RemoteConsumer {
    fn name(&self) -> &str {
        "remote-consumer"
    }

    async fn start(&mut self, sink: CommandSink) -> Result<()> {
        if self.task.is_some() {
            debug!("remote consumer already listening");
            return Ok(());
        }
        self.relay
            .connect(&self.workspace_id, &self.room_id, &self.participant_id)
            .await
            .map_err(|e| {
                let _ = self.status_tx.send(ConnectionStatus::failed(e.to_string()));
                ControlError::from(e)
            })?;
        let mut events = self.relay.events()?;
        let timeout = self.message_timeout;
        let room = self.room_id.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                match tokio::time::timeout(timeout, events.recv()).await {
                    Ok(Some(RelayEvent::JointUpdate(joints))) => {
                        sink.send(RobotCommand::new(
                            joints.into_iter().map(|j| (j.name, j.value)).collect(),
                        ));
                    }
                    Ok(Some(RelayEvent::StateSync(state))) => {
                        sink.send(RobotCommand::new(state.into_iter().collect()));
                    }
                    Ok(None) => {
                        debug!(room = room.as_str(), "relay event stream closed");
                        break;
                    }
                    Err(_) => {
                        // Health check only; commands carry no deadline.
                        warn!(room = room.as_str(), "no relay traffic within timeout");
                    }
                }
            }
        }));
        let _ = self.status_tx.send(ConnectionStatus::connected());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.relay.disconnect().await?;
        let _ = self.status_tx.send(ConnectionStatus::disconnected());
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}
