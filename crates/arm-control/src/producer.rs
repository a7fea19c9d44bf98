//! Producer role: accept commands from the Robot and actuate.
//!
//! A hardware producer drives physical servos; a remote producer forwards
//! into a relay room. Producers own their delivery order: each keeps an
//! internal queue drained strictly in arrival order so a slow write never
//! reorders later commands.

use crate::bus::ArmBus;
use crate::error::{ControlError, Result};
use crate::joint::{ConnectionStatus, RobotCommand};
use async_trait::async_trait;
use relay_client::{JointValue, RelayProducer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Any number of Producers can hang off one Robot.
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    /// Take control of the output side (locks hardware, joins a room).
    async fn connect(&mut self) -> Result<()>;

    /// Queue one command for delivery.
    async fn send(&self, command: &RobotCommand) -> Result<()>;

    /// Release everything, even when a prior operation failed.
    async fn disconnect(&mut self) -> Result<()>;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

/// Writes commands to physical servos through a shared [`ArmBus`].
///
/// Connecting asserts torque on every servo: the arm is under software
/// control for the lifetime of the producer. Disconnecting always releases
/// torque, including on error paths.
pub struct HardwareProducer {
    bus: Arc<ArmBus>,
    tx: StdMutex<Option<mpsc::Sender<RobotCommand>>>,
    worker: Option<JoinHandle<()>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl HardwareProducer {
    pub fn new(bus: Arc<ArmBus>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            bus,
            tx: StdMutex::new(None),
            worker: None,
            status_tx,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<RobotCommand>> {
        match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_sender(&self, sender: Option<mpsc::Sender<RobotCommand>>) {
        match self.tx.lock() {
            Ok(mut guard) => *guard = sender,
            Err(poisoned) => *poisoned.into_inner() = sender,
        }
    }
}

#[async_trait]
impl Producer for HardwareProducer {
    fn name(&self) -> &str {
        "hardware-producer"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.worker.is_some() {
            debug!("hardware producer already connected");
            return Ok(());
        }
        if self.bus.needs_calibration() {
            let err = ControlError::CalibrationRequired;
            let _ = self.status_tx.send(ConnectionStatus::failed(err.to_string()));
            return Err(err);
        }

        // Software-exclusive control for the duration of the connection.
        self.bus.lock_all().await;

        let (tx, mut rx) = mpsc::channel::<RobotCommand>(self.bus.config().command_queue_capacity);
        let bus = Arc::clone(&self.bus);
        let status_tx = self.status_tx.clone();
        self.worker = Some(tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let mut targets = Vec::with_capacity(command.joints.len());
                for (name, value) in &command.joints {
                    match bus.denormalize(name, *value) {
                        Ok(target) => targets.push(target),
                        Err(e) => warn!("skipping joint in command: {e}"),
                    }
                }
                if let Err(e) = bus.write_targets(&targets).await {
                    warn!("hardware producer write failed: {e}");
                    status_tx.send_modify(|s| s.error = Some(e.to_string()));
                }
            }
        }));
        self.set_sender(Some(tx));
        let _ = self.status_tx.send(ConnectionStatus::connected());
        Ok(())
    }

    async fn send(&self, command: &RobotCommand) -> Result<()> {
        let Some(tx) = self.sender() else {
            return Err(ControlError::ConnectionFailed(
                "hardware producer not connected".into(),
            ));
        };
        tx.send(command.clone())
            .await
            .map_err(|_| ControlError::ConnectionFailed("hardware producer stopped".into()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Dropping the sender lets the worker drain what is already queued.
        self.set_sender(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        // Unlock unconditionally, whatever happened above.
        self.bus.unlock_all().await;
        let _ = self.status_tx.send(ConnectionStatus::disconnected());
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}

/// Forwards commands into a relay room, with a periodic full-state sync so
/// late joiners converge.
pub struct RemoteProducer {
    relay: Arc<Mutex<Box<dyn RelayProducer>>>,
    workspace_id: String,
    room_id: String,
    participant_id: String,
    sync_interval: Duration,
    state: Arc<StdMutex<HashMap<String, f64>>>,
    keepalive: Option<JoinHandle<()>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl RemoteProducer {
    pub fn new(
        relay: Box<dyn RelayProducer>,
        workspace_id: impl Into<String>,
        room_id: impl Into<String>,
        participant_id: impl Into<String>,
        sync_interval: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            relay: Arc::new(Mutex::new(relay)),
            workspace_id: workspace_id.into(),
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            sync_interval,
            state: Arc::new(StdMutex::new(HashMap::new())),
            keepalive: None,
            status_tx,
        }
    }

    fn snapshot(&self) -> HashMap<String, f64> {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Producer for RemoteProducer {
    fn name(&self) -> &str {
        "remote-producer"
    }

    async fn connect(&mut self) -> Result<()> {
        self.relay
            .lock()
            .await
            .connect(&self.workspace_id, &self.room_id, &self.participant_id)
            .await
            .map_err(|e| {
                let _ = self.status_tx.send(ConnectionStatus::failed(e.to_string()));
                ControlError::from(e)
            })?;

        let relay = Arc::clone(&self.relay);
        let state = Arc::clone(&self.state);
        let interval = self.sync_interval;
        self.keepalive = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let snapshot = match state.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                if snapshot.is_empty() {
                    continue;
                }
                if let Err(e) = relay.lock().await.send_state_sync(&snapshot).await {
                    warn!("state sync failed: {e}");
                }
            }
        }));
        let _ = self.status_tx.send(ConnectionStatus::connected());
        Ok(())
    }

    async fn send(&self, command: &RobotCommand) -> Result<()> {
        {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (name, value) in &command.joints {
                state.insert(name.clone(), *value);
            }
        }
        let joints: Vec<JointValue> = command
            .joints
            .iter()
            .map(|(name, value)| JointValue::new(name.clone(), *value))
            .collect();
        self.relay
            .lock()
            .await
            .send_joint_update(&joints)
            .await
            .map_err(ControlError::from)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        self.relay.lock().await.disconnect().await?;
        let _ = self.status_tx.send(ConnectionStatus::disconnected());
        Ok(())
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use crate::descriptor::ArmDescriptor;
    use relay_client::{MemoryRelay, RelayConsumer, RelayEvent, RoomRegistry};
    use servo_transport::{MockBus, MockHandle, ServoBus};

    fn test_config() -> ControlConfig {
        ControlConfig {
            poll_interval_ms: 5,
            retry_delay_ms: 1,
            inter_write_delay_ms: 0,
            ..ControlConfig::default()
        }
    }

    fn mock_arm() -> (Arc<ArmBus>, MockHandle) {
        let bus = MockBus::open("mock0", 1_000_000).unwrap();
        let handle = bus.handle();
        (
            ArmBus::new(Box::new(bus), &ArmDescriptor::six_dof(), test_config()),
            handle,
        )
    }

    #[tokio::test]
    async fn connect_locks_every_servo() {
        let (bus, handle) = mock_arm();
        bus.skip_calibration();
        let mut producer = HardwareProducer::new(Arc::clone(&bus));
        producer.connect().await.unwrap();
        for id in 1..=6 {
            assert!(handle.torque_enabled(id));
        }
        producer.disconnect().await.unwrap();
        for id in 1..=6 {
            assert!(!handle.torque_enabled(id));
        }
    }

    #[tokio::test]
    async fn disconnect_unlocks_even_after_write_errors() {
        let (bus, handle) = mock_arm();
        bus.skip_calibration();
        let mut producer = HardwareProducer::new(Arc::clone(&bus));
        producer.connect().await.unwrap();

        // Exhaust retries so the worker hits its error path.
        handle.fail_next_writes(10);
        producer
            .send(&RobotCommand::single("Rotation", 10.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(producer.status().borrow().error.is_some());

        producer.disconnect().await.unwrap();
        for id in 1..=6 {
            assert!(!handle.torque_enabled(id));
        }
    }

    #[tokio::test]
    async fn uncalibrated_producer_refuses_commands() {
        let (bus, _handle) = mock_arm();
        let mut producer = HardwareProducer::new(bus);
        assert!(matches!(
            producer.connect().await.unwrap_err(),
            ControlError::CalibrationRequired
        ));
    }

    #[tokio::test]
    async fn commands_drain_in_arrival_order() {
        let (bus, handle) = mock_arm();
        bus.skip_calibration();
        let mut producer = HardwareProducer::new(Arc::clone(&bus));
        producer.connect().await.unwrap();

        for value in [-100.0, 0.0, 100.0] {
            producer
                .send(&RobotCommand::single("Rotation", value))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let writes: Vec<u16> = handle
            .goal_writes()
            .iter()
            .filter(|(id, _)| *id == 1)
            .map(|&(_, raw)| raw)
            .collect();
        assert_eq!(writes, vec![0, 2048, 4095]);
        producer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn multi_joint_commands_use_one_batched_write() {
        let (bus, handle) = mock_arm();
        bus.skip_calibration();
        let mut producer = HardwareProducer::new(Arc::clone(&bus));
        producer.connect().await.unwrap();
        producer
            .send(&RobotCommand::new(vec![
                ("Rotation".into(), 0.0),
                ("Jaw".into(), 100.0),
            ]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.position(1), 2048);
        assert_eq!(handle.position(6), 4095);
        producer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn remote_producer_forwards_and_syncs() {
        let relay = MemoryRelay::new();
        relay.create_room("ws", Some("arm".into())).await.unwrap();

        let mut viewer = relay.consumer();
        viewer.connect("ws", "arm", "viewer").await.unwrap();
        let mut events = viewer.events().unwrap();

        let mut producer = RemoteProducer::new(
            Box::new(relay.producer()),
            "ws",
            "arm",
            "robot-1",
            Duration::from_millis(20),
        );
        producer.connect().await.unwrap();
        producer
            .send(&RobotCommand::single("Rotation", 25.0))
            .await
            .unwrap();

        let mut saw_update = false;
        let mut saw_sync = false;
        for _ in 0..4 {
            match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                Ok(Some(RelayEvent::JointUpdate(joints))) => {
                    assert_eq!(joints[0].name, "Rotation");
                    saw_update = true;
                }
                Ok(Some(RelayEvent::StateSync(state))) => {
                    assert_eq!(state.get("Rotation"), Some(&25.0));
                    saw_sync = true;
                }
                _ => break,
            }
            if saw_update && saw_sync {
                break;
            }
        }
        assert!(saw_update && saw_sync);
        producer.disconnect().await.unwrap();
    }
}
