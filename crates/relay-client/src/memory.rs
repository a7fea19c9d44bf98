use crate::{
    JointValue, RelayConsumer, RelayError, RelayEvent, RelayProducer, Result, RoomInfo,
    RoomRegistry,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

const ROOM_BUFFER: usize = 64;

type RoomKey = (String, String);
type RoomTable = HashMap<RoomKey, broadcast::Sender<RelayEvent>>;

/// An in-process relay. Each room is a broadcast channel; producers publish
/// into it and every connected consumer gets a copy.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    rooms: Arc<Mutex<RoomTable>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            relay: self.clone(),
            events: None,
            forwarder: None,
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            relay: self.clone(),
            tx: Mutex::new(None),
        }
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, RoomTable> {
        match self.rooms.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn sender_for(&self, workspace_id: &str, room_id: &str) -> Result<broadcast::Sender<RelayEvent>> {
        self.rooms()
            .get(&(workspace_id.to_string(), room_id.to_string()))
            .cloned()
            .ok_or_else(|| RelayError::RoomNotFound {
                workspace_id: workspace_id.to_string(),
                room_id: room_id.to_string(),
            })
    }
}

#[async_trait]
impl RoomRegistry for MemoryRelay {
    async fn create_room(&self, workspace_id: &str, room_id: Option<String>) -> Result<RoomInfo> {
        let room_id = room_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = (workspace_id.to_string(), room_id.clone());
        let mut rooms = self.rooms();
        rooms
            .entry(key)
            .or_insert_with(|| broadcast::channel(ROOM_BUFFER).0);
        Ok(RoomInfo {
            workspace_id: workspace_id.to_string(),
            room_id,
        })
    }

    async fn list_rooms(&self, workspace_id: &str) -> Result<Vec<RoomInfo>> {
        Ok(self
            .rooms()
            .keys()
            .filter(|(ws, _)| ws == workspace_id)
            .map(|(ws, room)| RoomInfo {
                workspace_id: ws.clone(),
                room_id: room.clone(),
            })
            .collect())
    }
}

pub struct MemoryConsumer {
    relay: MemoryRelay,
    events: Option<mpsc::Receiver<RelayEvent>>,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait]
impl RelayConsumer for MemoryConsumer {
    async fn connect(
        &mut self,
        workspace_id: &str,
        room_id: &str,
        participant_id: &str,
    ) -> Result<()> {
        let mut rx = self.relay.sender_for(workspace_id, room_id)?.subscribe();
        let (tx, events) = mpsc::channel(ROOM_BUFFER);
        let participant = participant_id.to_string();
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            participant = participant.as_str(),
                            missed, "relay consumer lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        self.events = Some(events);
        Ok(())
    }

    fn events(&mut self) -> Result<mpsc::Receiver<RelayEvent>> {
        self.events.take().ok_or(RelayError::NotConnected)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.events = None;
        Ok(())
    }
}

pub struct MemoryProducer {
    relay: MemoryRelay,
    tx: Mutex<Option<broadcast::Sender<RelayEvent>>>,
}

impl MemoryProducer {
    fn publish(&self, event: RelayEvent) -> Result<()> {
        let sender = {
            let guard = match self.tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone().ok_or(RelayError::NotConnected)?
        };
        // A room with no listeners is fine; the message just evaporates.
        let _ = sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl RelayProducer for MemoryProducer {
    async fn connect(
        &mut self,
        workspace_id: &str,
        room_id: &str,
        _participant_id: &str,
    ) -> Result<()> {
        let sender = self.relay.sender_for(workspace_id, room_id)?;
        match self.tx.lock() {
            Ok(mut guard) => *guard = Some(sender),
            Err(poisoned) => *poisoned.into_inner() = Some(sender),
        }
        Ok(())
    }

    async fn send_joint_update(&self, joints: &[JointValue]) -> Result<()> {
        self.publish(RelayEvent::JointUpdate(joints.to_vec()))
    }

    async fn send_state_sync(&self, state: &HashMap<String, f64>) -> Result<()> {
        self.publish(RelayEvent::StateSync(state.clone()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.tx.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        Ok(())
    }
}
