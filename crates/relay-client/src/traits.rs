use crate::{JointValue, RelayEvent, Result, RoomInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Room bookkeeping on the relay service.
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    /// Create a room, generating an id when none is given.
    async fn create_room(&self, workspace_id: &str, room_id: Option<String>) -> Result<RoomInfo>;

    async fn list_rooms(&self, workspace_id: &str) -> Result<Vec<RoomInfo>>;
}

/// Inbound side of a room: receives what other participants publish.
#[async_trait]
pub trait RelayConsumer: Send {
    async fn connect(
        &mut self,
        workspace_id: &str,
        room_id: &str,
        participant_id: &str,
    ) -> Result<()>;

    /// Take the event stream. Yields every inbound message for the room;
    /// can be taken once per connection.
    fn events(&mut self) -> Result<mpsc::Receiver<RelayEvent>>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Outbound side of a room: publishes this participant's joint state.
#[async_trait]
pub trait RelayProducer: Send + Sync {
    async fn connect(
        &mut self,
        workspace_id: &str,
        room_id: &str,
        participant_id: &str,
    ) -> Result<()>;

    async fn send_joint_update(&self, joints: &[JointValue]) -> Result<()>;

    async fn send_state_sync(&self, state: &HashMap<String, f64>) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}
