use thiserror::Error;

pub type Result<T, E = RelayError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("room not found: {workspace_id}/{room_id}")]
    RoomNotFound {
        workspace_id: String,
        room_id: String,
    },
    #[error("not connected to a room")]
    NotConnected,
    #[error("relay connection failed: {0}")]
    ConnectionFailed(String),
    #[error("relay channel closed")]
    ChannelClosed,
}
