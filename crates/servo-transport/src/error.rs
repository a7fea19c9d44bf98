use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("port not found: {0}")]
    PortNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("no response from servo {0}")]
    NoResponse(u8),
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("servo {id} reported status error 0x{code:02X}")]
    ServoFault { id: u8, code: u8 },
}
