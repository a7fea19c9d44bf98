use relay_client::RelayError;
use servo_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = ControlError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to open connection: {0}")]
    ConnectionFailed(String),
    #[error("write to servo {servo_id} failed after retries: {source}")]
    HardwareWriteFailed {
        servo_id: u8,
        #[source]
        source: TransportError,
    },
    #[error("read from servo {servo_id} failed after retries: {source}")]
    HardwareReadFailed {
        servo_id: u8,
        #[source]
        source: TransportError,
    },
    #[error("calibration required before this driver can start")]
    CalibrationRequired,
    #[error("unknown joint: {0}")]
    UnknownJoint(String),
    #[error("a consumer is attached; manual joint control is disabled")]
    ConsumerAttached,
    #[error("no calibration session is running")]
    NoCalibrationSession,
    #[error("robot already registered: {0}")]
    DuplicateRobot(String),
    #[error("robot not found: {0}")]
    RobotNotFound(String),
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),
    #[error("bad calibration preset: {0}")]
    BadPreset(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}
