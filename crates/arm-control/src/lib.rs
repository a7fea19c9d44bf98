//! arm-control: hardware abstraction and calibration for servo-driven arms
//!
//! This crate owns the control core for a multi-joint servo arm:
//! - normalized joint values (bipolar `[-100, 100]`, jaw `[0, 100]`)
//!   regardless of the raw servo range behind them
//! - per-connection calibration: discovered raw ranges, presets, skip
//! - the shared bus handle that serializes all wire traffic and retries
//!   transient failures
//! - Consumer/Producer driver roles over hardware or a relay room
//! - the Robot aggregate with its deduplicated, serialized command pipeline
//!
//! Transports live in `servo-transport`; relay plumbing in `relay-client`.

mod config;
pub use config::ControlConfig;

mod error;
pub use error::{ControlError, Result};

mod joint;
pub use joint::{ConnectionStatus, JointKind, JointState, RobotCommand};

mod descriptor;
pub use descriptor::{ArmDescriptor, JointSpec};

pub mod codec;

mod calibration;
pub use calibration::{CalibrationOutcome, CalibrationSession, CalibrationSet, JointCalibration};

mod bus;
pub use bus::{ArmBus, CalibrationHandle};

mod events;
pub use events::{JointChange, JointObservers, Subscription};

mod consumer;
pub use consumer::{Consumer, HardwareConsumer, RemoteConsumer};

mod producer;
pub use producer::{HardwareProducer, Producer, RemoteProducer};

mod robot;
pub use robot::{CommandSink, Robot};

mod manager;
pub use manager::RobotManager;
