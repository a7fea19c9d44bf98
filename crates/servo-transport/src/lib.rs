//! servo-transport: serial bus servo transport abstractions
//!
//! This crate provides the wire protocol and transport backends for STS-class
//! serial bus servos (12-bit position registers, up to 253 servos per bus).
//! The default build enables a `mock` backend so that binaries and tests can
//! run on any host without servo hardware attached.

mod types;
pub use types::{PortInfo, RAW_CENTER, RAW_MAX};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::ServoBus;

pub mod protocol;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, MockHandle};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialBus;
