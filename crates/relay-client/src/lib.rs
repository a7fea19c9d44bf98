//! relay-client: interface to the external relay service
//!
//! The relay brokers named "rooms" through which producers and consumers
//! exchange joint-value messages. This crate defines the client-side traits
//! the control core consumes plus an in-process `memory` backend (default
//! feature) so rooms work on any host and in tests without a relay
//! deployment.

mod types;
pub use types::{JointValue, RelayEvent, RoomInfo};

mod error;
pub use error::{RelayError, Result};

mod traits;
pub use traits::{RelayConsumer, RelayProducer, RoomRegistry};

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryConsumer, MemoryProducer, MemoryRelay};
