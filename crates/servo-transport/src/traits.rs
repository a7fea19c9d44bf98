use crate::{PortInfo, Result};

/// A minimal blocking interface to a bus of position servos.
///
/// Implementations address servos by their bus id (1..=253). All position
/// values are raw register units in `0..=4095`. Callers that need to touch
/// more than one servo in a cycle should prefer the `sync_*` batch forms,
/// which put a single packet on the wire.
pub trait ServoBus: Send {
    /// Open a bus on the named port at the given baud rate.
    fn open(port: &str, baud: u32) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list candidate ports for this backend.
    fn list() -> Result<Vec<PortInfo>>
    where
        Self: Sized;

    /// Read the present position register of one servo.
    fn read_position(&mut self, id: u8) -> Result<u16>;

    /// Write the goal position register of one servo.
    fn write_position(&mut self, id: u8, raw: u16) -> Result<()>;

    /// Read present positions of several servos with one bus transaction.
    ///
    /// Returns `(id, raw)` pairs in the order the ids were given.
    fn sync_read_positions(&mut self, ids: &[u8]) -> Result<Vec<(u8, u16)>>;

    /// Write goal positions of several servos with one bus transaction.
    fn sync_write_positions(&mut self, targets: &[(u8, u16)]) -> Result<()>;

    /// Enable or disable torque on one servo.
    fn write_torque_enable(&mut self, id: u8, enabled: bool) -> Result<()>;
}
