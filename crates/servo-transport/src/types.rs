/// Highest raw position a 12-bit servo register can hold.
pub const RAW_MAX: u16 = 4095;

/// Mechanical midpoint of the raw range.
pub const RAW_CENTER: u16 = 2048;

/// A serial port that may have a servo bus behind it.
#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
}
