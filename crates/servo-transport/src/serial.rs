use crate::protocol::{self, regs, StatusPacket};
use crate::{PortInfo, Result, ServoBus, TransportError};
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const REPLY_DEADLINE: Duration = Duration::from_millis(200);

/// STS register protocol over a USB serial adapter.
pub struct SerialBus {
    _port_path: String,
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.port
            .write_all(packet)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    /// Accumulate bytes until one status packet parses or the deadline hits.
    fn recv_status(&mut self) -> Result<StatusPacket> {
        let deadline = Instant::now() + REPLY_DEADLINE;
        let mut acc: Vec<u8> = Vec::with_capacity(64);
        let mut buf = [0u8; 128];
        loop {
            match protocol::parse_status(&acc) {
                Ok((status, used)) => {
                    acc.drain(..used);
                    return Ok(status);
                }
                Err(TransportError::InvalidPacket("checksum mismatch")) => {
                    return Err(TransportError::InvalidPacket("checksum mismatch"));
                }
                Err(_) => {}
            }
            if Instant::now() > deadline {
                return Err(TransportError::Timeout);
            }
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => acc.extend_from_slice(&buf[..n]),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn checked(&mut self, expected_id: u8) -> Result<StatusPacket> {
        let status = self.recv_status()?;
        if status.id != expected_id {
            return Err(TransportError::InvalidPacket("reply from wrong servo"));
        }
        if status.error != 0 {
            return Err(TransportError::ServoFault {
                id: status.id,
                code: status.error,
            });
        }
        Ok(status)
    }

    fn drain_input(&mut self) {
        let _ = self.port.clear(serialport::ClearBuffer::Input);
    }
}

impl ServoBus for SerialBus {
    fn open(port: &str, baud: u32) -> Result<Self> {
        let port_handle = serialport::new(port, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port.to_string()),
                _ => TransportError::Io(e.to_string()),
            })?;
        tracing::debug!(port, baud, "servo bus opened");
        Ok(SerialBus {
            _port_path: port.to_string(),
            port: port_handle,
        })
    }

    fn list() -> Result<Vec<PortInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            match p.port_type {
                SerialPortType::UsbPort(_) => out.push(PortInfo {
                    name: p.port_name,
                    driver: "usb-serial".to_string(),
                }),
                _ => out.push(PortInfo {
                    name: p.port_name,
                    driver: "serial".to_string(),
                }),
            }
        }
        Ok(out)
    }

    fn read_position(&mut self, id: u8) -> Result<u16> {
        self.drain_input();
        let pkt = protocol::read_packet(id, regs::PRESENT_POSITION, 2);
        self.send(&pkt)?;
        let status = self.checked(id)?;
        if status.params.len() < 2 {
            return Err(TransportError::InvalidPacket("short position reply"));
        }
        Ok(protocol::position_from_bytes(status.params[0], status.params[1]))
    }

    fn write_position(&mut self, id: u8, raw: u16) -> Result<()> {
        self.drain_input();
        let pkt = protocol::write_packet(id, regs::GOAL_POSITION, &protocol::position_bytes(raw));
        self.send(&pkt)?;
        // Addressed writes are acknowledged with an empty status packet.
        self.checked(id).map(|_| ())
    }

    fn sync_read_positions(&mut self, ids: &[u8]) -> Result<Vec<(u8, u16)>> {
        self.drain_input();
        let pkt = protocol::sync_read_packet(regs::PRESENT_POSITION, 2, ids);
        self.send(&pkt)?;
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let status = self.recv_status().map_err(|e| match e {
                TransportError::Timeout => TransportError::NoResponse(id),
                other => other,
            })?;
            if status.id != id {
                return Err(TransportError::InvalidPacket("reply out of order"));
            }
            if status.params.len() < 2 {
                return Err(TransportError::InvalidPacket("short position reply"));
            }
            out.push((
                id,
                protocol::position_from_bytes(status.params[0], status.params[1]),
            ));
        }
        Ok(out)
    }

    fn sync_write_positions(&mut self, targets: &[(u8, u16)]) -> Result<()> {
        self.drain_input();
        let rows: Vec<(u8, Vec<u8>)> = targets
            .iter()
            .map(|&(id, raw)| (id, protocol::position_bytes(raw).to_vec()))
            .collect();
        let pkt = protocol::sync_write_packet(regs::GOAL_POSITION, 2, &rows)?;
        // Broadcast packets are not acknowledged.
        self.send(&pkt)
    }

    fn write_torque_enable(&mut self, id: u8, enabled: bool) -> Result<()> {
        self.drain_input();
        let pkt = protocol::write_packet(id, regs::TORQUE_ENABLE, &[u8::from(enabled)]);
        self.send(&pkt)?;
        self.checked(id).map(|_| ())
    }
}
