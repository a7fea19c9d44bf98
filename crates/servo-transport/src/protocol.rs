//! Packet building and parsing for the STS register protocol.
//!
//! Every instruction packet is `FF FF id len inst params... chk` where `len`
//! counts everything after itself (instruction + params + checksum) and the
//! checksum is the inverted byte sum of `id..params`. Status replies use the
//! same frame with an error byte in place of the instruction.

use crate::{Result, TransportError};

pub const HEADER: [u8; 2] = [0xFF, 0xFF];
pub const BROADCAST_ID: u8 = 0xFE;

pub const INST_READ: u8 = 0x02;
pub const INST_WRITE: u8 = 0x03;
pub const INST_SYNC_READ: u8 = 0x82;
pub const INST_SYNC_WRITE: u8 = 0x83;

/// Register addresses for STS3215-compatible servos.
pub mod regs {
    pub const TORQUE_ENABLE: u8 = 40;
    pub const GOAL_POSITION: u8 = 42;
    pub const PRESENT_POSITION: u8 = 56;
}

/// Inverted byte sum, computed over `id..` (header excluded).
pub fn checksum(body: &[u8]) -> u8 {
    let sum: u16 = body.iter().map(|&b| b as u16).sum();
    !(sum as u8)
}

/// `WRITE` instruction: store `data` at `addr` on servo `id`.
pub fn write_packet(id: u8, addr: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + data.len());
    out.extend_from_slice(&HEADER);
    out.push(id);
    out.push((data.len() + 3) as u8);
    out.push(INST_WRITE);
    out.push(addr);
    out.extend_from_slice(data);
    out.push(checksum(&out[2..]));
    out
}

/// `READ` instruction: request `count` bytes starting at `addr` from servo `id`.
pub fn read_packet(id: u8, addr: u8, count: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&HEADER);
    out.push(id);
    out.push(4);
    out.push(INST_READ);
    out.push(addr);
    out.push(count);
    out.push(checksum(&out[2..]));
    out
}

/// `SYNC WRITE`: one broadcast packet carrying a register row per servo.
///
/// Every row must be `width` bytes long; rows that are not are a caller bug
/// and rejected as an invalid packet.
pub fn sync_write_packet(addr: u8, width: u8, rows: &[(u8, Vec<u8>)]) -> Result<Vec<u8>> {
    let param_len = rows.len() * (1 + width as usize);
    let mut out = Vec::with_capacity(8 + param_len);
    out.extend_from_slice(&HEADER);
    out.push(BROADCAST_ID);
    out.push((param_len + 4) as u8);
    out.push(INST_SYNC_WRITE);
    out.push(addr);
    out.push(width);
    for (id, data) in rows {
        if data.len() != width as usize {
            return Err(TransportError::InvalidPacket("sync write row width"));
        }
        out.push(*id);
        out.extend_from_slice(data);
    }
    out.push(checksum(&out[2..]));
    Ok(out)
}

/// `SYNC READ`: one broadcast packet requesting `count` bytes at `addr` from
/// each listed servo. Servos answer with individual status packets in id
/// order.
pub fn sync_read_packet(addr: u8, count: u8, ids: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ids.len());
    out.extend_from_slice(&HEADER);
    out.push(BROADCAST_ID);
    out.push((ids.len() + 4) as u8);
    out.push(INST_SYNC_READ);
    out.push(addr);
    out.push(count);
    out.extend_from_slice(ids);
    out.push(checksum(&out[2..]));
    out
}

/// A parsed status reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: u8,
    pub params: Vec<u8>,
}

/// Parse one status packet from the front of `buf`.
///
/// Returns the packet and the number of bytes consumed. Leading noise before
/// the header is skipped (half-duplex adapters echo the instruction bytes
/// back on some cabling).
pub fn parse_status(buf: &[u8]) -> Result<(StatusPacket, usize)> {
    let start = buf
        .windows(2)
        .position(|w| w == HEADER)
        .ok_or(TransportError::InvalidPacket("no header"))?;
    let frame = &buf[start..];
    if frame.len() < 6 {
        return Err(TransportError::InvalidPacket("short frame"));
    }
    let id = frame[2];
    let len = frame[3] as usize;
    if len < 2 {
        return Err(TransportError::InvalidPacket("bad length"));
    }
    let total = 4 + len;
    if frame.len() < total {
        return Err(TransportError::InvalidPacket("short frame"));
    }
    let expected = checksum(&frame[2..total - 1]);
    if frame[total - 1] != expected {
        return Err(TransportError::InvalidPacket("checksum mismatch"));
    }
    let error = frame[4];
    let params = frame[5..total - 1].to_vec();
    Ok((StatusPacket { id, error, params }, start + total))
}

/// Little-endian position helpers; raw values are 12-bit.
pub fn position_bytes(raw: u16) -> [u8; 2] {
    raw.min(crate::RAW_MAX).to_le_bytes()
}

pub fn position_from_bytes(lo: u8, hi: u8) -> u16 {
    u16::from_le_bytes([lo, hi])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_inverted_sum() {
        // id=1, len=4, READ, addr=56, count=2 -> sum=65 -> !65 = 0xBE
        assert_eq!(checksum(&[1, 4, INST_READ, 56, 2]), 0xBE);
    }

    #[test]
    fn read_packet_bytes() {
        let pkt = read_packet(1, regs::PRESENT_POSITION, 2);
        assert_eq!(pkt, vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x38, 0x02, 0xBE]);
    }

    #[test]
    fn write_packet_bytes() {
        let pkt = write_packet(2, regs::TORQUE_ENABLE, &[1]);
        // body: 02 04 03 28 01 -> sum=0x32 -> chk=0xCD
        assert_eq!(pkt, vec![0xFF, 0xFF, 0x02, 0x04, 0x03, 0x28, 0x01, 0xCD]);
    }

    #[test]
    fn sync_write_layout() {
        let rows = vec![(1u8, vec![0x00, 0x08]), (2u8, vec![0xFF, 0x0F])];
        let pkt = sync_write_packet(regs::GOAL_POSITION, 2, &rows).unwrap();
        assert_eq!(&pkt[..2], &HEADER);
        assert_eq!(pkt[2], BROADCAST_ID);
        assert_eq!(pkt[3], 2 * 3 + 4);
        assert_eq!(pkt[4], INST_SYNC_WRITE);
        assert_eq!(pkt[5], regs::GOAL_POSITION);
        assert_eq!(pkt[6], 2);
        assert_eq!(&pkt[7..10], &[0x01, 0x00, 0x08]);
        assert_eq!(&pkt[10..13], &[0x02, 0xFF, 0x0F]);
        assert_eq!(pkt[13], checksum(&pkt[2..13]));
    }

    #[test]
    fn sync_write_rejects_bad_row() {
        let rows = vec![(1u8, vec![0x00])];
        assert!(sync_write_packet(regs::GOAL_POSITION, 2, &rows).is_err());
    }

    #[test]
    fn sync_read_layout() {
        let pkt = sync_read_packet(regs::PRESENT_POSITION, 2, &[1, 2, 3]);
        assert_eq!(pkt[2], BROADCAST_ID);
        assert_eq!(pkt[3], 3 + 4);
        assert_eq!(pkt[4], INST_SYNC_READ);
        assert_eq!(&pkt[7..10], &[1, 2, 3]);
        assert_eq!(pkt[10], checksum(&pkt[2..10]));
    }

    #[test]
    fn status_round_trip() {
        // Reply from servo 1: error 0, position 2048.
        let mut frame = vec![0xFF, 0xFF, 0x01, 0x04, 0x00, 0x00, 0x08];
        frame.push(checksum(&frame[2..]));
        let (status, used) = parse_status(&frame).unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(status.id, 1);
        assert_eq!(status.error, 0);
        assert_eq!(position_from_bytes(status.params[0], status.params[1]), 2048);
    }

    #[test]
    fn status_skips_leading_noise() {
        let mut frame = vec![0x00, 0x5A, 0xFF, 0xFF, 0x03, 0x02, 0x00];
        frame.push(checksum(&frame[4..]));
        let (status, used) = parse_status(&frame).unwrap();
        assert_eq!(status.id, 3);
        assert!(status.params.is_empty());
        assert_eq!(used, frame.len());
    }

    #[test]
    fn status_rejects_corrupt_checksum() {
        let frame = vec![0xFF, 0xFF, 0x01, 0x02, 0x00, 0x00];
        assert!(matches!(
            parse_status(&frame),
            Err(TransportError::InvalidPacket("checksum mismatch"))
        ));
    }

    #[test]
    fn position_bytes_clamp_to_register_width() {
        assert_eq!(position_bytes(9000), 4095u16.to_le_bytes());
        assert_eq!(position_bytes(2048), [0x00, 0x08]);
    }
}
