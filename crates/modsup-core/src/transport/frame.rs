//! Modbus PDU construction and parsing, plus the two outer framings.
//!
//! ```text
//! TCP/UDP (MBAP):                      RTU:
//! ┌──────────────────────────┐         ┌──────────────────────────┐
//! │ transaction id: u16 BE   │         │ unit id: u8              │
//! │ protocol id:    u16 = 0  │         │ PDU (function + data)    │
//! │ length:         u16 BE   │         │ crc: u16 LE (poly A001)  │
//! │ unit id:        u8       │         └──────────────────────────┘
//! │ PDU (function + data)    │
//! └──────────────────────────┘
//! ```
//!
//! `length` counts the unit id plus the PDU. Register values inside a PDU
//! are big-endian. Coil payloads pack eight bits per byte, least
//! significant bit first. An exception response echoes the function code
//! with the high bit set, followed by a one-byte exception code.

use super::TransportError;
use crate::model::Channel;

pub const FC_READ_COILS: u8 = 1;
pub const FC_READ_DISCRETE_INPUTS: u8 = 2;
pub const FC_READ_HOLDING_REGISTERS: u8 = 3;
pub const FC_READ_INPUT_REGISTERS: u8 = 4;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 15;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 16;

/// MBAP header length (transaction + protocol + length + unit).
pub const MBAP_HEADER_LEN: usize = 7;

/// Largest frame either side may send (MBAP header + 253-byte PDU).
pub const MAX_FRAME_LEN: usize = 260;

/// What came back from a read: registers for the word channels, bits for
/// the coil channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Registers(Vec<u16>),
    Bits(Vec<bool>),
}

pub fn read_function_code(channel: Channel) -> u8 {
    match channel {
        Channel::Coil => FC_READ_COILS,
        Channel::DiscreteInput => FC_READ_DISCRETE_INPUTS,
        Channel::HoldingRegister => FC_READ_HOLDING_REGISTERS,
        Channel::InputRegister => FC_READ_INPUT_REGISTERS,
    }
}

// ============================================================
// PDU construction
// ============================================================

pub fn read_request(channel: Channel, address: u16, count: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(read_function_code(channel));
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    pdu
}

pub fn write_coils_request(address: u16, bits: &[bool]) -> Vec<u8> {
    let byte_count = bits.len().div_ceil(8);
    let mut pdu = Vec::with_capacity(6 + byte_count);
    pdu.push(FC_WRITE_MULTIPLE_COILS);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&(bits.len() as u16).to_be_bytes());
    pdu.push(byte_count as u8);
    let mut packed = vec![0u8; byte_count];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    pdu.extend_from_slice(&packed);
    pdu
}

pub fn write_registers_request(address: u16, regs: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(6 + regs.len() * 2);
    pdu.push(FC_WRITE_MULTIPLE_REGISTERS);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&(regs.len() as u16).to_be_bytes());
    pdu.push((regs.len() * 2) as u8);
    for reg in regs {
        pdu.extend_from_slice(&reg.to_be_bytes());
    }
    pdu
}

// ============================================================
// PDU parsing
// ============================================================

/// Checks for an exception response and the expected function code.
/// Returns the PDU body (everything after the function code).
fn expect_function<'a>(pdu: &'a [u8], function: u8) -> Result<&'a [u8], TransportError> {
    let (first, rest) = pdu
        .split_first()
        .ok_or_else(|| TransportError::Protocol("empty response PDU".into()))?;

    if *first == function | 0x80 {
        let code = rest.first().copied().unwrap_or(0);
        return Err(TransportError::Exception(code));
    }
    if *first != function {
        return Err(TransportError::Protocol(format!(
            "unexpected function code {} (expected {})",
            first, function
        )));
    }
    Ok(rest)
}

/// Parses a read response into registers or bits. Bit payloads are
/// truncated to `count` (the trailing pad bits of the last byte).
pub fn parse_read_response(
    pdu: &[u8],
    channel: Channel,
    count: u16,
) -> Result<Payload, TransportError> {
    let body = expect_function(pdu, read_function_code(channel))?;

    let (byte_count, data) = body
        .split_first()
        .ok_or_else(|| TransportError::Protocol("read response missing byte count".into()))?;
    if data.len() != *byte_count as usize {
        return Err(TransportError::Protocol(format!(
            "read response byte count {} but {} data bytes",
            byte_count,
            data.len()
        )));
    }

    if channel.is_bit() {
        if data.len() < (count as usize).div_ceil(8) {
            return Err(TransportError::Protocol("short bit payload".into()));
        }
        let bits = (0..count as usize)
            .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
            .collect();
        Ok(Payload::Bits(bits))
    } else {
        if data.len() != count as usize * 2 {
            return Err(TransportError::Protocol(format!(
                "expected {} registers, got {} bytes",
                count,
                data.len()
            )));
        }
        let regs = data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Payload::Registers(regs))
    }
}

/// Parses a write response, verifying the echoed address and quantity.
pub fn parse_write_response(
    pdu: &[u8],
    function: u8,
    address: u16,
    quantity: u16,
) -> Result<(), TransportError> {
    let body = expect_function(pdu, function)?;
    if body.len() != 4 {
        return Err(TransportError::Protocol("short write response".into()));
    }
    let echo_addr = u16::from_be_bytes([body[0], body[1]]);
    let echo_qty = u16::from_be_bytes([body[2], body[3]]);
    if echo_addr != address || echo_qty != quantity {
        return Err(TransportError::Protocol(format!(
            "write echo mismatch: {}+{} (sent {}+{})",
            echo_addr, echo_qty, address, quantity
        )));
    }
    Ok(())
}

// ============================================================
// MBAP framing (TCP and UDP)
// ============================================================

pub fn mbap_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Parses an MBAP header; returns `(transaction_id, unit_id, pdu_len)`.
pub fn parse_mbap_header(header: &[u8; MBAP_HEADER_LEN]) -> Result<(u16, u8, usize), TransportError> {
    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let unit_id = header[6];

    if protocol_id != 0 {
        return Err(TransportError::Protocol(format!(
            "bad MBAP protocol id {}",
            protocol_id
        )));
    }
    if length < 2 || length > MAX_FRAME_LEN - MBAP_HEADER_LEN + 1 {
        return Err(TransportError::Protocol(format!("bad MBAP length {}", length)));
    }
    Ok((transaction_id, unit_id, length - 1))
}

// ============================================================
// RTU framing
// ============================================================

pub fn rtu_frame(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3 + pdu.len());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Validates the CRC and unit id of a complete RTU frame; returns the PDU.
pub fn parse_rtu_frame(frame: &[u8], unit_id: u8) -> Result<&[u8], TransportError> {
    if frame.len() < 4 {
        return Err(TransportError::Protocol("RTU frame too short".into()));
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let wire_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16(body) != wire_crc {
        return Err(TransportError::Protocol("RTU CRC mismatch".into()));
    }
    if body[0] != unit_id {
        return Err(TransportError::Protocol(format!(
            "RTU unit id {} (expected {})",
            body[0], unit_id
        )));
    }
    Ok(&body[1..])
}

/// Modbus RTU CRC-16 (reflected 0xA001, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let pdu = read_request(Channel::HoldingRegister, 0x0010, 2);
        assert_eq!(pdu, vec![3, 0x00, 0x10, 0x00, 0x02]);
    }

    #[test]
    fn mbap_roundtrip() {
        let pdu = read_request(Channel::Coil, 5, 8);
        let frame = mbap_frame(0x1234, 9, &pdu);
        assert_eq!(frame.len(), MBAP_HEADER_LEN + pdu.len());

        let header: [u8; MBAP_HEADER_LEN] = frame[..MBAP_HEADER_LEN].try_into().unwrap();
        let (txn, unit, pdu_len) = parse_mbap_header(&header).unwrap();
        assert_eq!(txn, 0x1234);
        assert_eq!(unit, 9);
        assert_eq!(pdu_len, pdu.len());
        assert_eq!(&frame[MBAP_HEADER_LEN..], &pdu[..]);
    }

    #[test]
    fn register_response_parses() {
        // fc 3, 2 bytes, one register 0x002A
        let payload = parse_read_response(&[3, 2, 0x00, 0x2A], Channel::HoldingRegister, 1).unwrap();
        assert_eq!(payload, Payload::Registers(vec![42]));
    }

    #[test]
    fn bit_response_unpacks_lsb_first() {
        // fc 1, 1 byte, bits 0b0000_0101 → [true, false, true]
        let payload = parse_read_response(&[1, 1, 0b0000_0101], Channel::Coil, 3).unwrap();
        assert_eq!(payload, Payload::Bits(vec![true, false, true]));
    }

    #[test]
    fn exception_response_surfaces_code() {
        // fc 3 | 0x80, exception 2 (illegal data address)
        let err = parse_read_response(&[0x83, 0x02], Channel::HoldingRegister, 1).unwrap_err();
        assert_eq!(err, TransportError::Exception(2));
    }

    #[test]
    fn write_coils_packs_bits() {
        let pdu = write_coils_request(5, &[true, false, true, true]);
        assert_eq!(pdu, vec![15, 0x00, 0x05, 0x00, 0x04, 1, 0b0000_1101]);
    }

    #[test]
    fn write_echo_is_verified() {
        let ok = parse_write_response(&[16, 0x00, 0x05, 0x00, 0x02], 16, 5, 2);
        assert!(ok.is_ok());
        let bad = parse_write_response(&[16, 0x00, 0x06, 0x00, 0x02], 16, 5, 2);
        assert!(bad.is_err());
    }

    #[test]
    fn rtu_crc_known_vector() {
        // Canonical example: 01 04 02 FF FF → CRC 0x80B8, low byte first.
        let frame = rtu_frame(1, &[0x04, 0x02, 0xFF, 0xFF]);
        assert_eq!(frame, vec![0x01, 0x04, 0x02, 0xFF, 0xFF, 0xB8, 0x80]);
    }

    #[test]
    fn rtu_frame_roundtrip() {
        let pdu = read_request(Channel::InputRegister, 0, 4);
        let frame = rtu_frame(7, &pdu);
        let parsed = parse_rtu_frame(&frame, 7).unwrap();
        assert_eq!(parsed, &pdu[..]);

        let mut corrupted = frame.clone();
        corrupted[2] ^= 0xFF;
        assert!(parse_rtu_frame(&corrupted, 7).is_err());
    }
}
