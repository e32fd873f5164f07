//! Modbus RTU transport — framed PDUs over a serial line.
//!
//! The device's `host` is the serial device path (e.g. `/dev/ttyUSB0`).
//! Line parameters are fixed at 9600 8N1; per-device line settings are a
//! possible extension once the device model carries them.

use super::frame::{self, Payload};
use super::{Transport, TransportError};
use crate::model::Channel;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

const BAUD_RATE: u32 = 9600;

pub struct RtuTransport {
    path: String,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl RtuTransport {
    pub fn new(path: &str, timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            timeout,
            port: None,
        }
    }

    /// Sends a framed PDU and reads back one complete response frame.
    ///
    /// RTU has no length prefix, so the response is sized from its function
    /// code: exceptions carry one code byte, read responses a byte count,
    /// write responses an echoed address + quantity.
    fn transact(&mut self, pdu: &[u8], unit_id: u8) -> Result<Vec<u8>, TransportError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| TransportError::Connect("not connected".into()))?;

        let request = frame::rtu_frame(unit_id, pdu);
        port.write_all(&request).map_err(TransportError::from_io)?;

        let mut head = [0u8; 2];
        port.read_exact(&mut head).map_err(TransportError::from_io)?;
        let function = head[1];

        let body_len = if function & 0x80 != 0 {
            1
        } else {
            match function {
                frame::FC_READ_COILS
                | frame::FC_READ_DISCRETE_INPUTS
                | frame::FC_READ_HOLDING_REGISTERS
                | frame::FC_READ_INPUT_REGISTERS => {
                    let mut count = [0u8; 1];
                    port.read_exact(&mut count).map_err(TransportError::from_io)?;
                    let mut rest = vec![0u8; count[0] as usize];
                    port.read_exact(&mut rest).map_err(TransportError::from_io)?;

                    let mut frame_bytes = head.to_vec();
                    frame_bytes.extend_from_slice(&count);
                    frame_bytes.extend_from_slice(&rest);
                    return Self::finish(port, frame_bytes, unit_id);
                }
                frame::FC_WRITE_MULTIPLE_COILS | frame::FC_WRITE_MULTIPLE_REGISTERS => 4,
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected RTU function code {}",
                        other
                    )));
                }
            }
        };

        let mut rest = vec![0u8; body_len];
        port.read_exact(&mut rest).map_err(TransportError::from_io)?;
        let mut frame_bytes = head.to_vec();
        frame_bytes.extend_from_slice(&rest);
        Self::finish(port, frame_bytes, unit_id)
    }

    /// Reads the trailing CRC, validates the frame, returns the PDU.
    fn finish(
        port: &mut Box<dyn SerialPort>,
        mut frame_bytes: Vec<u8>,
        unit_id: u8,
    ) -> Result<Vec<u8>, TransportError> {
        let mut crc = [0u8; 2];
        port.read_exact(&mut crc).map_err(TransportError::from_io)?;
        frame_bytes.extend_from_slice(&crc);
        frame::parse_rtu_frame(&frame_bytes, unit_id).map(|pdu| pdu.to_vec())
    }
}

impl Transport for RtuTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let port = serialport::new(&self.path, BAUD_RATE)
            .timeout(self.timeout)
            .open()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.port = Some(port);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn read(
        &mut self,
        channel: Channel,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Payload, TransportError> {
        let pdu = frame::read_request(channel, address, count);
        let response = self.transact(&pdu, unit_id)?;
        frame::parse_read_response(&response, channel, count)
    }

    fn write_coils(
        &mut self,
        address: u16,
        bits: &[bool],
        unit_id: u8,
    ) -> Result<(), TransportError> {
        let pdu = frame::write_coils_request(address, bits);
        let response = self.transact(&pdu, unit_id)?;
        frame::parse_write_response(
            &response,
            frame::FC_WRITE_MULTIPLE_COILS,
            address,
            bits.len() as u16,
        )
    }

    fn write_registers(
        &mut self,
        address: u16,
        regs: &[u16],
        unit_id: u8,
    ) -> Result<(), TransportError> {
        let pdu = frame::write_registers_request(address, regs);
        let response = self.transact(&pdu, unit_id)?;
        frame::parse_write_response(
            &response,
            frame::FC_WRITE_MULTIPLE_REGISTERS,
            address,
            regs.len() as u16,
        )
    }
}
