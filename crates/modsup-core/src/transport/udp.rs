//! Modbus UDP transport — one MBAP datagram per transaction.
//!
//! Stale datagrams (late answers to a timed-out request) are recognized by
//! transaction id and skipped rather than failing the current call.

use super::frame::{self, MAX_FRAME_LEN, MBAP_HEADER_LEN, Payload};
use super::{Transport, TransportError};
use crate::model::Channel;
use std::net::UdpSocket;
use std::time::Duration;

pub struct UdpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    socket: Option<UdpSocket>,
    transaction_id: u16,
}

impl UdpTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            socket: None,
            transaction_id: 0,
        }
    }

    fn transact(&mut self, pdu: &[u8], unit_id: u8) -> Result<Vec<u8>, TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TransportError::Connect("not connected".into()))?;

        self.transaction_id = self.transaction_id.wrapping_add(1);
        let request = frame::mbap_frame(self.transaction_id, unit_id, pdu);
        socket.send(&request).map_err(TransportError::from_io)?;

        let mut buf = [0u8; MAX_FRAME_LEN];
        // A couple of reads at most: the datagram we want, or stale ones
        // from an earlier timed-out transaction.
        for _ in 0..4 {
            let n = socket.recv(&mut buf).map_err(TransportError::from_io)?;
            if n < MBAP_HEADER_LEN {
                return Err(TransportError::Protocol("short datagram".into()));
            }
            let header: [u8; MBAP_HEADER_LEN] = buf[..MBAP_HEADER_LEN].try_into().unwrap();
            let (txn, _unit, pdu_len) = frame::parse_mbap_header(&header)?;
            if txn != self.transaction_id {
                continue;
            }
            if n < MBAP_HEADER_LEN + pdu_len {
                return Err(TransportError::Protocol("truncated datagram".into()));
            }
            return Ok(buf[MBAP_HEADER_LEN..MBAP_HEADER_LEN + pdu_len].to_vec());
        }
        Err(TransportError::Timeout)
    }
}

impl Transport for UdpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|e| TransportError::Connect(e.to_string()))?;
        socket
            .connect((self.host.as_str(), self.port))
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        socket
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| socket.set_write_timeout(Some(self.timeout)))
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        self.socket = Some(socket);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.socket.is_some()
    }

    fn close(&mut self) {
        self.socket = None;
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
