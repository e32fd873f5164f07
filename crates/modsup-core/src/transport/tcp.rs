//! Modbus TCP transport — MBAP frames over a stream socket.

use super::frame::{self, MBAP_HEADER_LEN, Payload};
use super::{Transport, TransportError};
use crate::model::Channel;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    /// Rolling MBAP transaction id, matched against each response.
    transaction_id: u16,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            stream: None,
            transaction_id: 0,
        }
    }

    /// Sends a request PDU and returns the response PDU.
    fn transact(&mut self, pdu: &[u8], unit_id: u8) -> Result<Vec<u8>, TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Connect("not connected".into()))?;

        self.transaction_id = self.transaction_id.wrapping_add(1);
        let request = frame::mbap_frame(self.transaction_id, unit_id, pdu);
        stream.write_all(&request).map_err(TransportError::from_io)?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        stream
            .read_exact(&mut header)
            .map_err(TransportError::from_io)?;
        let (txn, _unit, pdu_len) = frame::parse_mbap_header(&header)?;
        if txn != self.transaction_id {
            return Err(TransportError::Protocol(format!(
                "transaction id {} (expected {})",
                txn, self.transaction_id
            )));
        }

        let mut response = vec![0u8; pdu_len];
        stream
            .read_exact(&mut response)
            .map_err(TransportError::from_io)?;
        Ok(response)
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .next()
            .ok_or_else(|| TransportError::Connect(format!("no address for {}", self.host)))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        // Dropping the stream closes the socket.
        self.stream = None;
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
