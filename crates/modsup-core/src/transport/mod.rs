//! Modbus client transports.
//!
//! One implementation per protocol:
//! - `tcp` — Modbus TCP (MBAP over a stream socket)
//! - `udp` — Modbus UDP (MBAP, one datagram per transaction)
//! - `rtu` — Modbus RTU over a serial line
//! - `mock` — scripted in-memory device for tests and demos
//!
//! Transports do not retry and do not reconnect; recovery policy belongs to
//! the owning `session`. Every call is bounded by the configured timeout.

pub mod frame;
pub mod mock;
mod rtu;
mod tcp;
mod udp;

pub use frame::Payload;
pub use mock::MockTransport;
pub use rtu::RtuTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::model::{Channel, Device, Protocol};
use std::fmt;
use std::io;
use std::time::Duration;

/// Default per-call I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport failure. Exception responses carry the device's Modbus
/// exception code; everything else is a local or line problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Timeout,
    Protocol(String),
    Exception(u8),
}

impl TransportError {
    /// Maps an I/O error from a socket or serial call.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => TransportError::Connect(err.to_string()),
            _ => TransportError::Protocol(err.to_string()),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "connect: {}", msg),
            TransportError::Timeout => write!(f, "I/O timeout"),
            TransportError::Protocol(msg) => write!(f, "protocol: {}", msg),
            TransportError::Exception(code) => {
                write!(f, "device exception {} ({})", code, exception_name(*code))
            }
        }
    }
}

impl std::error::Error for TransportError {}

fn exception_name(code: u8) -> &'static str {
    match code {
        1 => "illegal function",
        2 => "illegal data address",
        3 => "illegal data value",
        4 => "server device failure",
        5 => "acknowledge",
        6 => "server device busy",
        8 => "memory parity error",
        10 => "gateway path unavailable",
        11 => "gateway target failed to respond",
        _ => "unknown",
    }
}

/// Common contract for the three wire protocols (and the mock).
///
/// Implementations serialize nothing themselves; the owning session is the
/// single caller, so no two frames are ever in flight on one connection.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), TransportError>;
    fn connected(&self) -> bool;
    fn close(&mut self);

    /// One read transaction: function code per channel, `count` registers
    /// or bits starting at `address`.
    fn read(
        &mut self,
        channel: Channel,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Payload, TransportError>;

    fn write_coils(
        &mut self,
        address: u16,
        bits: &[bool],
        unit_id: u8,
    ) -> Result<(), TransportError>;

    fn write_registers(
        &mut self,
        address: u16,
        regs: &[u16],
        unit_id: u8,
    ) -> Result<(), TransportError>;
}

/// Builds the transport matching a device's protocol. The connection is
/// not opened here; the session does that under its backoff policy.
pub fn for_device(device: &Device, timeout: Duration) -> Box<dyn Transport> {
    match device.protocol {
        Protocol::Tcp => Box::new(TcpTransport::new(&device.host, device.port, timeout)),
        Protocol::Udp => Box::new(UdpTransport::new(&device.host, device.port, timeout)),
        Protocol::Rtu => Box::new(RtuTransport::new(&device.host, timeout)),
    }
}
