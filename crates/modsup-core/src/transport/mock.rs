//! Scripted in-memory transport for tests.
//!
//! A `MockTransport` is a cloneable handle to shared register/coil spaces;
//! tests keep one clone to script values and inspect state while the
//! engine owns another inside a session. Every call is recorded in order,
//! which is how the per-device serialization property is checked.

use super::frame::Payload;
use super::{Transport, TransportError};
use crate::model::Channel;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Open,
    Close,
    Read {
        channel: Channel,
        address: u16,
        count: u16,
        unit_id: u8,
    },
    WriteCoils {
        address: u16,
        bits: Vec<bool>,
        unit_id: u8,
    },
    WriteRegisters {
        address: u16,
        regs: Vec<u16>,
        unit_id: u8,
    },
}

#[derive(Default)]
struct MockState {
    holding: HashMap<(u8, u16), u16>,
    input: HashMap<(u8, u16), u16>,
    coils: HashMap<(u8, u16), bool>,
    discrete: HashMap<(u8, u16), bool>,
    calls: Vec<MockCall>,
    connected: bool,
    refuse_connect: bool,
    /// Errors handed out to upcoming I/O calls, front first.
    injected: VecDeque<TransportError>,
    /// When set, the next read answers with one item too few.
    short_read: bool,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // --- scripting -------------------------------------------------

    pub fn set_holding(&self, unit_id: u8, address: u16, regs: &[u16]) {
        let mut state = self.state.lock().unwrap();
        for (i, reg) in regs.iter().enumerate() {
            state.holding.insert((unit_id, address + i as u16), *reg);
        }
    }

    pub fn set_input(&self, unit_id: u8, address: u16, regs: &[u16]) {
        let mut state = self.state.lock().unwrap();
        for (i, reg) in regs.iter().enumerate() {
            state.input.insert((unit_id, address + i as u16), *reg);
        }
    }

    pub fn set_coils(&self, unit_id: u8, address: u16, bits: &[bool]) {
        let mut state = self.state.lock().unwrap();
        for (i, bit) in bits.iter().enumerate() {
            state.coils.insert((unit_id, address + i as u16), *bit);
        }
    }

    pub fn set_discrete(&self, unit_id: u8, address: u16, bits: &[bool]) {
        let mut state = self.state.lock().unwrap();
        for (i, bit) in bits.iter().enumerate() {
            state.discrete.insert((unit_id, address + i as u16), *bit);
        }
    }

    /// While set, `open()` fails with a connect error.
    pub fn refuse_connect(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    /// Queues an error for an upcoming read/write call.
    pub fn inject_error(&self, err: TransportError) {
        self.state.lock().unwrap().injected.push_back(err);
    }

    /// Makes the next read return one item fewer than requested, as a
    /// confused device would.
    pub fn inject_short_read(&self) {
        self.state.lock().unwrap().short_read = true;
    }

    // --- inspection ------------------------------------------------

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn holding_at(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.state.lock().unwrap().holding.get(&(unit_id, address)).copied()
    }

    pub fn coil_at(&self, unit_id: u8, address: u16) -> Option<bool> {
        self.state.lock().unwrap().coils.get(&(unit_id, address)).copied()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Open);
        if state.refuse_connect {
            return Err(TransportError::Connect("mock refused".into()));
        }
        state.connected = true;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Close);
        state.connected = false;
    }

    fn read(
        &mut self,
        channel: Channel,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Payload, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::Connect("mock not connected".into()));
        }
        state.calls.push(MockCall::Read {
            channel,
            address,
            count,
            unit_id,
        });
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }

        let count = if std::mem::take(&mut state.short_read) {
            count.saturating_sub(1)
        } else {
            count
        };
        let addrs = address..address + count;
        let payload = match channel {
            Channel::HoldingRegister => Payload::Registers(
                addrs
                    .map(|a| state.holding.get(&(unit_id, a)).copied().unwrap_or(0))
                    .collect(),
            ),
            Channel::InputRegister => Payload::Registers(
                addrs
                    .map(|a| state.input.get(&(unit_id, a)).copied().unwrap_or(0))
                    .collect(),
            ),
            Channel::Coil => Payload::Bits(
                addrs
                    .map(|a| state.coils.get(&(unit_id, a)).copied().unwrap_or(false))
                    .collect(),
            ),
            Channel::DiscreteInput => Payload::Bits(
                addrs
                    .map(|a| state.discrete.get(&(unit_id, a)).copied().unwrap_or(false))
                    .collect(),
            ),
        };
        Ok(payload)
    }

    fn write_coils(
        &mut self,
        address: u16,
        bits: &[bool],
        unit_id: u8,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::Connect("mock not connected".into()));
        }
        state.calls.push(MockCall::WriteCoils {
            address,
            bits: bits.to_vec(),
            unit_id,
        });
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        for (i, bit) in bits.iter().enumerate() {
            state.coils.insert((unit_id, address + i as u16), *bit);
        }
        Ok(())
    }

    fn write_registers(
        &mut self,
        address: u16,
        regs: &[u16],
        unit_id: u8,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::Connect("mock not connected".into()));
        }
        state.calls.push(MockCall::WriteRegisters {
            address,
            regs: regs.to_vec(),
            unit_id,
        });
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        for (i, reg) in regs.iter().enumerate() {
            state.holding.insert((unit_id, address + i as u16), *reg);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_scripted_registers() {
        let mock = MockTransport::new();
        mock.set_holding(1, 10, &[5, 6, 7]);

        let mut transport = mock.clone();
        transport.open().unwrap();
        let payload = transport.read(Channel::HoldingRegister, 10, 3, 1).unwrap();
        assert_eq!(payload, Payload::Registers(vec![5, 6, 7]));
        // Unscripted addresses read as zero.
        let payload = transport.read(Channel::HoldingRegister, 100, 2, 1).unwrap();
        assert_eq!(payload, Payload::Registers(vec![0, 0]));
    }

    #[test]
    fn records_calls_in_order() {
        let mock = MockTransport::new();
        let mut transport = mock.clone();
        transport.open().unwrap();
        transport.write_coils(5, &[true], 1).unwrap();
        transport.read(Channel::Coil, 5, 1, 1).unwrap();

        let calls = mock.calls();
        assert_eq!(calls[0], MockCall::Open);
        assert!(matches!(calls[1], MockCall::WriteCoils { address: 5, .. }));
        assert!(matches!(calls[2], MockCall::Read { address: 5, .. }));
        assert_eq!(mock.coil_at(1, 5), Some(true));
    }

    #[test]
    fn injected_errors_fire_once() {
        let mock = MockTransport::new();
        let mut transport = mock.clone();
        transport.open().unwrap();
        mock.inject_error(TransportError::Timeout);

        let err = transport.read(Channel::Coil, 0, 1, 1).unwrap_err();
        assert_eq!(err, TransportError::Timeout);
        assert!(transport.read(Channel::Coil, 0, 1, 1).is_ok());
    }
}
