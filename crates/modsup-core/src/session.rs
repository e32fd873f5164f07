//! Per-device transport ownership and recovery.
//!
//! A session is the only holder of a device's transport; all Modbus I/O to
//! that device goes through it, one frame at a time. On failure the session
//! closes the connection and backs off exponentially (1 s doubling, capped
//! at 30 s) before the next connect attempt.

use crate::transport::{Transport, TransportError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

pub struct Session {
    alias: String,
    transport: Box<dyn Transport>,
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
    retry_at: Option<Instant>,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl Session {
    pub fn new(alias: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            alias: alias.to_string(),
            transport,
            consecutive_failures: 0,
            last_attempt: None,
            retry_at: None,
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
        }
    }

    /// Overrides the backoff curve; used by tests.
    #[cfg(test)]
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    /// True while a failed session is waiting out its backoff window.
    pub fn backing_off(&self) -> bool {
        self.retry_at.is_some_and(|at| Instant::now() < at)
    }

    /// Ensures the transport is open, honoring the backoff deadline.
    pub fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.transport.connected() {
            return Ok(());
        }
        if self.backing_off() {
            return Err(TransportError::Connect(format!(
                "{}: backing off after {} failures",
                self.alias, self.consecutive_failures
            )));
        }

        self.last_attempt = Some(Instant::now());
        match self.transport.open() {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Reconnected to {} after {} failures",
                        self.alias, self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.retry_at = None;
                Ok(())
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Marks an I/O failure: closes the connection and schedules the next
    /// connect attempt.
    pub fn record_failure(&mut self) {
        self.transport.close();
        self.consecutive_failures += 1;
        let exp = self.consecutive_failures.saturating_sub(1).min(31);
        let delay = self
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_cap);
        self.retry_at = Some(Instant::now() + delay);
        debug!(
            "{}: failure #{}, next attempt in {:?}",
            self.alias, self.consecutive_failures, delay
        );
    }

    /// Exclusive access to the transport for one I/O call. The caller must
    /// report errors via `record_failure`.
    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Closes the connection without scheduling a retry (shutdown path).
    pub fn shutdown(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn connects_and_resets_failures() {
        let mock = MockTransport::new();
        let mut session = Session::new("plc-1", Box::new(mock.clone()));
        session.ensure_connected().unwrap();
        assert!(session.connected());

        session.record_failure();
        assert!(!session.connected());
        assert!(session.backing_off());
    }

    #[test]
    fn backoff_blocks_reconnect_until_deadline() {
        let mock = MockTransport::new();
        let mut session = Session::new("plc-1", Box::new(mock.clone()))
            .with_backoff(Duration::from_millis(30), Duration::from_millis(120));

        session.record_failure();
        let open_calls = |m: &MockTransport| {
            m.calls()
                .iter()
                .filter(|c| matches!(c, crate::transport::mock::MockCall::Open))
                .count()
        };

        // Inside the window: no connect attempt is made.
        assert!(session.ensure_connected().is_err());
        assert_eq!(open_calls(&mock), 0);

        std::thread::sleep(Duration::from_millis(40));
        session.ensure_connected().unwrap();
        assert_eq!(open_calls(&mock), 1);
        assert!(!session.backing_off());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mock = MockTransport::new();
        mock.refuse_connect(true);
        let mut session = Session::new("plc-1", Box::new(mock))
            .with_backoff(Duration::from_secs(1), Duration::from_secs(4));

        // Repeated failures walk 1s, 2s, 4s, 4s...
        for _ in 0..5 {
            session.record_failure();
        }
        let deadline = session.retry_at.unwrap();
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(remaining <= Duration::from_secs(4));
        assert!(remaining > Duration::from_secs(3));
    }
}
