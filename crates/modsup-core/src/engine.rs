//! The poll engine — the supervisor's central control loop.
//!
//! Each tick walks the active devices. Per device: reconnect if needed
//! (under the session's backoff), drain pending writes oldest-first, then
//! read every active tag in address order, committing values to the store
//! and cache and handing the batch to the history sampler and the alarm
//! evaluator. One transport error abandons the device for the rest of the
//! tick; the next tick retries.
//!
//! Exclusivity: the engine is the only writer of tag values and the only
//! caller of every session, so no per-tag locks are needed.

use crate::alarm;
use crate::cache::TagCache;
use crate::codec::{self, CodecError};
use crate::history;
use crate::model::{Channel, Device, Tag, Value};
use crate::session::Session;
use crate::store::Store;
use crate::transport::{self, Payload, Transport, TransportError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Knobs for the poll loop; defaults match the documented cadences.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval: Duration,
    pub transport_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            transport_timeout: transport::DEFAULT_TIMEOUT,
        }
    }
}

/// Builds a transport for a device; swapped out in tests and demos.
pub type TransportFactory = Box<dyn Fn(&Device) -> Box<dyn Transport> + Send>;

/// Counters for one tick, for logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub devices_polled: usize,
    pub devices_skipped: usize,
    pub tags_read: usize,
    pub decode_errors: usize,
    pub writes_processed: usize,
    pub history_samples: usize,
    pub notifications: usize,
}

/// Connection fingerprint; a config edit that changes it gets a fresh
/// session instead of a stale socket.
type Endpoint = (String, u16, crate::model::Protocol);

struct DeviceSession {
    session: Session,
    endpoint: Endpoint,
}

pub struct Engine {
    store: Arc<Store>,
    cache: Arc<TagCache>,
    options: EngineOptions,
    sessions: HashMap<String, DeviceSession>,
    transport_factory: TransportFactory,
    ticks: u64,
}

impl Engine {
    pub fn new(store: Arc<Store>, cache: Arc<TagCache>, options: EngineOptions) -> Self {
        let timeout = options.transport_timeout;
        Self::with_transport_factory(
            store,
            cache,
            options,
            Box::new(move |device| transport::for_device(device, timeout)),
        )
    }

    /// Engine with injected transports (tests, demos).
    pub fn with_transport_factory(
        store: Arc<Store>,
        cache: Arc<TagCache>,
        options: EngineOptions,
        transport_factory: TransportFactory,
    ) -> Self {
        Self {
            store,
            cache,
            options,
            sessions: HashMap::new(),
            transport_factory,
            ticks: 0,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<TagCache> {
        &self.cache
    }

    /// Runs the poll loop until `running` goes false, then closes all
    /// sessions.
    pub fn run(&mut self, running: &AtomicBool) {
        info!(
            "Poll loop starting: interval {:?}, timeout {:?}",
            self.options.poll_interval, self.options.transport_timeout
        );

        while running.load(Ordering::SeqCst) {
            let started = std::time::Instant::now();
            let stats = self.tick(running);

            self.ticks += 1;
            if stats.tags_read > 0 || stats.writes_processed > 0 {
                debug!(
                    "Tick #{}: {} tags from {} devices, {} writes, {} skipped",
                    self.ticks,
                    stats.tags_read,
                    stats.devices_polled,
                    stats.writes_processed,
                    stats.devices_skipped
                );
            }

            // Sleep out the tick, re-checking the shutdown flag.
            let remaining = self.options.poll_interval.saturating_sub(started.elapsed());
            crate::util::sleep_while_running(remaining, running);
        }

        for entry in self.sessions.values_mut() {
            entry.session.shutdown();
        }
        info!("Poll loop stopped after {} ticks", self.ticks);
    }

    /// One scan over all active devices.
    pub fn tick(&mut self, running: &AtomicBool) -> TickStats {
        let mut stats = TickStats::default();
        let devices = self.store.active_devices();

        // Forget sessions of deleted devices.
        let live: std::collections::HashSet<&str> =
            devices.iter().map(|d| d.alias.as_str()).collect();
        self.sessions.retain(|alias, _| live.contains(alias.as_str()));

        for device in devices {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match self.poll_device(&device, &mut stats) {
                Ok(()) => stats.devices_polled += 1,
                Err(e) => {
                    stats.devices_skipped += 1;
                    debug!("Skipping {}: {}", device, e);
                }
            }
        }
        stats
    }

    /// Resolves this device's session, recreating it when the endpoint
    /// configuration changed.
    fn session_for(&mut self, device: &Device) -> &mut Session {
        let endpoint: Endpoint = (device.host.clone(), device.port, device.protocol);
        let entry = self
            .sessions
            .entry(device.alias.clone())
            .or_insert_with(|| DeviceSession {
                session: Session::new(&device.alias, (self.transport_factory)(device)),
                endpoint: endpoint.clone(),
            });
        if entry.endpoint != endpoint {
            info!("{}: endpoint changed, reconnecting", device.alias);
            entry.session.shutdown();
            entry.session = Session::new(&device.alias, (self.transport_factory)(device));
            entry.endpoint = endpoint;
        }
        &mut entry.session
    }

    fn poll_device(
        &mut self,
        device: &Device,
        stats: &mut TickStats,
    ) -> Result<(), TransportError> {
        self.session_for(device).ensure_connected()?;

        self.drain_writes(device, stats)?;
        let sampled = self.read_tags(device, stats)?;

        if sampled.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        match history::sample_batch(&self.store, &sampled, now) {
            Ok(count) => stats.history_samples += count,
            Err(e) => error!("History sampling failed for {}: {}", device, e),
        }
        match alarm::evaluate_batch(&self.store, &sampled, now) {
            Ok(intents) => stats.notifications += intents.len(),
            Err(e) => error!("Alarm evaluation failed for {}: {}", device, e),
        }
        Ok(())
    }

    /// Issues pending writes for the device, oldest first. A transport
    /// error leaves the request queued and abandons the device for this
    /// tick; an encode error consumes the request with an error note.
    fn drain_writes(
        &mut self,
        device: &Device,
        stats: &mut TickStats,
    ) -> Result<(), TransportError> {
        let pending = self.store.pending_writes_for_device(device.id);

        for request in pending {
            let tag = match self.store.tag(request.tag_id) {
                Ok(tag) => tag,
                Err(_) => continue,
            };

            let outcome = match encode_for_tag(&request.value, &tag, device) {
                Err(e) => {
                    warn!("Write to {} not encodable: {}", tag, e);
                    Err(e.to_string())
                }
                Ok(EncodedWrite::Coils(bits)) => {
                    let session = self.session_for(device);
                    match session.transport().write_coils(tag.address, &bits, tag.unit_id) {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            session.record_failure();
                            return Err(e);
                        }
                    }
                }
                Ok(EncodedWrite::Registers(regs)) => {
                    let session = self.session_for(device);
                    match session
                        .transport()
                        .write_registers(tag.address, &regs, tag.unit_id)
                    {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            session.record_failure();
                            return Err(e);
                        }
                    }
                }
            };

            let error = outcome.err();
            if let Err(e) = self.store.mark_write_processed(request.id, error) {
                error!("Failed to mark write {} processed: {}", request.id, e);
            }
            stats.writes_processed += 1;
        }
        Ok(())
    }

    /// Reads every active tag on the device; returns the updated tags.
    fn read_tags(
        &mut self,
        device: &Device,
        stats: &mut TickStats,
    ) -> Result<Vec<Tag>, TransportError> {
        let tags = self.store.active_tags_for_device(device.id);
        let mut sampled = Vec::with_capacity(tags.len());

        for tag in tags {
            let payload = {
                let session = self.session_for(device);
                match session.transport().read(
                    tag.channel,
                    tag.address,
                    tag.read_count(),
                    tag.unit_id,
                ) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Read of {} on {} failed: {}", tag, device, e);
                        session.record_failure();
                        return Err(e);
                    }
                }
            };

            let decoded = match decode_payload(&payload, &tag, device) {
                Ok(value) => value,
                Err(e) => {
                    // Keep the previous value; decode trouble is not a
                    // connection problem.
                    warn!("Decode of {} failed: {}", tag, e);
                    stats.decode_errors += 1;
                    continue;
                }
            };

            let now = Utc::now();
            match self.store.commit_poll(tag.id, decoded.clone(), now) {
                Ok(updated) => {
                    self.cache.set(tag.id, decoded, now);
                    sampled.push(updated);
                    stats.tags_read += 1;
                }
                Err(e) => error!("Committing {} failed: {}", tag, e),
            }
        }
        Ok(sampled)
    }
}

enum EncodedWrite {
    Coils(Vec<bool>),
    Registers(Vec<u16>),
}

fn encode_for_tag(
    value: &Value,
    tag: &Tag,
    device: &Device,
) -> Result<EncodedWrite, CodecError> {
    match tag.channel {
        Channel::Coil => codec::encode_coils(value, tag.read_amount).map(EncodedWrite::Coils),
        Channel::HoldingRegister => codec::encode_registers(
            value,
            tag.data_type,
            device.word_order,
            tag.read_amount,
        )
        .map(EncodedWrite::Registers),
        // Enqueue validation keeps these out of the queue.
        Channel::DiscreteInput | Channel::InputRegister => {
            Err(CodecError::BadType("channel is read-only".into()))
        }
    }
}

fn decode_payload(payload: &Payload, tag: &Tag, device: &Device) -> Result<Value, CodecError> {
    let value = match payload {
        Payload::Bits(bits) => codec::decode_bits(bits, tag.read_amount),
        Payload::Registers(regs) => codec::decode_registers(
            regs,
            tag.data_type,
            device.word_order,
            tag.read_amount,
        )?,
    };
    // A single-element read presents as a scalar.
    if tag.read_amount == 1 {
        if let Value::List(items) = &value {
            if items.len() == 1 {
                return Ok(items[0].clone());
            }
        }
    }
    Ok(value)
}
