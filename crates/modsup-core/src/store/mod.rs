//! Embedded repository for the supervisor's configuration and runtime state.
//!
//! In-memory tables guarded by a `RwLock`, durable through an append-only
//! WAL of row mutations that is compacted into a zstd snapshot once it
//! grows past a limit (format in `wal`). The store is the serialization
//! point of truth: every mutating operation validates, applies to the
//! tables, and appends to the WAL under the same write lock.
//!
//! Uniqueness enforced here:
//! - device `alias`
//! - tag `external_id` and `(device, channel, address, unit_id)`
//! - alarm config `(tag, alias)`
//! - subscription `(config, email)`
//! - schedule `alias`

mod wal;

use crate::model::{
    ActivatedAlarm, ActivatedAlarmId, AlarmConfig, AlarmConfigId, Channel, Dashboard, DashboardId,
    DataType, Device, DeviceId, HistoryEntry, NotificationIntent, Operator, Protocol, Schedule,
    ScheduleId, Subscription, SubscriptionId, Tag, TagId, ThreatLevel, Value, Widget, WidgetId,
    WordOrder, WriteRequest, WriteRequestId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use wal::WalFile;

/// WAL entries accumulated before the state is compacted into a snapshot.
const WAL_COMPACT_THRESHOLD: usize = 4096;

/// Notification intents kept in the outbox; oldest beyond this are dropped.
const OUTBOX_CAP: usize = 1000;

// ============================================================
// Errors
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Corrupt(String),
    /// Uniqueness violation.
    Conflict(String),
    NotFound(String),
    /// Write to a read-only channel.
    NotWritable,
    Validation(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "store I/O: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "store corrupt: {}", msg),
            StoreError::Conflict(msg) => write!(f, "conflict: {}", msg),
            StoreError::NotFound(what) => write!(f, "not found: {}", what),
            StoreError::NotWritable => write!(f, "tag channel is read-only"),
            StoreError::Validation(msg) => write!(f, "validation: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

// ============================================================
// Creation / update parameter records
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    pub alias: String,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub word_order: WordOrder,
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub word_order: Option<WordOrder>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTag {
    pub device_id: DeviceId,
    pub alias: String,
    pub description: String,
    pub channel: Channel,
    pub data_type: DataType,
    pub address: u16,
    pub unit_id: u8,
    pub read_amount: u16,
    pub history_interval: Duration,
    pub history_retention: Duration,
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagUpdate {
    pub alias: Option<String>,
    pub description: Option<String>,
    pub history_interval: Option<Duration>,
    pub history_retention: Option<Duration>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlarmConfig {
    pub tag_id: TagId,
    pub alias: String,
    pub trigger_value: Value,
    pub operator: Operator,
    pub threat_level: ThreatLevel,
    pub message: String,
    pub enabled: bool,
    pub notification_cooldown: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmConfigUpdate {
    pub trigger_value: Option<Value>,
    pub operator: Option<Operator>,
    pub threat_level: Option<ThreatLevel>,
    pub message: Option<String>,
    pub enabled: Option<bool>,
    pub notification_cooldown: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub config_id: AlarmConfigId,
    pub email: String,
    pub email_enabled: bool,
    pub sms_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub alias: String,
    pub tag_id: TagId,
    pub write_value: Value,
    pub hour: u8,
    pub minute: u8,
    pub days: [bool; 7],
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleUpdate {
    pub write_value: Option<Value>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub days: Option<[bool; 7]>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDashboard {
    pub alias: String,
    pub description: String,
    pub column_count: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWidget {
    pub dashboard_id: DashboardId,
    pub widget_type: String,
    pub tag_id: Option<TagId>,
    pub config: String,
}

// ============================================================
// Tables and mutations
// ============================================================

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    devices: BTreeMap<DeviceId, Device>,
    tags: BTreeMap<TagId, Tag>,
    writes: BTreeMap<WriteRequestId, WriteRequest>,
    alarm_configs: BTreeMap<AlarmConfigId, AlarmConfig>,
    activations: BTreeMap<ActivatedAlarmId, ActivatedAlarm>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    schedules: BTreeMap<ScheduleId, Schedule>,
    history: BTreeMap<TagId, VecDeque<HistoryEntry>>,
    outbox: VecDeque<NotificationIntent>,
    dashboards: BTreeMap<DashboardId, Dashboard>,
    widgets: BTreeMap<WidgetId, Widget>,
}

/// One durable row change. Replay applies these in order; cascades are
/// folded into the delete mutations so a record is self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Mutation {
    PutDevice(Device),
    DeleteDevice(DeviceId),
    PutTag(Tag),
    DeleteTag(TagId),
    PutWrite(WriteRequest),
    DeleteWrite(WriteRequestId),
    PutAlarmConfig(AlarmConfig),
    DeleteAlarmConfig(AlarmConfigId),
    PutActivation(ActivatedAlarm),
    DeleteActivation(ActivatedAlarmId),
    PutSubscription(Subscription),
    DeleteSubscription(SubscriptionId),
    PutSchedule(Schedule),
    DeleteSchedule(ScheduleId),
    AppendHistory(TagId, HistoryEntry),
    PruneHistory(TagId, DateTime<Utc>),
    PushIntent(NotificationIntent),
    PutDashboard(Dashboard),
    DeleteDashboard(DashboardId),
    PutWidget(Widget),
    DeleteWidget(WidgetId),
}

impl Tables {
    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::PutDevice(d) => {
                self.devices.insert(d.id, d.clone());
            }
            Mutation::DeleteDevice(id) => {
                self.devices.remove(id);
                let tag_ids: Vec<TagId> = self
                    .tags
                    .values()
                    .filter(|t| t.device_id == *id)
                    .map(|t| t.id)
                    .collect();
                for tag_id in tag_ids {
                    self.remove_tag_cascade(tag_id);
                }
            }
            Mutation::PutTag(t) => {
                self.tags.insert(t.id, t.clone());
            }
            Mutation::DeleteTag(id) => self.remove_tag_cascade(*id),
            Mutation::PutWrite(w) => {
                self.writes.insert(w.id, w.clone());
            }
            Mutation::DeleteWrite(id) => {
                self.writes.remove(id);
            }
            Mutation::PutAlarmConfig(c) => {
                self.alarm_configs.insert(c.id, c.clone());
            }
            Mutation::DeleteAlarmConfig(id) => self.remove_config_cascade(*id),
            Mutation::PutActivation(a) => {
                self.activations.insert(a.id, a.clone());
            }
            Mutation::DeleteActivation(id) => {
                self.activations.remove(id);
            }
            Mutation::PutSubscription(s) => {
                self.subscriptions.insert(s.id, s.clone());
            }
            Mutation::DeleteSubscription(id) => {
                self.subscriptions.remove(id);
            }
            Mutation::PutSchedule(s) => {
                self.schedules.insert(s.id, s.clone());
            }
            Mutation::DeleteSchedule(id) => {
                self.schedules.remove(id);
            }
            Mutation::AppendHistory(tag_id, entry) => {
                self.history.entry(*tag_id).or_default().push_back(entry.clone());
            }
            Mutation::PruneHistory(tag_id, cutoff) => {
                if let Some(entries) = self.history.get_mut(tag_id) {
                    while entries.front().is_some_and(|e| e.timestamp < *cutoff) {
                        entries.pop_front();
                    }
                    if entries.is_empty() {
                        self.history.remove(tag_id);
                    }
                }
            }
            Mutation::PushIntent(intent) => {
                self.outbox.push_back(intent.clone());
                while self.outbox.len() > OUTBOX_CAP {
                    self.outbox.pop_front();
                }
            }
            Mutation::PutDashboard(d) => {
                self.dashboards.insert(d.id, d.clone());
            }
            Mutation::DeleteDashboard(id) => {
                self.dashboards.remove(id);
                self.widgets.retain(|_, w| w.dashboard_id != *id);
            }
            Mutation::PutWidget(w) => {
                self.widgets.insert(w.id, w.clone());
            }
            Mutation::DeleteWidget(id) => {
                self.widgets.remove(id);
            }
        }
    }

    fn remove_tag_cascade(&mut self, tag_id: TagId) {
        self.tags.remove(&tag_id);
        self.history.remove(&tag_id);
        self.writes.retain(|_, w| w.tag_id != tag_id);
        let config_ids: Vec<AlarmConfigId> = self
            .alarm_configs
            .values()
            .filter(|c| c.tag_id == tag_id)
            .map(|c| c.id)
            .collect();
        for config_id in config_ids {
            self.remove_config_cascade(config_id);
        }
        self.schedules.retain(|_, s| s.tag_id != tag_id);
        // Widgets keep existing but lose the dangling reference.
        for widget in self.widgets.values_mut() {
            if widget.tag_id == Some(tag_id) {
                widget.tag_id = None;
            }
        }
    }

    fn remove_config_cascade(&mut self, config_id: AlarmConfigId) {
        self.alarm_configs.remove(&config_id);
        self.activations.retain(|_, a| a.config_id != config_id);
        self.subscriptions.retain(|_, s| s.config_id != config_id);
    }

    /// Next dense id, shared across tables.
    fn next_id(&self) -> u32 {
        let max = [
            self.devices.keys().next_back().copied().unwrap_or(0),
            self.tags.keys().next_back().copied().unwrap_or(0),
            self.writes.keys().next_back().copied().unwrap_or(0),
            self.alarm_configs.keys().next_back().copied().unwrap_or(0),
            self.activations.keys().next_back().copied().unwrap_or(0),
            self.subscriptions.keys().next_back().copied().unwrap_or(0),
            self.schedules.keys().next_back().copied().unwrap_or(0),
            self.dashboards.keys().next_back().copied().unwrap_or(0),
            self.widgets.keys().next_back().copied().unwrap_or(0),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        max + 1
    }
}

// ============================================================
// Store
// ============================================================

pub struct Store {
    tables: RwLock<Tables>,
    wal: Mutex<WalFile>,
    snapshot_path: PathBuf,
}

impl Store {
    /// Opens (or creates) the store in `dir`. Startup removes stale `.tmp`
    /// files, loads the snapshot, replays the WAL, and truncates any torn
    /// tail it finds there.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;
        wal::remove_stale_tmp(dir);

        let snapshot_path = dir.join("state.bin");
        let wal_path = dir.join("wal.log");

        let mut tables: Tables = wal::read_snapshot(&snapshot_path)?.unwrap_or_default();
        let mutations: Vec<Mutation> = wal::replay(&wal_path)?;
        let replayed = mutations.len();
        for mutation in &mutations {
            tables.apply(mutation);
        }
        if replayed > 0 {
            debug!("Replayed {} WAL entries", replayed);
        }
        info!(
            "Store opened: {} devices, {} tags, {} pending writes",
            tables.devices.len(),
            tables.tags.len(),
            tables.writes.values().filter(|w| !w.processed).count()
        );

        Ok(Self {
            tables: RwLock::new(tables),
            wal: Mutex::new(WalFile::open(&wal_path, replayed)?),
            snapshot_path,
        })
    }

    /// Applies and persists a batch of mutations as one commit.
    fn commit(&self, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write().unwrap();
        for mutation in &mutations {
            tables.apply(mutation);
        }
        let mut wal = self.wal.lock().unwrap();
        wal.append_all(&mutations)?;
        if wal.entries() >= WAL_COMPACT_THRESHOLD {
            wal::write_snapshot(&self.snapshot_path, &*tables)?;
            wal.truncate()?;
            debug!("Compacted WAL into snapshot");
        }
        Ok(())
    }

    /// Compacts and syncs; called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        let tables = self.tables.write().unwrap();
        let mut wal = self.wal.lock().unwrap();
        wal::write_snapshot(&self.snapshot_path, &*tables)?;
        wal.truncate()?;
        wal.sync()
    }

    // --- devices ---------------------------------------------------

    pub fn create_device(&self, new: NewDevice) -> Result<Device, StoreError> {
        validate_alias(&new.alias)?;
        let device = {
            let tables = self.tables.read().unwrap();
            if tables.devices.values().any(|d| d.alias == new.alias) {
                return Err(StoreError::Conflict(format!(
                    "device alias {:?} already exists",
                    new.alias
                )));
            }
            Device {
                id: tables.next_id(),
                alias: new.alias,
                host: new.host,
                port: new.port,
                protocol: new.protocol,
                word_order: new.word_order,
                active: new.active,
            }
        };
        self.commit(vec![Mutation::PutDevice(device.clone())])?;
        Ok(device)
    }

    /// Create-or-update keyed on the alias; update fields are the full
    /// `NewDevice` record.
    pub fn upsert_device(&self, new: NewDevice) -> Result<Device, StoreError> {
        let existing = self.device_by_alias(&new.alias);
        match existing {
            None => self.create_device(new),
            Some(device) => {
                let updated = Device {
                    id: device.id,
                    alias: device.alias,
                    host: new.host,
                    port: new.port,
                    protocol: new.protocol,
                    word_order: new.word_order,
                    active: new.active,
                };
                self.commit(vec![Mutation::PutDevice(updated.clone())])?;
                Ok(updated)
            }
        }
    }

    pub fn update_device(&self, id: DeviceId, patch: DeviceUpdate) -> Result<Device, StoreError> {
        let mut device = self.device(id)?;
        if let Some(host) = patch.host {
            device.host = host;
        }
        if let Some(port) = patch.port {
            device.port = port;
        }
        if let Some(protocol) = patch.protocol {
            device.protocol = protocol;
        }
        if let Some(word_order) = patch.word_order {
            device.word_order = word_order;
        }
        if let Some(active) = patch.active {
            device.active = active;
        }
        self.commit(vec![Mutation::PutDevice(device.clone())])?;
        Ok(device)
    }

    pub fn delete_device(&self, id: DeviceId) -> Result<(), StoreError> {
        self.device(id)?;
        self.commit(vec![Mutation::DeleteDevice(id)])
    }

    pub fn device(&self, id: DeviceId) -> Result<Device, StoreError> {
        self.tables
            .read()
            .unwrap()
            .devices
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("device {}", id)))
    }

    pub fn device_by_alias(&self, alias: &str) -> Option<Device> {
        self.tables
            .read()
            .unwrap()
            .devices
            .values()
            .find(|d| d.alias == alias)
            .cloned()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.tables.read().unwrap().devices.values().cloned().collect()
    }

    pub fn active_devices(&self) -> Vec<Device> {
        self.tables
            .read()
            .unwrap()
            .devices
            .values()
            .filter(|d| d.active)
            .cloned()
            .collect()
    }

    // --- tags ------------------------------------------------------

    pub fn create_tag(&self, new: NewTag) -> Result<Tag, StoreError> {
        validate_tag_fields(&new)?;
        let tag = {
            let tables = self.tables.read().unwrap();
            if !tables.devices.contains_key(&new.device_id) {
                return Err(StoreError::NotFound(format!("device {}", new.device_id)));
            }
            let placement = (new.device_id, new.channel, new.address, new.unit_id);
            if tables.tags.values().any(|t| t.placement() == placement) {
                return Err(StoreError::Conflict(format!(
                    "tag already exists at {}/{}:{} unit {}",
                    new.device_id,
                    new.channel.as_str(),
                    new.address,
                    new.unit_id
                )));
            }
            Tag {
                id: tables.next_id(),
                external_id: Uuid::new_v4(),
                device_id: new.device_id,
                alias: new.alias,
                description: new.description,
                channel: new.channel,
                data_type: new.data_type,
                address: new.address,
                unit_id: new.unit_id,
                read_amount: new.read_amount,
                history_interval: new.history_interval,
                history_retention: new.history_retention,
                current_value: None,
                last_updated: None,
                last_history_at: None,
                active: new.active,
            }
        };
        self.commit(vec![Mutation::PutTag(tag.clone())])?;
        Ok(tag)
    }

    /// Create-or-update keyed on `(device, channel, address, unit_id)`.
    pub fn upsert_tag(&self, new: NewTag) -> Result<Tag, StoreError> {
        validate_tag_fields(&new)?;
        let placement = (new.device_id, new.channel, new.address, new.unit_id);
        let existing = {
            let tables = self.tables.read().unwrap();
            tables
                .tags
                .values()
                .find(|t| t.placement() == placement)
                .cloned()
        };
        match existing {
            None => self.create_tag(new),
            Some(mut tag) => {
                tag.alias = new.alias;
                tag.description = new.description;
                tag.data_type = new.data_type;
                tag.read_amount = new.read_amount;
                tag.history_interval = new.history_interval;
                tag.history_retention = new.history_retention;
                tag.active = new.active;
                self.commit(vec![Mutation::PutTag(tag.clone())])?;
                Ok(tag)
            }
        }
    }

    pub fn update_tag(&self, id: TagId, patch: TagUpdate) -> Result<Tag, StoreError> {
        let mut tag = self.tag(id)?;
        if let Some(alias) = patch.alias {
            tag.alias = alias;
        }
        if let Some(description) = patch.description {
            tag.description = description;
        }
        if let Some(interval) = patch.history_interval {
            tag.history_interval = interval;
        }
        if let Some(retention) = patch.history_retention {
            tag.history_retention = retention;
        }
        if let Some(active) = patch.active {
            tag.active = active;
        }
        self.commit(vec![Mutation::PutTag(tag.clone())])?;
        Ok(tag)
    }

    pub fn delete_tag(&self, id: TagId) -> Result<(), StoreError> {
        self.tag(id)?;
        self.commit(vec![Mutation::DeleteTag(id)])
    }

    pub fn tag(&self, id: TagId) -> Result<Tag, StoreError> {
        self.tables
            .read()
            .unwrap()
            .tags
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tag {}", id)))
    }

    pub fn tag_by_external(&self, external_id: Uuid) -> Option<Tag> {
        self.tables
            .read()
            .unwrap()
            .tags
            .values()
            .find(|t| t.external_id == external_id)
            .cloned()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.tables.read().unwrap().tags.values().cloned().collect()
    }

    /// Active tags of one device, in address order (deterministic polling).
    pub fn active_tags_for_device(&self, device_id: DeviceId) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .tables
            .read()
            .unwrap()
            .tags
            .values()
            .filter(|t| t.device_id == device_id && t.active)
            .cloned()
            .collect();
        tags.sort_by_key(|t| (t.channel.as_str(), t.address, t.unit_id));
        tags
    }

    /// Commits a freshly polled value; value and timestamp land together.
    pub fn commit_poll(
        &self,
        tag_id: TagId,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<Tag, StoreError> {
        let mut tag = self.tag(tag_id)?;
        tag.current_value = Some(value);
        tag.last_updated = Some(now);
        self.commit(vec![Mutation::PutTag(tag.clone())])?;
        Ok(tag)
    }

    // --- history ---------------------------------------------------

    /// Bulk insert of history samples plus the matching `last_history_at`
    /// bumps, as one commit.
    pub fn record_history(
        &self,
        samples: Vec<(TagId, HistoryEntry)>,
    ) -> Result<(), StoreError> {
        let mut mutations = Vec::with_capacity(samples.len() * 2);
        {
            let tables = self.tables.read().unwrap();
            for (tag_id, entry) in samples {
                let Some(tag) = tables.tags.get(&tag_id) else {
                    continue;
                };
                let mut updated = tag.clone();
                updated.last_history_at = Some(entry.timestamp);
                mutations.push(Mutation::PutTag(updated));
                mutations.push(Mutation::AppendHistory(tag_id, entry));
            }
        }
        self.commit(mutations)
    }

    /// History entries at or after `since`, oldest first.
    pub fn history_window(&self, tag_id: TagId, since: DateTime<Utc>) -> Vec<HistoryEntry> {
        self.tables
            .read()
            .unwrap()
            .history
            .get(&tag_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn history_len(&self, tag_id: TagId) -> usize {
        self.tables
            .read()
            .unwrap()
            .history
            .get(&tag_id)
            .map_or(0, |e| e.len())
    }

    // --- write queue -----------------------------------------------

    /// Enqueues an operator (or schedule) write. Rejects unknown tags and
    /// read-only channels at the door.
    pub fn enqueue_write(
        &self,
        tag_id: TagId,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<WriteRequest, StoreError> {
        let request = {
            let tables = self.tables.read().unwrap();
            let tag = tables
                .tags
                .get(&tag_id)
                .ok_or_else(|| StoreError::NotFound(format!("tag {}", tag_id)))?;
            if !tag.channel.is_writable() {
                return Err(StoreError::NotWritable);
            }
            WriteRequest {
                id: tables.next_id(),
                tag_id,
                value,
                enqueued_at: now,
                processed: false,
                error: None,
            }
        };
        self.commit(vec![Mutation::PutWrite(request.clone())])?;
        Ok(request)
    }

    /// Unprocessed writes for tags on one device, oldest first.
    pub fn pending_writes_for_device(&self, device_id: DeviceId) -> Vec<WriteRequest> {
        let tables = self.tables.read().unwrap();
        let mut pending: Vec<WriteRequest> = tables
            .writes
            .values()
            .filter(|w| !w.processed)
            .filter(|w| {
                tables
                    .tags
                    .get(&w.tag_id)
                    .is_some_and(|t| t.device_id == device_id)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|w| (w.enqueued_at, w.id));
        pending
    }

    /// Flips the processed flag; `error` records a write given up on.
    pub fn mark_write_processed(
        &self,
        id: WriteRequestId,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut request = {
            let tables = self.tables.read().unwrap();
            tables
                .writes
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("write request {}", id)))?
        };
        request.processed = true;
        request.error = error;
        self.commit(vec![Mutation::PutWrite(request)])
    }

    pub fn write_requests(&self) -> Vec<WriteRequest> {
        self.tables.read().unwrap().writes.values().cloned().collect()
    }

    // --- alarm configs and activations -----------------------------

    pub fn create_alarm_config(&self, new: NewAlarmConfig) -> Result<AlarmConfig, StoreError> {
        validate_alias(&new.alias)?;
        let config = {
            let tables = self.tables.read().unwrap();
            if !tables.tags.contains_key(&new.tag_id) {
                return Err(StoreError::NotFound(format!("tag {}", new.tag_id)));
            }
            if tables
                .alarm_configs
                .values()
                .any(|c| c.tag_id == new.tag_id && c.alias == new.alias)
            {
                return Err(StoreError::Conflict(format!(
                    "alarm {:?} already exists on tag {}",
                    new.alias, new.tag_id
                )));
            }
            AlarmConfig {
                id: tables.next_id(),
                tag_id: new.tag_id,
                alias: new.alias,
                trigger_value: new.trigger_value,
                operator: new.operator,
                threat_level: new.threat_level,
                message: new.message,
                enabled: new.enabled,
                notification_cooldown: new.notification_cooldown,
                last_notified: None,
            }
        };
        self.commit(vec![Mutation::PutAlarmConfig(config.clone())])?;
        Ok(config)
    }

    /// Create-or-update keyed on `(tag, alias)`.
    pub fn upsert_alarm_config(&self, new: NewAlarmConfig) -> Result<AlarmConfig, StoreError> {
        let existing = {
            let tables = self.tables.read().unwrap();
            tables
                .alarm_configs
                .values()
                .find(|c| c.tag_id == new.tag_id && c.alias == new.alias)
                .cloned()
        };
        match existing {
            None => self.create_alarm_config(new),
            Some(mut config) => {
                config.trigger_value = new.trigger_value;
                config.operator = new.operator;
                config.threat_level = new.threat_level;
                config.message = new.message;
                config.enabled = new.enabled;
                config.notification_cooldown = new.notification_cooldown;
                self.commit(vec![Mutation::PutAlarmConfig(config.clone())])?;
                Ok(config)
            }
        }
    }

    pub fn update_alarm_config(
        &self,
        id: AlarmConfigId,
        patch: AlarmConfigUpdate,
    ) -> Result<AlarmConfig, StoreError> {
        let mut config = self.alarm_config(id)?;
        if let Some(trigger_value) = patch.trigger_value {
            config.trigger_value = trigger_value;
        }
        if let Some(operator) = patch.operator {
            config.operator = operator;
        }
        if let Some(threat_level) = patch.threat_level {
            config.threat_level = threat_level;
        }
        if let Some(message) = patch.message {
            config.message = message;
        }
        if let Some(enabled) = patch.enabled {
            config.enabled = enabled;
        }
        if let Some(cooldown) = patch.notification_cooldown {
            config.notification_cooldown = cooldown;
        }
        self.commit(vec![Mutation::PutAlarmConfig(config.clone())])?;
        Ok(config)
    }

    pub fn delete_alarm_config(&self, id: AlarmConfigId) -> Result<(), StoreError> {
        self.alarm_config(id)?;
        self.commit(vec![Mutation::DeleteAlarmConfig(id)])
    }

    pub fn alarm_config(&self, id: AlarmConfigId) -> Result<AlarmConfig, StoreError> {
        self.tables
            .read()
            .unwrap()
            .alarm_configs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("alarm config {}", id)))
    }

    pub fn alarm_configs(&self) -> Vec<AlarmConfig> {
        self.tables
            .read()
            .unwrap()
            .alarm_configs
            .values()
            .cloned()
            .collect()
    }

    /// Enabled configs for one tag, id order.
    pub fn enabled_configs_for_tag(&self, tag_id: TagId) -> Vec<AlarmConfig> {
        self.tables
            .read()
            .unwrap()
            .alarm_configs
            .values()
            .filter(|c| c.tag_id == tag_id && c.enabled)
            .cloned()
            .collect()
    }

    /// The at-most-one active activation of a tag, with its config.
    pub fn active_alarm_for_tag(&self, tag_id: TagId) -> Option<(ActivatedAlarm, AlarmConfig)> {
        let tables = self.tables.read().unwrap();
        tables
            .activations
            .values()
            .filter(|a| a.active)
            .find_map(|a| {
                let config = tables.alarm_configs.get(&a.config_id)?;
                (config.tag_id == tag_id).then(|| (a.clone(), config.clone()))
            })
    }

    pub fn activations(&self) -> Vec<ActivatedAlarm> {
        self.tables
            .read()
            .unwrap()
            .activations
            .values()
            .cloned()
            .collect()
    }

    pub fn activate_alarm(
        &self,
        config_id: AlarmConfigId,
        now: DateTime<Utc>,
    ) -> Result<ActivatedAlarm, StoreError> {
        let activation = {
            let tables = self.tables.read().unwrap();
            if !tables.alarm_configs.contains_key(&config_id) {
                return Err(StoreError::NotFound(format!("alarm config {}", config_id)));
            }
            ActivatedAlarm {
                id: tables.next_id(),
                config_id,
                activated_at: now,
                active: true,
            }
        };
        self.commit(vec![Mutation::PutActivation(activation.clone())])?;
        Ok(activation)
    }

    pub fn deactivate_alarm(&self, id: ActivatedAlarmId) -> Result<(), StoreError> {
        let mut activation = {
            let tables = self.tables.read().unwrap();
            tables
                .activations
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("activation {}", id)))?
        };
        activation.active = false;
        self.commit(vec![Mutation::PutActivation(activation)])
    }

    pub fn set_last_notified(
        &self,
        config_id: AlarmConfigId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut config = self.alarm_config(config_id)?;
        config.last_notified = Some(now);
        self.commit(vec![Mutation::PutAlarmConfig(config)])
    }

    // --- subscriptions and the notification outbox -----------------

    pub fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        if new.email.is_empty() {
            return Err(StoreError::Validation("email must not be empty".into()));
        }
        let subscription = {
            let tables = self.tables.read().unwrap();
            if !tables.alarm_configs.contains_key(&new.config_id) {
                return Err(StoreError::NotFound(format!(
                    "alarm config {}",
                    new.config_id
                )));
            }
            if tables
                .subscriptions
                .values()
                .any(|s| s.config_id == new.config_id && s.email == new.email)
            {
                return Err(StoreError::Conflict(format!(
                    "{} is already subscribed to config {}",
                    new.email, new.config_id
                )));
            }
            Subscription {
                id: tables.next_id(),
                config_id: new.config_id,
                email: new.email,
                email_enabled: new.email_enabled,
                sms_enabled: new.sms_enabled,
            }
        };
        self.commit(vec![Mutation::PutSubscription(subscription.clone())])?;
        Ok(subscription)
    }

    pub fn delete_subscription(&self, id: SubscriptionId) -> Result<(), StoreError> {
        {
            let tables = self.tables.read().unwrap();
            if !tables.subscriptions.contains_key(&id) {
                return Err(StoreError::NotFound(format!("subscription {}", id)));
            }
        }
        self.commit(vec![Mutation::DeleteSubscription(id)])
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.tables
            .read()
            .unwrap()
            .subscriptions
            .values()
            .cloned()
            .collect()
    }

    pub fn subscriptions_for_config(&self, config_id: AlarmConfigId) -> Vec<Subscription> {
        self.tables
            .read()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.config_id == config_id)
            .cloned()
            .collect()
    }

    /// Appends to the delivery outbox (bounded; delivery is external).
    pub fn push_intent(&self, intent: NotificationIntent) -> Result<(), StoreError> {
        self.commit(vec![Mutation::PushIntent(intent)])
    }

    pub fn intents(&self) -> Vec<NotificationIntent> {
        self.tables.read().unwrap().outbox.iter().cloned().collect()
    }

    // --- schedules -------------------------------------------------

    pub fn create_schedule(&self, new: NewSchedule) -> Result<Schedule, StoreError> {
        validate_alias(&new.alias)?;
        validate_time_of_day(new.hour, new.minute)?;
        let schedule = {
            let tables = self.tables.read().unwrap();
            if !tables.tags.contains_key(&new.tag_id) {
                return Err(StoreError::NotFound(format!("tag {}", new.tag_id)));
            }
            if tables.schedules.values().any(|s| s.alias == new.alias) {
                return Err(StoreError::Conflict(format!(
                    "schedule alias {:?} already exists",
                    new.alias
                )));
            }
            Schedule {
                id: tables.next_id(),
                alias: new.alias,
                tag_id: new.tag_id,
                write_value: new.write_value,
                hour: new.hour,
                minute: new.minute,
                days: new.days,
                enabled: new.enabled,
                created_at: Utc::now(),
                last_run: None,
            }
        };
        self.commit(vec![Mutation::PutSchedule(schedule.clone())])?;
        Ok(schedule)
    }

    pub fn update_schedule(
        &self,
        id: ScheduleId,
        patch: ScheduleUpdate,
    ) -> Result<Schedule, StoreError> {
        let mut schedule = self.schedule(id)?;
        if let Some(write_value) = patch.write_value {
            schedule.write_value = write_value;
        }
        if let Some(hour) = patch.hour {
            schedule.hour = hour;
        }
        if let Some(minute) = patch.minute {
            schedule.minute = minute;
        }
        if let Some(days) = patch.days {
            schedule.days = days;
        }
        if let Some(enabled) = patch.enabled {
            schedule.enabled = enabled;
        }
        validate_time_of_day(schedule.hour, schedule.minute)?;
        self.commit(vec![Mutation::PutSchedule(schedule.clone())])?;
        Ok(schedule)
    }

    pub fn delete_schedule(&self, id: ScheduleId) -> Result<(), StoreError> {
        self.schedule(id)?;
        self.commit(vec![Mutation::DeleteSchedule(id)])
    }

    pub fn schedule(&self, id: ScheduleId) -> Result<Schedule, StoreError> {
        self.tables
            .read()
            .unwrap()
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", id)))
    }

    pub fn schedules(&self) -> Vec<Schedule> {
        self.tables.read().unwrap().schedules.values().cloned().collect()
    }

    pub fn enabled_schedules(&self) -> Vec<Schedule> {
        self.tables
            .read()
            .unwrap()
            .schedules
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    pub fn set_schedule_last_run(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut schedule = self.schedule(id)?;
        schedule.last_run = Some(now);
        self.commit(vec![Mutation::PutSchedule(schedule)])
    }

    /// Rewrites a schedule's creation time; only tests need this.
    #[cfg(test)]
    pub(crate) fn backdate_schedule(
        &self,
        id: ScheduleId,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut schedule = self.schedule(id)?;
        schedule.created_at = created_at;
        self.commit(vec![Mutation::PutSchedule(schedule)])
    }

    // --- dashboards ------------------------------------------------

    pub fn create_dashboard(&self, new: NewDashboard) -> Result<Dashboard, StoreError> {
        validate_alias(&new.alias)?;
        let dashboard = {
            let tables = self.tables.read().unwrap();
            if tables.dashboards.values().any(|d| d.alias == new.alias) {
                return Err(StoreError::Conflict(format!(
                    "dashboard alias {:?} already exists",
                    new.alias
                )));
            }
            Dashboard {
                id: tables.next_id(),
                alias: new.alias,
                description: new.description,
                column_count: new.column_count,
            }
        };
        self.commit(vec![Mutation::PutDashboard(dashboard.clone())])?;
        Ok(dashboard)
    }

    pub fn delete_dashboard(&self, id: DashboardId) -> Result<(), StoreError> {
        {
            let tables = self.tables.read().unwrap();
            if !tables.dashboards.contains_key(&id) {
                return Err(StoreError::NotFound(format!("dashboard {}", id)));
            }
        }
        self.commit(vec![Mutation::DeleteDashboard(id)])
    }

    pub fn dashboards(&self) -> Vec<Dashboard> {
        self.tables
            .read()
            .unwrap()
            .dashboards
            .values()
            .cloned()
            .collect()
    }

    pub fn create_widget(&self, new: NewWidget) -> Result<Widget, StoreError> {
        let widget = {
            let tables = self.tables.read().unwrap();
            if !tables.dashboards.contains_key(&new.dashboard_id) {
                return Err(StoreError::NotFound(format!(
                    "dashboard {}",
                    new.dashboard_id
                )));
            }
            if let Some(tag_id) = new.tag_id {
                if !tables.tags.contains_key(&tag_id) {
                    return Err(StoreError::NotFound(format!("tag {}", tag_id)));
                }
            }
            Widget {
                id: tables.next_id(),
                external_id: Uuid::new_v4(),
                dashboard_id: new.dashboard_id,
                widget_type: new.widget_type,
                tag_id: new.tag_id,
                config: new.config,
            }
        };
        self.commit(vec![Mutation::PutWidget(widget.clone())])?;
        Ok(widget)
    }

    pub fn delete_widget(&self, id: WidgetId) -> Result<(), StoreError> {
        {
            let tables = self.tables.read().unwrap();
            if !tables.widgets.contains_key(&id) {
                return Err(StoreError::NotFound(format!("widget {}", id)));
            }
        }
        self.commit(vec![Mutation::DeleteWidget(id)])
    }

    pub fn widgets_for_dashboard(&self, dashboard_id: DashboardId) -> Vec<Widget> {
        self.tables
            .read()
            .unwrap()
            .widgets
            .values()
            .filter(|w| w.dashboard_id == dashboard_id)
            .cloned()
            .collect()
    }

    // --- cleanup ---------------------------------------------------

    /// Deletes history older than each tag's retention. Returns the count.
    pub fn prune_history(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut mutations = Vec::new();
        let mut removed = 0usize;
        {
            let tables = self.tables.read().unwrap();
            for tag in tables.tags.values() {
                if tag.history_retention.is_zero() {
                    continue;
                }
                let Ok(retention) = chrono::Duration::from_std(tag.history_retention) else {
                    continue;
                };
                let cutoff = now - retention;
                let stale = tables
                    .history
                    .get(&tag.id)
                    .map_or(0, |entries| {
                        entries.iter().take_while(|e| e.timestamp < cutoff).count()
                    });
                if stale > 0 {
                    removed += stale;
                    mutations.push(Mutation::PruneHistory(tag.id, cutoff));
                }
            }
        }
        self.commit(mutations)?;
        Ok(removed)
    }

    /// Deletes processed write requests, optionally only those enqueued
    /// before `older_than`.
    pub fn delete_processed_writes(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<usize, StoreError> {
        let ids: Vec<WriteRequestId> = {
            let tables = self.tables.read().unwrap();
            tables
                .writes
                .values()
                .filter(|w| w.processed)
                .filter(|w| older_than.is_none_or(|t| w.enqueued_at < t))
                .map(|w| w.id)
                .collect()
        };
        let count = ids.len();
        self.commit(ids.into_iter().map(Mutation::DeleteWrite).collect())?;
        Ok(count)
    }

    /// Deletes inactive activations, optionally only old ones.
    pub fn delete_inactive_alarms(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<usize, StoreError> {
        let ids: Vec<ActivatedAlarmId> = {
            let tables = self.tables.read().unwrap();
            tables
                .activations
                .values()
                .filter(|a| !a.active)
                .filter(|a| older_than.is_none_or(|t| a.activated_at < t))
                .map(|a| a.id)
                .collect()
        };
        let count = ids.len();
        self.commit(ids.into_iter().map(Mutation::DeleteActivation).collect())?;
        Ok(count)
    }
}

fn validate_alias(alias: &str) -> Result<(), StoreError> {
    if alias.is_empty() {
        return Err(StoreError::Validation("alias must not be empty".into()));
    }
    if alias.len() > 100 {
        return Err(StoreError::Validation("alias too long (max 100)".into()));
    }
    Ok(())
}

fn validate_tag_fields(new: &NewTag) -> Result<(), StoreError> {
    validate_alias(&new.alias)?;
    if new.read_amount == 0 {
        return Err(StoreError::Validation("read_amount must be at least 1".into()));
    }
    Ok(())
}

fn validate_time_of_day(hour: u8, minute: u8) -> Result<(), StoreError> {
    if hour > 23 || minute > 59 {
        return Err(StoreError::Validation(format!(
            "bad time of day {:02}:{:02}",
            hour, minute
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_device(alias: &str) -> NewDevice {
        NewDevice {
            alias: alias.into(),
            host: "127.0.0.1".into(),
            port: 502,
            protocol: Protocol::Tcp,
            word_order: WordOrder::Big,
            active: true,
        }
    }

    fn new_tag(device_id: DeviceId, channel: Channel, address: u16) -> NewTag {
        NewTag {
            device_id,
            alias: format!("tag-{}", address),
            description: String::new(),
            channel,
            data_type: DataType::Int16,
            address,
            unit_id: 1,
            read_amount: 1,
            history_interval: Duration::from_secs(1),
            history_retention: Duration::from_secs(60),
            active: true,
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(dir.path()).unwrap()
    }

    #[test]
    fn device_alias_is_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.create_device(new_device("plc-1")).unwrap();
        let err = store.create_device(new_device("plc-1")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn tag_placement_is_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        store
            .create_tag(new_tag(device.id, Channel::HoldingRegister, 0))
            .unwrap();
        let err = store
            .create_tag(new_tag(device.id, Channel::HoldingRegister, 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same address on another channel is a different placement.
        store.create_tag(new_tag(device.id, Channel::Coil, 0)).unwrap();
    }

    #[test]
    fn write_to_read_only_channel_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        let di = store
            .create_tag(new_tag(device.id, Channel::DiscreteInput, 0))
            .unwrap();
        let ir = store
            .create_tag(new_tag(device.id, Channel::InputRegister, 0))
            .unwrap();

        let now = Utc::now();
        assert_eq!(
            store.enqueue_write(di.id, Value::Bool(true), now).unwrap_err(),
            StoreError::NotWritable
        );
        assert_eq!(
            store.enqueue_write(ir.id, Value::I64(1), now).unwrap_err(),
            StoreError::NotWritable
        );
        assert!(matches!(
            store.enqueue_write(9999, Value::I64(1), now).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn pending_writes_are_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        let tag = store
            .create_tag(new_tag(device.id, Channel::HoldingRegister, 0))
            .unwrap();

        let now = Utc::now();
        let first = store.enqueue_write(tag.id, Value::I64(1), now).unwrap();
        let second = store.enqueue_write(tag.id, Value::I64(2), now).unwrap();

        let pending = store.pending_writes_for_device(device.id);
        assert_eq!(
            pending.iter().map(|w| w.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        store.mark_write_processed(first.id, None).unwrap();
        let pending = store.pending_writes_for_device(device.id);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[test]
    fn poll_commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tag_id;
        {
            let store = open_store(&dir);
            let device = store.create_device(new_device("plc-1")).unwrap();
            let tag = store
                .create_tag(new_tag(device.id, Channel::HoldingRegister, 3))
                .unwrap();
            tag_id = tag.id;
            store
                .commit_poll(tag.id, Value::I64(42), Utc::now())
                .unwrap();
        }
        let store = open_store(&dir);
        let tag = store.tag(tag_id).unwrap();
        assert_eq!(tag.current_value, Some(Value::I64(42)));
        assert!(tag.last_updated.is_some());
    }

    #[test]
    fn flush_compacts_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir);
            let device = store.create_device(new_device("plc-1")).unwrap();
            store
                .create_tag(new_tag(device.id, Channel::HoldingRegister, 1))
                .unwrap();
            store.flush().unwrap();
        }
        assert!(dir.path().join("state.bin").exists());
        let store = open_store(&dir);
        assert_eq!(store.devices().len(), 1);
        assert_eq!(store.tags().len(), 1);
    }

    #[test]
    fn device_delete_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        let tag = store
            .create_tag(new_tag(device.id, Channel::HoldingRegister, 0))
            .unwrap();
        let config = store
            .create_alarm_config(NewAlarmConfig {
                tag_id: tag.id,
                alias: "a".into(),
                trigger_value: Value::I64(1),
                operator: Operator::Equals,
                threat_level: ThreatLevel::Low,
                message: "m".into(),
                enabled: true,
                notification_cooldown: Duration::from_secs(60),
            })
            .unwrap();
        store.activate_alarm(config.id, Utc::now()).unwrap();
        store
            .enqueue_write(tag.id, Value::I64(5), Utc::now())
            .unwrap();

        store.delete_device(device.id).unwrap();
        assert!(store.tags().is_empty());
        assert!(store.alarm_configs().is_empty());
        assert!(store.activations().is_empty());
        assert!(store.write_requests().is_empty());
    }

    #[test]
    fn history_prune_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        let mut fields = new_tag(device.id, Channel::HoldingRegister, 0);
        fields.history_retention = Duration::from_secs(30);
        let tag = store.create_tag(fields).unwrap();

        let now = Utc::now();
        let samples: Vec<(TagId, HistoryEntry)> = (0..12)
            .map(|i| {
                (
                    tag.id,
                    HistoryEntry {
                        timestamp: now - chrono::Duration::seconds(55 - i * 5),
                        value: Value::I64(i),
                    },
                )
            })
            .collect();
        store.record_history(samples).unwrap();
        assert_eq!(store.history_len(tag.id), 12);

        let removed = store.prune_history(now).unwrap();
        assert!(removed > 0);
        let cutoff = now - chrono::Duration::seconds(30);
        let remaining = store.history_window(tag.id, now - chrono::Duration::days(1));
        assert!(remaining.iter().all(|e| e.timestamp >= cutoff));
        assert!(remaining.len() <= 7);
    }

    #[test]
    fn cleanup_deletes_processed_writes_and_inactive_alarms() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        let tag = store
            .create_tag(new_tag(device.id, Channel::HoldingRegister, 0))
            .unwrap();
        let now = Utc::now();

        let w1 = store.enqueue_write(tag.id, Value::I64(1), now).unwrap();
        store.enqueue_write(tag.id, Value::I64(2), now).unwrap();
        store.mark_write_processed(w1.id, None).unwrap();
        assert_eq!(store.delete_processed_writes(None).unwrap(), 1);
        assert_eq!(store.write_requests().len(), 1);

        let config = store
            .create_alarm_config(NewAlarmConfig {
                tag_id: tag.id,
                alias: "a".into(),
                trigger_value: Value::I64(1),
                operator: Operator::Equals,
                threat_level: ThreatLevel::Low,
                message: "m".into(),
                enabled: true,
                notification_cooldown: Duration::from_secs(60),
            })
            .unwrap();
        let activation = store.activate_alarm(config.id, now).unwrap();
        assert_eq!(store.delete_inactive_alarms(None).unwrap(), 0);
        store.deactivate_alarm(activation.id).unwrap();
        assert_eq!(store.delete_inactive_alarms(None).unwrap(), 1);
        assert!(store.activations().is_empty());
    }

    #[test]
    fn upserts_key_on_natural_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.upsert_device(new_device("plc-1")).unwrap();
        let mut changed = new_device("plc-1");
        changed.port = 1502;
        let same = store.upsert_device(changed).unwrap();
        assert_eq!(device.id, same.id);
        assert_eq!(same.port, 1502);
        assert_eq!(store.devices().len(), 1);

        let fields = new_tag(device.id, Channel::HoldingRegister, 9);
        let tag = store.upsert_tag(fields.clone()).unwrap();
        let mut renamed = fields;
        renamed.alias = "renamed".into();
        let same_tag = store.upsert_tag(renamed).unwrap();
        assert_eq!(tag.id, same_tag.id);
        assert_eq!(same_tag.alias, "renamed");
        assert_eq!(same_tag.external_id, tag.external_id);
    }

    #[test]
    fn schedule_time_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let device = store.create_device(new_device("plc-1")).unwrap();
        let tag = store
            .create_tag(new_tag(device.id, Channel::Coil, 0))
            .unwrap();
        let err = store
            .create_schedule(NewSchedule {
                alias: "bad".into(),
                tag_id: tag.id,
                write_value: Value::Bool(true),
                hour: 24,
                minute: 0,
                days: [true; 7],
                enabled: true,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
