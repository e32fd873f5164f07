//! Domain model — devices, tags, and everything hanging off a tag.
//!
//! These are plain data records; persistence and constraint checks live in
//! `store`, polling behavior in `engine`. External consumers address tags
//! and widgets by UUID, internal relations use dense ids.

mod value;

pub use value::Value;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub type DeviceId = u32;
pub type TagId = u32;
pub type WriteRequestId = u32;
pub type AlarmConfigId = u32;
pub type ActivatedAlarmId = u32;
pub type SubscriptionId = u32;
pub type ScheduleId = u32;
pub type DashboardId = u32;
pub type WidgetId = u32;

// ============================================================
// Device
// ============================================================

/// Wire protocol used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Rtu,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Rtu => "rtu",
        }
    }
}

/// Register order for values spanning multiple 16-bit registers.
/// Big = high word first. Byte order within a register is always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    Big,
    Little,
}

/// A single PLC reachable over Modbus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Unique slug, also the session key.
    pub alias: String,
    /// Host/IP for tcp and udp, serial device path for rtu.
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub word_order: WordOrder,
    pub active: bool,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.alias, self.host, self.port)
    }
}

// ============================================================
// Tag
// ============================================================

/// Modbus address space a tag lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl Channel {
    /// Coils and discrete inputs carry bits; the register channels carry
    /// 16-bit words.
    pub fn is_bit(&self) -> bool {
        matches!(self, Channel::Coil | Channel::DiscreteInput)
    }

    /// Discrete inputs and input registers are read-only on the wire.
    pub fn is_writable(&self) -> bool {
        matches!(self, Channel::Coil | Channel::HoldingRegister)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Coil => "coil",
            Channel::DiscreteInput => "discrete_input",
            Channel::HoldingRegister => "holding_register",
            Channel::InputRegister => "input_register",
        }
    }
}

/// Decoded representation of a tag's raw registers or bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    String,
}

impl DataType {
    /// Registers (or coils) occupied by one value of this type.
    pub fn width(&self) -> u16 {
        match self {
            DataType::Bool | DataType::Int16 | DataType::Uint16 => 1,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 2,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 4,
            // Strings are sized by read_amount (characters), not per value.
            DataType::String => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
        }
    }
}

/// A portion of data read from (and possibly written to) a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    /// Stable identifier handed to external consumers.
    pub external_id: Uuid,
    pub device_id: DeviceId,
    pub alias: String,
    pub description: String,
    pub channel: Channel,
    pub data_type: DataType,
    pub address: u16,
    pub unit_id: u8,
    /// Number of values (characters for strings) read per poll.
    pub read_amount: u16,
    /// Minimum spacing between history entries.
    pub history_interval: Duration,
    /// How long history is kept. Zero disables history entirely.
    pub history_retention: Duration,
    pub current_value: Option<Value>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_history_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Tag {
    /// Number of registers (or coils) requested in one read.
    pub fn read_count(&self) -> u16 {
        match self.data_type {
            DataType::String => self.read_amount.div_ceil(2),
            other => other.width() * self.read_amount,
        }
    }

    /// The `(device, channel, address, unit_id)` uniqueness key.
    pub fn placement(&self) -> (DeviceId, Channel, u16, u8) {
        (self.device_id, self.channel, self.address, self.unit_id)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}:{}]", self.alias, self.channel.as_str(), self.address)
    }
}

// ============================================================
// Write requests
// ============================================================

/// A value waiting to be written on the next poll of its device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub id: WriteRequestId,
    pub tag_id: TagId,
    pub value: Value,
    pub enqueued_at: DateTime<Utc>,
    pub processed: bool,
    /// Set when the drain gave up on the request (encode/validation error).
    pub error: Option<String>,
}

// ============================================================
// Alarms
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    High,
    Critical,
}

impl ThreatLevel {
    /// Numeric priority; higher wins when several configs trigger at once.
    pub fn priority(&self) -> u8 {
        match self {
            ThreatLevel::Low => 1,
            ThreatLevel::High => 2,
            ThreatLevel::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    GreaterThan,
    LessThan,
}

/// Maps a tag value condition to a human-readable alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub id: AlarmConfigId,
    pub tag_id: TagId,
    /// Unique per tag.
    pub alias: String,
    pub trigger_value: Value,
    pub operator: Operator,
    pub threat_level: ThreatLevel,
    pub message: String,
    pub enabled: bool,
    pub notification_cooldown: Duration,
    pub last_notified: Option<DateTime<Utc>>,
}

impl AlarmConfig {
    /// Whether `value` satisfies this config's predicate.
    ///
    /// Comparisons that make no sense across variants are not activations.
    pub fn is_activation(&self, value: &Value) -> bool {
        match self.operator {
            Operator::Equals => value.loose_eq(&self.trigger_value),
            Operator::GreaterThan => {
                value.loose_cmp(&self.trigger_value) == Some(Ordering::Greater)
            }
            Operator::LessThan => value.loose_cmp(&self.trigger_value) == Some(Ordering::Less),
        }
    }
}

/// An alarm that was (or still is) in the activated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedAlarm {
    pub id: ActivatedAlarmId,
    pub config_id: AlarmConfigId,
    pub activated_at: DateTime<Utc>,
    pub active: bool,
}

/// A recipient wishing to hear about activations of one alarm config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub config_id: AlarmConfigId,
    pub email: String,
    pub email_enabled: bool,
    pub sms_enabled: bool,
}

/// A pending notification handed to the (external) delivery agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub config_id: AlarmConfigId,
    pub tag_id: TagId,
    pub message: String,
    pub threat_level: ThreatLevel,
    pub recipients: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// Schedules
// ============================================================

/// A time-of-day write, repeated on selected weekdays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub alias: String,
    pub tag_id: TagId,
    pub write_value: Value,
    pub hour: u8,
    pub minute: u8,
    /// Monday-first weekday flags.
    pub days: [bool; 7],
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

// ============================================================
// History
// ============================================================

/// One sampled value; the owning tag is the store's index key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

// ============================================================
// Dashboards (opaque to the core — stored, never interpreted)
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: DashboardId,
    pub alias: String,
    pub description: String,
    pub column_count: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    pub external_id: Uuid,
    pub dashboard_id: DashboardId,
    pub widget_type: String,
    pub tag_id: Option<TagId>,
    /// Opaque JSON text; layout and rendering belong to the front end.
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_with(data_type: DataType, read_amount: u16) -> Tag {
        Tag {
            id: 1,
            external_id: Uuid::new_v4(),
            device_id: 1,
            alias: "t".into(),
            description: String::new(),
            channel: Channel::HoldingRegister,
            data_type,
            address: 0,
            unit_id: 1,
            read_amount,
            history_interval: Duration::from_secs(1),
            history_retention: Duration::ZERO,
            current_value: None,
            last_updated: None,
            last_history_at: None,
            active: true,
        }
    }

    #[test]
    fn read_count_scales_with_width() {
        assert_eq!(tag_with(DataType::Int16, 3).read_count(), 3);
        assert_eq!(tag_with(DataType::Float32, 2).read_count(), 4);
        assert_eq!(tag_with(DataType::Uint64, 1).read_count(), 4);
    }

    #[test]
    fn string_read_count_is_ceiling_of_half() {
        assert_eq!(tag_with(DataType::String, 5).read_count(), 3);
        assert_eq!(tag_with(DataType::String, 4).read_count(), 2);
        assert_eq!(tag_with(DataType::String, 1).read_count(), 1);
    }

    #[test]
    fn alarm_predicates() {
        let mut config = AlarmConfig {
            id: 1,
            tag_id: 1,
            alias: "high-temp".into(),
            trigger_value: Value::I64(40),
            operator: Operator::GreaterThan,
            threat_level: ThreatLevel::High,
            message: "too hot".into(),
            enabled: true,
            notification_cooldown: Duration::from_secs(60),
            last_notified: None,
        };
        assert!(config.is_activation(&Value::I64(41)));
        assert!(config.is_activation(&Value::F64(40.5)));
        assert!(!config.is_activation(&Value::I64(40)));
        // Cross-type comparison never activates.
        assert!(!config.is_activation(&Value::Str("41".into())));

        config.operator = Operator::Equals;
        assert!(config.is_activation(&Value::F64(40.0)));
    }
}
