//! JSON response shapes for the HTTP API.
//!
//! Durations are exposed as whole seconds, timestamps as RFC 3339, tag
//! values as plain JSON scalars or arrays. `age_ms` is a number, or the
//! string `"Infinity"` for a tag that has never been read.

use crate::model::{
    AlarmConfig, Dashboard, Device, Schedule, Subscription, Tag, Widget, WriteRequest,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::convert::value_to_json;

/// `GET /api/tags/{id}/value` and each entry of `POST /api/values`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TagValuePayload {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    pub time: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub age_ms: serde_json::Value,
    pub alarm: Option<AlarmPayload>,
}

/// The active alarm attached to a value response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AlarmPayload {
    pub message: String,
    pub threat_level: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

/// `GET /api/tags/{id}/history` — oldest entry first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryPayload {
    pub history: Vec<HistoryPoint>,
}

// ============================================================
// Entity serializers for the CRUD routes
// ============================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DevicePayload {
    pub id: u32,
    pub alias: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub word_order: String,
    pub active: bool,
}

impl From<&Device> for DevicePayload {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id,
            alias: device.alias.clone(),
            host: device.host.clone(),
            port: device.port,
            protocol: device.protocol.as_str().to_string(),
            word_order: match device.word_order {
                crate::model::WordOrder::Big => "big".to_string(),
                crate::model::WordOrder::Little => "little".to_string(),
            },
            active: device.active,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TagPayload {
    pub id: Uuid,
    pub alias: String,
    pub description: String,
    pub device: String,
    pub channel: String,
    pub data_type: String,
    pub address: u16,
    pub unit_id: u8,
    pub read_amount: u16,
    pub history_interval: u64,
    pub history_retention: u64,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    pub last_updated: Option<DateTime<Utc>>,
    pub active: bool,
}

impl TagPayload {
    pub fn new(tag: &Tag, device_alias: &str) -> Self {
        Self {
            id: tag.external_id,
            alias: tag.alias.clone(),
            description: tag.description.clone(),
            device: device_alias.to_string(),
            channel: tag.channel.as_str().to_string(),
            data_type: tag.data_type.as_str().to_string(),
            address: tag.address,
            unit_id: tag.unit_id,
            read_amount: tag.read_amount,
            history_interval: tag.history_interval.as_secs(),
            history_retention: tag.history_retention.as_secs(),
            value: tag
                .current_value
                .as_ref()
                .map_or(serde_json::Value::Null, value_to_json),
            last_updated: tag.last_updated,
            active: tag.active,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AlarmConfigPayload {
    pub id: u32,
    pub alias: String,
    pub tag: Uuid,
    #[schema(value_type = Object)]
    pub trigger_value: serde_json::Value,
    pub operator: String,
    pub threat_level: String,
    pub message: String,
    pub enabled: bool,
    pub notification_cooldown: u64,
    pub last_notified: Option<DateTime<Utc>>,
}

impl AlarmConfigPayload {
    pub fn new(config: &AlarmConfig, tag_external: Uuid) -> Self {
        Self {
            id: config.id,
            alias: config.alias.clone(),
            tag: tag_external,
            trigger_value: value_to_json(&config.trigger_value),
            operator: match config.operator {
                crate::model::Operator::Equals => "equals".to_string(),
                crate::model::Operator::GreaterThan => "greater_than".to_string(),
                crate::model::Operator::LessThan => "less_than".to_string(),
            },
            threat_level: config.threat_level.as_str().to_string(),
            message: config.message.clone(),
            enabled: config.enabled,
            notification_cooldown: config.notification_cooldown.as_secs(),
            last_notified: config.last_notified,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionPayload {
    pub id: u32,
    pub config_id: u32,
    pub email: String,
    pub email_enabled: bool,
    pub sms_enabled: bool,
}

impl From<&Subscription> for SubscriptionPayload {
    fn from(subscription: &Subscription) -> Self {
        Self {
            id: subscription.id,
            config_id: subscription.config_id,
            email: subscription.email.clone(),
            email_enabled: subscription.email_enabled,
            sms_enabled: subscription.sms_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulePayload {
    pub id: u32,
    pub alias: String,
    pub tag: Uuid,
    #[schema(value_type = Object)]
    pub write_value: serde_json::Value,
    pub time: String,
    pub days: [bool; 7],
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl SchedulePayload {
    pub fn new(schedule: &Schedule, tag_external: Uuid) -> Self {
        Self {
            id: schedule.id,
            alias: schedule.alias.clone(),
            tag: tag_external,
            write_value: value_to_json(&schedule.write_value),
            time: format!("{:02}:{:02}", schedule.hour, schedule.minute),
            days: schedule.days,
            enabled: schedule.enabled,
            created_at: schedule.created_at,
            last_run: schedule.last_run,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WriteRequestPayload {
    pub id: u32,
    pub tag: Uuid,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub processed: bool,
    pub error: Option<String>,
}

impl WriteRequestPayload {
    pub fn new(request: &WriteRequest, tag_external: Uuid) -> Self {
        Self {
            id: request.id,
            tag: tag_external,
            value: value_to_json(&request.value),
            enqueued_at: request.enqueued_at,
            processed: request.processed,
            error: request.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardPayload {
    pub id: u32,
    pub alias: String,
    pub description: String,
    pub column_count: u16,
}

impl From<&Dashboard> for DashboardPayload {
    fn from(dashboard: &Dashboard) -> Self {
        Self {
            id: dashboard.id,
            alias: dashboard.alias.clone(),
            description: dashboard.description.clone(),
            column_count: dashboard.column_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WidgetPayload {
    pub id: Uuid,
    pub dashboard_id: u32,
    pub widget_type: String,
    pub tag: Option<Uuid>,
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
}

impl WidgetPayload {
    pub fn new(widget: &Widget, tag_external: Option<Uuid>) -> Self {
        Self {
            id: widget.external_id,
            dashboard_id: widget.dashboard_id,
            widget_type: widget.widget_type.clone(),
            tag: tag_external,
            config: serde_json::from_str(&widget.config)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}
