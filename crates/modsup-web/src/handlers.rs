//! HTTP request handlers for the supervisor API.
//!
//! Read endpoints serve from the tag cache and store; write and CRUD
//! endpoints validate through the store and answer with the entity's
//! serialized form. Error bodies are `{"error": "<message>"}` with the
//! mapped status code.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use modsup_core::api::convert::{
    batch_value_payloads, history_payload, tag_value_payload, value_from_json,
};
use modsup_core::api::schema::{
    AlarmConfigPayload, DashboardPayload, DevicePayload, HistoryPayload, SchedulePayload,
    SubscriptionPayload, TagPayload, TagValuePayload, WidgetPayload, WriteRequestPayload,
};
use modsup_core::api::ApiError;
use modsup_core::model::{Channel, DataType, Protocol, Tag, WordOrder};
use modsup_core::store::{
    AlarmConfigUpdate, DeviceUpdate, NewAlarmConfig, NewDashboard, NewDevice, NewSchedule,
    NewSubscription, NewTag, NewWidget, ScheduleUpdate, StoreError, TagUpdate,
};

use crate::state::AppState;

// ============================================================
// Error mapping
// ============================================================

pub(crate) struct HttpError(ApiError);

impl From<ApiError> for HttpError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        Self(ApiError::from(err))
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, HttpError>;

/// Write and mutating CRUD routes require the configured bearer token.
fn authorize_write(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(expected) = &state.write_token else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("You do not have permission to perform this action".into())
            .into())
    }
}

fn find_tag(state: &AppState, external_id: Uuid) -> Result<Tag, HttpError> {
    state
        .store
        .tag_by_external(external_id)
        .ok_or_else(|| ApiError::NotFound(format!("tag {}", external_id)).into())
}

// ============================================================
// Health
// ============================================================

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is healthy", body = String))
)]
pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Tag values and history
// ============================================================

#[utoipa::path(
    get,
    path = "/api/tags/{external_id}/value",
    params(("external_id" = Uuid, Path, description = "Tag UUID")),
    responses(
        (status = 200, description = "Current value with age and active alarm", body = TagValuePayload),
        (status = 404, description = "Unknown tag")
    )
)]
pub(crate) async fn handle_tag_value(
    State(state): State<AppState>,
    Path(external_id): Path<Uuid>,
) -> ApiResult<Json<TagValuePayload>> {
    let tag = find_tag(&state, external_id)?;
    Ok(Json(tag_value_payload(
        &state.store,
        &state.cache,
        &tag,
        Utc::now(),
    )))
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct BatchValuesBody {
    #[serde(default)]
    tag_ids: Vec<Uuid>,
}

#[utoipa::path(
    post,
    path = "/api/values",
    responses(
        (status = 200, description = "Value payloads keyed by tag UUID"),
        (status = 400, description = "No tags specified"),
        (status = 404, description = "No requested tag exists")
    )
)]
pub(crate) async fn handle_batch_values(
    State(state): State<AppState>,
    Json(body): Json<BatchValuesBody>,
) -> ApiResult<Json<BTreeMap<String, TagValuePayload>>> {
    let values = batch_value_payloads(&state.store, &state.cache, &body.tag_ids, Utc::now())?;
    Ok(Json(values))
}

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    /// Window length looking back from now. Default one minute.
    #[serde(default = "default_history_seconds")]
    seconds: i64,
}

fn default_history_seconds() -> i64 {
    60
}

#[utoipa::path(
    get,
    path = "/api/tags/{external_id}/history",
    params(
        ("external_id" = Uuid, Path, description = "Tag UUID"),
        ("seconds" = i64, Query, description = "Window length, default 60")
    ),
    responses(
        (status = 200, description = "History entries, oldest first", body = HistoryPayload),
        (status = 404, description = "Unknown tag")
    )
)]
pub(crate) async fn handle_tag_history(
    State(state): State<AppState>,
    Path(external_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryPayload>> {
    let tag = find_tag(&state, external_id)?;
    Ok(Json(history_payload(
        &state.store,
        &tag,
        query.seconds,
        Utc::now(),
    )))
}

// ============================================================
// Writes
// ============================================================

#[derive(Deserialize, ToSchema)]
pub(crate) struct WriteBody {
    value: Option<serde_json::Value>,
}

#[utoipa::path(
    post,
    path = "/api/tags/{external_id}/write",
    params(("external_id" = Uuid, Path, description = "Tag UUID")),
    responses(
        (status = 200, description = "Write queued"),
        (status = 400, description = "Missing value or read-only tag"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Unknown tag")
    )
)]
pub(crate) async fn handle_tag_write(
    State(state): State<AppState>,
    Path(external_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<WriteBody>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize_write(&state, &headers)?;
    let tag = find_tag(&state, external_id)?;

    let Some(raw) = body.value else {
        return Err(ApiError::BadRequest("No value supplied".into()).into());
    };
    let value = value_from_json(&raw)?;
    state.store.enqueue_write(tag.id, value, Utc::now())?;
    info!("Queued write for {}", tag.alias);
    Ok(Json(serde_json::json!({ "status": "queued" })))
}

pub(crate) async fn handle_write_requests(
    State(state): State<AppState>,
) -> Json<Vec<WriteRequestPayload>> {
    let store = &state.store;
    let payloads = store
        .write_requests()
        .iter()
        .map(|request| {
            let tag_external = store
                .tag(request.tag_id)
                .map(|t| t.external_id)
                .unwrap_or_default();
            WriteRequestPayload::new(request, tag_external)
        })
        .collect();
    Json(payloads)
}

// ============================================================
// Device CRUD
// ============================================================

#[derive(Deserialize)]
pub(crate) struct DeviceBody {
    alias: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_protocol")]
    protocol: Protocol,
    #[serde(default = "default_word_order")]
    word_order: WordOrder,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    502
}
fn default_protocol() -> Protocol {
    Protocol::Tcp
}
fn default_word_order() -> WordOrder {
    WordOrder::Big
}
fn default_true() -> bool {
    true
}

pub(crate) async fn handle_devices_list(State(state): State<AppState>) -> Json<Vec<DevicePayload>> {
    Json(state.store.devices().iter().map(DevicePayload::from).collect())
}

pub(crate) async fn handle_device_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DeviceBody>,
) -> ApiResult<Json<DevicePayload>> {
    authorize_write(&state, &headers)?;
    let device = state.store.create_device(NewDevice {
        alias: body.alias,
        host: body.host,
        port: body.port,
        protocol: body.protocol,
        word_order: body.word_order,
        active: body.active,
    })?;
    Ok(Json(DevicePayload::from(&device)))
}

fn device_by_alias(state: &AppState, alias: &str) -> Result<modsup_core::model::Device, HttpError> {
    state
        .store
        .device_by_alias(alias)
        .ok_or_else(|| ApiError::NotFound(format!("device {:?}", alias)).into())
}

pub(crate) async fn handle_device_get(
    State(state): State<AppState>,
    Path(alias): Path<String>,
) -> ApiResult<Json<DevicePayload>> {
    let device = device_by_alias(&state, &alias)?;
    Ok(Json(DevicePayload::from(&device)))
}

pub(crate) async fn handle_device_update(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<DeviceUpdate>,
) -> ApiResult<Json<DevicePayload>> {
    authorize_write(&state, &headers)?;
    let device = device_by_alias(&state, &alias)?;
    let updated = state.store.update_device(device.id, patch)?;
    Ok(Json(DevicePayload::from(&updated)))
}

pub(crate) async fn handle_device_delete(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    let device = device_by_alias(&state, &alias)?;
    state.store.delete_device(device.id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Tag CRUD
// ============================================================

#[derive(Deserialize)]
pub(crate) struct TagBody {
    device: String,
    alias: String,
    #[serde(default)]
    description: String,
    channel: Channel,
    data_type: DataType,
    #[serde(default)]
    address: u16,
    #[serde(default = "default_unit_id")]
    unit_id: u8,
    #[serde(default = "default_read_amount")]
    read_amount: u16,
    /// Seconds; zero keeps every sample interval apart.
    #[serde(default = "default_interval_secs")]
    history_interval: u64,
    /// Seconds; zero disables history.
    #[serde(default)]
    history_retention: u64,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_unit_id() -> u8 {
    1
}
fn default_read_amount() -> u16 {
    1
}
fn default_interval_secs() -> u64 {
    1
}

fn tag_payload(state: &AppState, tag: &Tag) -> TagPayload {
    let device_alias = state
        .store
        .device(tag.device_id)
        .map(|d| d.alias)
        .unwrap_or_default();
    TagPayload::new(tag, &device_alias)
}

pub(crate) async fn handle_tags_list(State(state): State<AppState>) -> Json<Vec<TagPayload>> {
    let payloads = state
        .store
        .tags()
        .iter()
        .map(|tag| tag_payload(&state, tag))
        .collect();
    Json(payloads)
}

pub(crate) async fn handle_tag_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TagBody>,
) -> ApiResult<Json<TagPayload>> {
    authorize_write(&state, &headers)?;
    let device = device_by_alias(&state, &body.device)?;
    let tag = state.store.create_tag(NewTag {
        device_id: device.id,
        alias: body.alias,
        description: body.description,
        channel: body.channel,
        data_type: body.data_type,
        address: body.address,
        unit_id: body.unit_id,
        read_amount: body.read_amount,
        history_interval: Duration::from_secs(body.history_interval),
        history_retention: Duration::from_secs(body.history_retention),
        active: body.active,
    })?;
    Ok(Json(TagPayload::new(&tag, &device.alias)))
}

pub(crate) async fn handle_tag_get(
    State(state): State<AppState>,
    Path(external_id): Path<Uuid>,
) -> ApiResult<Json<TagPayload>> {
    let tag = find_tag(&state, external_id)?;
    Ok(Json(tag_payload(&state, &tag)))
}

#[derive(Deserialize)]
pub(crate) struct TagPatchBody {
    alias: Option<String>,
    description: Option<String>,
    history_interval: Option<u64>,
    history_retention: Option<u64>,
    active: Option<bool>,
}

pub(crate) async fn handle_tag_update(
    State(state): State<AppState>,
    Path(external_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<TagPatchBody>,
) -> ApiResult<Json<TagPayload>> {
    authorize_write(&state, &headers)?;
    let tag = find_tag(&state, external_id)?;
    let updated = state.store.update_tag(
        tag.id,
        TagUpdate {
            alias: body.alias,
            description: body.description,
            history_interval: body.history_interval.map(Duration::from_secs),
            history_retention: body.history_retention.map(Duration::from_secs),
            active: body.active,
        },
    )?;
    Ok(Json(tag_payload(&state, &updated)))
}

pub(crate) async fn handle_tag_delete(
    State(state): State<AppState>,
    Path(external_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    let tag = find_tag(&state, external_id)?;
    state.store.delete_tag(tag.id)?;
    state.cache.remove(tag.id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Alarm CRUD
// ============================================================

#[derive(Deserialize)]
pub(crate) struct AlarmBody {
    tag: Uuid,
    alias: String,
    trigger_value: serde_json::Value,
    #[serde(default = "default_operator")]
    operator: modsup_core::model::Operator,
    threat_level: modsup_core::model::ThreatLevel,
    #[serde(default)]
    message: String,
    #[serde(default = "default_true")]
    enabled: bool,
    /// Seconds between notification emissions. Default one minute.
    #[serde(default = "default_cooldown_secs")]
    notification_cooldown: u64,
}

fn default_operator() -> modsup_core::model::Operator {
    modsup_core::model::Operator::Equals
}
fn default_cooldown_secs() -> u64 {
    60
}

pub(crate) async fn handle_alarms_list(
    State(state): State<AppState>,
) -> Json<Vec<AlarmConfigPayload>> {
    let store = &state.store;
    let payloads = store
        .alarm_configs()
        .iter()
        .map(|config| {
            let tag_external = store
                .tag(config.tag_id)
                .map(|t| t.external_id)
                .unwrap_or_default();
            AlarmConfigPayload::new(config, tag_external)
        })
        .collect();
    Json(payloads)
}

pub(crate) async fn handle_alarm_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AlarmBody>,
) -> ApiResult<Json<AlarmConfigPayload>> {
    authorize_write(&state, &headers)?;
    let tag = find_tag(&state, body.tag)?;
    let trigger_value = value_from_json(&body.trigger_value)?;
    let config = state.store.create_alarm_config(NewAlarmConfig {
        tag_id: tag.id,
        alias: body.alias,
        trigger_value,
        operator: body.operator,
        threat_level: body.threat_level,
        message: body.message,
        enabled: body.enabled,
        notification_cooldown: Duration::from_secs(body.notification_cooldown),
    })?;
    Ok(Json(AlarmConfigPayload::new(&config, tag.external_id)))
}

#[derive(Deserialize)]
pub(crate) struct AlarmPatchBody {
    trigger_value: Option<serde_json::Value>,
    operator: Option<modsup_core::model::Operator>,
    threat_level: Option<modsup_core::model::ThreatLevel>,
    message: Option<String>,
    enabled: Option<bool>,
    notification_cooldown: Option<u64>,
}

pub(crate) async fn handle_alarm_update(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(body): Json<AlarmPatchBody>,
) -> ApiResult<Json<AlarmConfigPayload>> {
    authorize_write(&state, &headers)?;
    let trigger_value = match &body.trigger_value {
        Some(raw) => Some(value_from_json(raw)?),
        None => None,
    };
    let config = state.store.update_alarm_config(
        id,
        AlarmConfigUpdate {
            trigger_value,
            operator: body.operator,
            threat_level: body.threat_level,
            message: body.message,
            enabled: body.enabled,
            notification_cooldown: body.notification_cooldown.map(Duration::from_secs),
        },
    )?;
    let tag_external = state
        .store
        .tag(config.tag_id)
        .map(|t| t.external_id)
        .unwrap_or_default();
    Ok(Json(AlarmConfigPayload::new(&config, tag_external)))
}

pub(crate) async fn handle_alarm_delete(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    state.store.delete_alarm_config(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn handle_activations_list(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let activations: Vec<serde_json::Value> = state
        .store
        .activations()
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "config_id": a.config_id,
                "activated_at": a.activated_at,
                "active": a.active,
            })
        })
        .collect();
    Json(serde_json::Value::Array(activations))
}

pub(crate) async fn handle_notifications_list(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let intents: Vec<serde_json::Value> = state
        .store
        .intents()
        .iter()
        .map(|intent| {
            serde_json::json!({
                "config_id": intent.config_id,
                "tag_id": intent.tag_id,
                "message": intent.message,
                "threat_level": intent.threat_level.as_str(),
                "recipients": intent.recipients,
                "created_at": intent.created_at,
            })
        })
        .collect();
    Json(serde_json::Value::Array(intents))
}

// ============================================================
// Subscription CRUD
// ============================================================

#[derive(Deserialize)]
pub(crate) struct SubscriptionBody {
    config_id: u32,
    email: String,
    #[serde(default = "default_true")]
    email_enabled: bool,
    #[serde(default)]
    sms_enabled: bool,
}

pub(crate) async fn handle_subscriptions_list(
    State(state): State<AppState>,
) -> Json<Vec<SubscriptionPayload>> {
    Json(
        state
            .store
            .subscriptions()
            .iter()
            .map(SubscriptionPayload::from)
            .collect(),
    )
}

pub(crate) async fn handle_subscription_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubscriptionBody>,
) -> ApiResult<Json<SubscriptionPayload>> {
    authorize_write(&state, &headers)?;
    let subscription = state.store.create_subscription(NewSubscription {
        config_id: body.config_id,
        email: body.email,
        email_enabled: body.email_enabled,
        sms_enabled: body.sms_enabled,
    })?;
    Ok(Json(SubscriptionPayload::from(&subscription)))
}

pub(crate) async fn handle_subscription_delete(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    state.store.delete_subscription(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Schedule CRUD
// ============================================================

#[derive(Deserialize)]
pub(crate) struct ScheduleBody {
    alias: String,
    tag: Uuid,
    write_value: serde_json::Value,
    /// "HH:MM" in the server's local timezone.
    time: String,
    days: [bool; 7],
    #[serde(default = "default_true")]
    enabled: bool,
}

fn parse_time_of_day(text: &str) -> Result<(u8, u8), HttpError> {
    let parts: Vec<&str> = text.split(':').collect();
    let parsed = if parts.len() == 2 {
        match (parts[0].parse::<u8>(), parts[1].parse::<u8>()) {
            (Ok(hour), Ok(minute)) => Some((hour, minute)),
            _ => None,
        }
    } else {
        None
    };
    parsed.ok_or_else(|| {
        ApiError::BadRequest(format!("bad time {:?}, expected HH:MM", text)).into()
    })
}

pub(crate) async fn handle_schedules_list(
    State(state): State<AppState>,
) -> Json<Vec<SchedulePayload>> {
    let store = &state.store;
    let payloads = store
        .schedules()
        .iter()
        .map(|schedule| {
            let tag_external = store
                .tag(schedule.tag_id)
                .map(|t| t.external_id)
                .unwrap_or_default();
            SchedulePayload::new(schedule, tag_external)
        })
        .collect();
    Json(payloads)
}

pub(crate) async fn handle_schedule_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<Json<SchedulePayload>> {
    authorize_write(&state, &headers)?;
    let tag = find_tag(&state, body.tag)?;
    let (hour, minute) = parse_time_of_day(&body.time)?;
    let write_value = value_from_json(&body.write_value)?;
    let schedule = state.store.create_schedule(NewSchedule {
        alias: body.alias,
        tag_id: tag.id,
        write_value,
        hour,
        minute,
        days: body.days,
        enabled: body.enabled,
    })?;
    Ok(Json(SchedulePayload::new(&schedule, tag.external_id)))
}

#[derive(Deserialize)]
pub(crate) struct SchedulePatchBody {
    write_value: Option<serde_json::Value>,
    time: Option<String>,
    days: Option<[bool; 7]>,
    enabled: Option<bool>,
}

pub(crate) async fn handle_schedule_update(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(body): Json<SchedulePatchBody>,
) -> ApiResult<Json<SchedulePayload>> {
    authorize_write(&state, &headers)?;
    let (hour, minute) = match &body.time {
        Some(text) => {
            let (hour, minute) = parse_time_of_day(text)?;
            (Some(hour), Some(minute))
        }
        None => (None, None),
    };
    let write_value = match &body.write_value {
        Some(raw) => Some(value_from_json(raw)?),
        None => None,
    };
    let schedule = state.store.update_schedule(
        id,
        ScheduleUpdate {
            write_value,
            hour,
            minute,
            days: body.days,
            enabled: body.enabled,
        },
    )?;
    let tag_external = state
        .store
        .tag(schedule.tag_id)
        .map(|t| t.external_id)
        .unwrap_or_default();
    Ok(Json(SchedulePayload::new(&schedule, tag_external)))
}

pub(crate) async fn handle_schedule_delete(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    state.store.delete_schedule(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Dashboard CRUD (opaque pass-through storage)
// ============================================================

#[derive(Deserialize)]
pub(crate) struct DashboardBody {
    alias: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_column_count")]
    column_count: u16,
}

fn default_column_count() -> u16 {
    20
}

pub(crate) async fn handle_dashboards_list(
    State(state): State<AppState>,
) -> Json<Vec<DashboardPayload>> {
    Json(
        state
            .store
            .dashboards()
            .iter()
            .map(DashboardPayload::from)
            .collect(),
    )
}

pub(crate) async fn handle_dashboard_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DashboardBody>,
) -> ApiResult<Json<DashboardPayload>> {
    authorize_write(&state, &headers)?;
    let dashboard = state.store.create_dashboard(NewDashboard {
        alias: body.alias,
        description: body.description,
        column_count: body.column_count,
    })?;
    Ok(Json(DashboardPayload::from(&dashboard)))
}

pub(crate) async fn handle_dashboard_delete(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    state.store.delete_dashboard(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(crate) struct WidgetBody {
    widget_type: String,
    tag: Option<Uuid>,
    #[serde(default)]
    config: serde_json::Value,
}

pub(crate) async fn handle_widgets_list(
    State(state): State<AppState>,
    Path(dashboard_id): Path<u32>,
) -> Json<Vec<WidgetPayload>> {
    let store = &state.store;
    let payloads = store
        .widgets_for_dashboard(dashboard_id)
        .iter()
        .map(|widget| {
            let tag_external = widget
                .tag_id
                .and_then(|id| store.tag(id).ok())
                .map(|t| t.external_id);
            WidgetPayload::new(widget, tag_external)
        })
        .collect();
    Json(payloads)
}

pub(crate) async fn handle_widget_create(
    State(state): State<AppState>,
    Path(dashboard_id): Path<u32>,
    headers: HeaderMap,
    Json(body): Json<WidgetBody>,
) -> ApiResult<Json<WidgetPayload>> {
    authorize_write(&state, &headers)?;
    let tag = match body.tag {
        Some(external_id) => Some(find_tag(&state, external_id)?),
        None => None,
    };
    let widget = state.store.create_widget(NewWidget {
        dashboard_id,
        widget_type: body.widget_type,
        tag_id: tag.as_ref().map(|t| t.id),
        config: body.config.to_string(),
    })?;
    Ok(Json(WidgetPayload::new(
        &widget,
        tag.map(|t| t.external_id),
    )))
}

pub(crate) async fn handle_widget_delete(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize_write(&state, &headers)?;
    state.store.delete_widget(id)?;
    Ok(StatusCode::NO_CONTENT)
}
