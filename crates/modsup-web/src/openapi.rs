//! OpenAPI document for the JSON API, served at `/api/openapi.json`.

use utoipa::OpenApi;

use modsup_core::api::schema::{
    AlarmPayload, HistoryPayload, HistoryPoint, TagValuePayload,
};

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "modsup API",
        description = "Modbus fleet supervisor: tag values, history, writes, and configuration CRUD"
    ),
    paths(
        handlers::handle_health,
        handlers::handle_tag_value,
        handlers::handle_batch_values,
        handlers::handle_tag_history,
        handlers::handle_tag_write,
    ),
    components(schemas(TagValuePayload, AlarmPayload, HistoryPayload, HistoryPoint))
)]
pub(crate) struct ApiDoc;
