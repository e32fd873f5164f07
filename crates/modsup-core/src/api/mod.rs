//! API projection types for modsup-web JSON serialization.
//!
//! Pure conversion layer between the domain model and the JSON the HTTP
//! front end speaks: dynamic values ↔ `serde_json`, payload builders for
//! the value/history queries, and entity serializers for the CRUD routes.

pub mod convert;
pub mod schema;

use crate::store::StoreError;

/// An HTTP-shaped failure; the web layer maps the variants to statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::NotWritable => {
                ApiError::BadRequest("This tag type is read-only".into())
            }
            StoreError::Conflict(msg) | StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::Io(msg) | StoreError::Corrupt(msg) => ApiError::Internal(msg),
        }
    }
}
