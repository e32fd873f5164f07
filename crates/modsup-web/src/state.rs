//! Shared application state for the HTTP handlers.

use modsup_core::cache::TagCache;
use modsup_core::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<Store>,
    pub(crate) cache: Arc<TagCache>,
    /// Bearer token required for writes and mutating CRUD. `None` leaves
    /// the instance open (lab setups behind a trusted network).
    pub(crate) write_token: Option<Arc<String>>,
}
