//! modsup-core — shared library for the modsup Modbus supervisor.
//!
//! Provides:
//! - `model` — devices, tags, alarms, schedules, write requests, values
//! - `codec` — typed value ↔ register/coil conversion
//! - `transport` — Modbus TCP/UDP/RTU clients and the mock transport
//! - `session` — per-device connection ownership and backoff
//! - `store` — embedded repository (WAL + compacted snapshots)
//! - `cache` — process-wide current-value cache
//! - `engine` — the poll loop (write drain, reads, history, alarms)
//! - `history`, `alarm`, `schedule`, `cleanup` — background services
//! - `supervisor` — composition root for the background threads
//!
//! With `api` feature:
//! - `api` — JSON projection types for modsup-web

pub mod alarm;
pub mod cache;
pub mod cleanup;
pub mod codec;
pub mod engine;
pub mod history;
pub mod model;
pub mod schedule;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod util;

#[cfg(feature = "api")]
pub mod api;

/// Version string reported by the binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
