//! modsup-web - HTTP front end for the Modbus supervisor.
//!
//! Embeds the full engine (poll loop, schedule runner, cleanup) and serves
//! the JSON API on top of it: current values, history windows, operator
//! writes, and configuration CRUD.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::response::Json;
use axum::routing::get;
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use modsup_core::cache::TagCache;
use modsup_core::engine::{Engine, EngineOptions};
use modsup_core::store::Store;
use modsup_core::supervisor::{Supervisor, SupervisorOptions};

use crate::handlers::*;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "modsup-web", about = "modsup web API server", version = modsup_core::VERSION)]
struct Args {
    /// Listen address.
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "MODSUP_BIND")]
    bind: SocketAddr,

    /// Data directory for the embedded store.
    #[arg(short, long, default_value = "./data", env = "MODSUP_DATA_DIR")]
    data_dir: PathBuf,

    /// Poll interval in milliseconds.
    #[arg(long, default_value = "250")]
    poll_ms: u64,

    /// Modbus I/O timeout in milliseconds.
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Schedule runner interval in seconds.
    #[arg(long, default_value = "10")]
    schedule_secs: u64,

    /// Cleanup interval in seconds.
    #[arg(long, default_value = "60")]
    cleanup_secs: u64,

    /// Bearer token required for writes and mutating CRUD.
    /// Unset leaves the instance open.
    #[arg(long, env = "MODSUP_WRITE_TOKEN")]
    write_token: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("modsup_web={}", level).parse().unwrap())
        .add_directive(format!("modsup_core={}", level).parse().unwrap())
        .add_directive(format!("tower_http={}", Level::WARN).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/openapi.json", get(handle_openapi))
        // Values and history
        .route("/api/tags/{external_id}/value", get(handle_tag_value))
        .route("/api/tags/{external_id}/history", get(handle_tag_history))
        .route(
            "/api/tags/{external_id}/write",
            axum::routing::post(handle_tag_write),
        )
        .route("/api/values", axum::routing::post(handle_batch_values))
        // CRUD
        .route(
            "/api/devices",
            get(handle_devices_list).post(handle_device_create),
        )
        .route(
            "/api/devices/{alias}",
            get(handle_device_get)
                .put(handle_device_update)
                .delete(handle_device_delete),
        )
        .route("/api/tags", get(handle_tags_list).post(handle_tag_create))
        .route(
            "/api/tags/{external_id}",
            get(handle_tag_get)
                .put(handle_tag_update)
                .delete(handle_tag_delete),
        )
        .route(
            "/api/alarms",
            get(handle_alarms_list).post(handle_alarm_create),
        )
        .route(
            "/api/alarms/{id}",
            axum::routing::put(handle_alarm_update).delete(handle_alarm_delete),
        )
        .route("/api/alarms/activations", get(handle_activations_list))
        .route("/api/notifications", get(handle_notifications_list))
        .route(
            "/api/subscriptions",
            get(handle_subscriptions_list).post(handle_subscription_create),
        )
        .route(
            "/api/subscriptions/{id}",
            axum::routing::delete(handle_subscription_delete),
        )
        .route(
            "/api/schedules",
            get(handle_schedules_list).post(handle_schedule_create),
        )
        .route(
            "/api/schedules/{id}",
            axum::routing::put(handle_schedule_update).delete(handle_schedule_delete),
        )
        .route(
            "/api/dashboards",
            get(handle_dashboards_list).post(handle_dashboard_create),
        )
        .route(
            "/api/dashboards/{id}",
            axum::routing::delete(handle_dashboard_delete),
        )
        .route(
            "/api/dashboards/{id}/widgets",
            get(handle_widgets_list).post(handle_widget_create),
        )
        .route(
            "/api/widgets/{id}",
            axum::routing::delete(handle_widget_delete),
        )
        .route("/api/write-requests", get(handle_write_requests))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}

async fn handle_openapi() -> Json<serde_json::Value> {
    Json(
        serde_json::to_value(openapi::ApiDoc::openapi())
            .unwrap_or(serde_json::Value::Null),
    )
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("modsup-web {} starting on {}", modsup_core::VERSION, args.bind);

    let store = match Store::open(&args.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open store at {}: {}", args.data_dir.display(), e);
            std::process::exit(1);
        }
    };

    let cache = Arc::new(TagCache::new());
    cache.load(store.tags().iter());
    info!("Cache warmed with {} values", cache.len());

    let engine = Engine::new(
        store.clone(),
        cache.clone(),
        EngineOptions {
            poll_interval: Duration::from_millis(args.poll_ms),
            transport_timeout: Duration::from_millis(args.timeout_ms),
        },
    );
    let supervisor = match Supervisor::start(
        engine,
        SupervisorOptions {
            schedule_interval: Duration::from_secs(args.schedule_secs),
            cleanup_interval: Duration::from_secs(args.cleanup_secs),
        },
    ) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("Failed to start background tasks: {}", e);
            std::process::exit(1);
        }
    };

    if args.write_token.is_none() {
        info!("No write token configured; write routes are open");
    }

    let app = router(AppState {
        store,
        cache,
        write_token: args.write_token.map(Arc::new),
    });

    let listener = match tokio::net::TcpListener::bind(args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", args.bind, e);
            std::process::exit(1);
        }
    };

    let running = supervisor.running();
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })
        .await;

    if let Err(e) = serve_result {
        error!("Server error: {}", e);
    }

    supervisor.stop();
    info!("Shutdown complete");
}
