//! modsupd - headless Modbus supervisor daemon.
//!
//! Polls the configured device fleet, maintains current values and
//! history, evaluates alarms, runs write schedules, and prunes expired
//! data. The HTTP API lives in modsup-web; both binaries compose the same
//! core.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod seed;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use modsup_core::cache::TagCache;
use modsup_core::engine::{Engine, EngineOptions};
use modsup_core::store::Store;
use modsup_core::supervisor::{Supervisor, SupervisorOptions};

/// Modbus fleet supervisor daemon.
#[derive(Parser)]
#[command(name = "modsupd", about = "Modbus fleet supervisor daemon", version = modsup_core::VERSION)]
struct Args {
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

    /// Register demo objects into an empty store, then continue.
    #[arg(long)]
    seed_demo: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
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
        .add_directive(format!("modsupd={}", level).parse().unwrap())
        .add_directive(format!("modsup_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("modsupd {} starting", modsup_core::VERSION);
    info!(
        "Config: poll={}ms, timeout={}ms, schedule={}s, cleanup={}s, data={}",
        args.poll_ms,
        args.timeout_ms,
        args.schedule_secs,
        args.cleanup_secs,
        args.data_dir.display()
    );

    let store = match Store::open(&args.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open store at {}: {}", args.data_dir.display(), e);
            std::process::exit(1);
        }
    };

    if args.seed_demo {
        match seed::seed_demo(&store) {
            Ok(()) => info!("Demo objects registered"),
            Err(e) => warn!("Demo seeding skipped: {}", e),
        }
    }

    let cache = Arc::new(TagCache::new());
    cache.load(store.tags().iter());
    info!("Cache warmed with {} values", cache.len());

    let devices = store.active_devices();
    if devices.is_empty() {
        warn!("No active devices configured; polling will idle (try --seed-demo)");
    } else {
        for device in &devices {
            info!("Device: {} via {}", device, device.protocol.as_str());
        }
    }

    let engine = Engine::new(
        store.clone(),
        cache,
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

    let running = supervisor.running();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    supervisor.wait();
    info!("Shutdown complete");
}
