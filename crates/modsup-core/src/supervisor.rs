//! Composition root for the background tasks.
//!
//! Constructs nothing itself — the caller builds the store, cache, and
//! engine in dependency order — but owns the shared shutdown flag and the
//! three long-lived threads (poll, schedule, cleanup). Each loop re-checks
//! the flag at least every 100 ms, so `stop()` drains within a bounded
//! window on top of any in-flight transport call's timeout.

use crate::cleanup;
use crate::engine::Engine;
use crate::schedule;
use crate::store::Store;
use crate::util::sleep_while_running;
use chrono::{Local, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub schedule_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

pub struct Supervisor {
    running: Arc<AtomicBool>,
    store: Arc<Store>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Starts the poll, schedule, and cleanup threads.
    pub fn start(mut engine: Engine, options: SupervisorOptions) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let store = engine.store().clone();
        let mut handles = Vec::with_capacity(3);

        let poll_flag = running.clone();
        handles.push(
            std::thread::Builder::new()
                .name("poll".into())
                .spawn(move || engine.run(&poll_flag))?,
        );

        let schedule_store = store.clone();
        let schedule_flag = running.clone();
        let schedule_interval = options.schedule_interval;
        handles.push(
            std::thread::Builder::new().name("schedule".into()).spawn(move || {
                info!("Schedule runner starting ({:?})", schedule_interval);
                while schedule_flag.load(Ordering::SeqCst) {
                    if let Err(e) = schedule::process_schedules(&schedule_store, Local::now()) {
                        error!("Schedule pass failed: {}", e);
                    }
                    sleep_while_running(schedule_interval, &schedule_flag);
                }
            })?,
        );

        let cleanup_store = store.clone();
        let cleanup_flag = running.clone();
        let cleanup_interval = options.cleanup_interval;
        handles.push(
            std::thread::Builder::new().name("cleanup".into()).spawn(move || {
                info!("Cleanup loop starting ({:?})", cleanup_interval);
                while cleanup_flag.load(Ordering::SeqCst) {
                    if let Err(e) = cleanup::run_cleanup(&cleanup_store, Utc::now()) {
                        error!("Cleanup pass failed: {}", e);
                    }
                    sleep_while_running(cleanup_interval, &cleanup_flag);
                }
            })?,
        );

        Ok(Self {
            running,
            store,
            handles,
        })
    }

    /// The shared shutdown flag (for ctrl-c handlers).
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Signals shutdown, joins all tasks, and flushes the store.
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("task").to_string();
            if handle.join().is_err() {
                error!("Background task {:?} panicked", name);
            }
        }
        if let Err(e) = self.store.flush() {
            error!("Final store flush failed: {}", e);
        } else {
            info!("Store flushed");
        }
    }

    /// Blocks until something else clears the running flag, then joins.
    pub fn wait(self) {
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TagCache;
    use crate::engine::EngineOptions;
    use crate::transport::MockTransport;

    #[test]
    fn starts_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let mock = MockTransport::new();
        let engine = Engine::with_transport_factory(
            store.clone(),
            Arc::new(TagCache::new()),
            EngineOptions {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
            Box::new(move |_| Box::new(mock.clone())),
        );

        let supervisor = Supervisor::start(engine, SupervisorOptions::default()).unwrap();
        let running = supervisor.running();
        std::thread::sleep(Duration::from_millis(100));
        assert!(running.load(Ordering::SeqCst));

        supervisor.stop();
        // Shutdown flushed a snapshot.
        assert!(dir.path().join("state.bin").exists());
    }
}
