//! Small shared helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleeps up to `duration`, waking early when `running` goes false.
/// Returns true if the full duration elapsed.
pub fn sleep_while_running(duration: Duration, running: &AtomicBool) -> bool {
    let slice = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let nap = remaining.min(slice);
        std::thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
    running.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wakes_early_on_shutdown() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
        });

        let started = Instant::now();
        let completed = sleep_while_running(Duration::from_secs(10), &running);
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
