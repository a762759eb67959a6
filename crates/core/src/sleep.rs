use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Polling granularity for stop-aware sleeps.
pub const POLL_QUANTUM: Duration = Duration::from_millis(10);

/// Sleep for `ms` milliseconds, waking early once `stop` is set.
/// Returns `true` if the sleep was cut short by a stop request.
pub fn sleep_ms(ms: u64, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(ms);
    loop {
        if stop.load(Ordering::Acquire) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(POLL_QUANTUM.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sleep_runs_full_duration() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        assert!(!sleep_ms(30, &stop));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_cuts_sleep_short() {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Release);
        });

        let started = Instant::now();
        assert!(sleep_ms(5_000, &stop));
        let elapsed = started.elapsed();
        setter.join().unwrap();

        // Observed within a couple of quanta of the request, not after 5s.
        assert!(elapsed < Duration::from_millis(50) + POLL_QUANTUM * 10, "took {:?}", elapsed);
    }

    #[test]
    fn test_preset_stop_returns_immediately() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        assert!(sleep_ms(1_000, &stop));
        assert!(started.elapsed() < POLL_QUANTUM);
    }
}
