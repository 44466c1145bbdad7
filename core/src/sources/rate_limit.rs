//! Per-adapter request pacing.
//!
//! Every adapter owns one `RequestPacer` and calls `acquire()` before each
//! outbound request. If less than the minimum interval has elapsed since
//! the adapter's previous request, the call sleeps until it has. The last
//! request instant lives behind an async mutex held across the sleep, so
//! concurrent callers on the same adapter are strictly serialized.
//! Adapters do not coordinate with one another, and pacing state is not
//! persisted: a restart resets the clock.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// The effective interval for a configured per-minute budget, never
    /// tighter than the adapter's floor.
    pub fn from_rate_per_minute(floor: Duration, rate_per_minute: u32) -> Self {
        let interval = if rate_per_minute == 0 {
            floor
        } else {
            floor.max(Duration::from_secs_f64(60.0 / rate_per_minute as f64))
        };
        Self::new(interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until this adapter is allowed to issue its next request, then
    /// claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_call_waits_min_interval() {
        let pacer = RequestPacer::new(Duration::from_millis(200));

        let start = Instant::now();
        pacer.acquire().await;
        pacer.acquire().await;
        // The second acquire may not complete earlier than 200ms after the
        // first request was issued.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_do_not_wait() {
        let pacer = RequestPacer::new(Duration::from_millis(100));
        pacer.acquire().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let before = Instant::now();
        pacer.acquire().await;
        assert!(before.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_serialize() {
        use std::sync::Arc;

        let pacer = Arc::new(RequestPacer::new(Duration::from_millis(50)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pacer = pacer.clone();
            handles.push(tokio::spawn(async move { pacer.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Four requests spaced 50ms apart: at least 150ms total.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_rate_per_minute_respects_floor() {
        let pacer =
            RequestPacer::from_rate_per_minute(Duration::from_millis(500), 600);
        // 600/min would be 100ms, but the floor wins.
        assert_eq!(pacer.min_interval(), Duration::from_millis(500));

        let pacer = RequestPacer::from_rate_per_minute(Duration::from_millis(100), 30);
        assert_eq!(pacer.min_interval(), Duration::from_secs(2));
    }
}
