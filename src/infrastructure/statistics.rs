//! Connection Statistics
//!
//! Lock-free counters for one connector, updated from every accept loop.

use crate::domain::entities::StatisticsSnapshot;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Accept/active/close counters for a connector.
#[derive(Debug, Default)]
pub struct ConnectionStatistics {
    accepted: AtomicU64,
    active: AtomicUsize,
    closed: AtomicU64,
    max_active: AtomicUsize,
    throttled: AtomicU64,
    throttle_delay_ms: AtomicU64,
    duration_total_ms: AtomicU64,
    /// Notified when the active count drops to zero
    drained: Notify,
}

impl ConnectionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections currently open.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Record an accepted connection.
    pub fn connection_opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::Relaxed);
    }

    /// Record a closed connection and how long it lived.
    pub fn connection_closed(&self, lifetime: Duration) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.duration_total_ms
            .fetch_add(lifetime.as_millis() as u64, Ordering::Relaxed);
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Record an accept that was held back by the throttler.
    pub fn record_throttled(&self, delay: Duration) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
        self.throttle_delay_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Create a guard that records the close when dropped.
    pub fn open_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.connection_opened();
        ConnectionGuard {
            statistics: self.clone(),
            opened_at: Instant::now(),
        }
    }

    /// Wait until no connections are open, up to `timeout`.
    ///
    /// Returns `false` if connections were still open when the timeout hit.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let notified = self.drained.notified();
        tokio::pin!(notified);
        // Register before checking so a close between the check and the await is not missed.
        notified.as_mut().enable();

        if self.active() == 0 {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "drain timeout: {} connections still active",
                    self.active()
                );
                false
            }
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let closed = self.closed.load(Ordering::Relaxed);
        let duration_total = self.duration_total_ms.load(Ordering::Relaxed);
        let mean_duration_ms = if closed == 0 {
            0.0
        } else {
            duration_total as f64 / closed as f64
        };

        StatisticsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active(),
            closed,
            max_active: self.max_active.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            throttle_delay_ms: self.throttle_delay_ms.load(Ordering::Relaxed),
            mean_duration_ms,
        }
    }
}

/// RAII guard for one accepted connection.
///
/// Decrements the active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    statistics: Arc<ConnectionStatistics>,
    opened_at: Instant,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.statistics.connection_closed(self.opened_at.elapsed());
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_start_empty() {
        let stats = ConnectionStatistics::new();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn test_connection_tracking() {
        let stats = ConnectionStatistics::new();

        stats.connection_opened();
        stats.connection_opened();
        assert_eq!(stats.active(), 2);

        stats.connection_closed(Duration::from_millis(10));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.closed, 1);
        assert_eq!(snapshot.max_active, 2);
        assert_eq!(snapshot.mean_duration_ms, 10.0);
    }

    #[test]
    fn test_max_active_is_high_water() {
        let stats = ConnectionStatistics::new();

        for _ in 0..3 {
            stats.connection_opened();
        }
        for _ in 0..3 {
            stats.connection_closed(Duration::ZERO);
        }
        stats.connection_opened();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.max_active, 3);
    }

    #[test]
    fn test_record_throttled() {
        let stats = ConnectionStatistics::new();
        stats.record_throttled(Duration::from_millis(40));
        stats.record_throttled(Duration::from_millis(60));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.throttled, 2);
        assert_eq!(snapshot.throttle_delay_ms, 100);
    }

    #[test]
    fn test_connection_guard() {
        let stats = Arc::new(ConnectionStatistics::new());

        {
            let _guard = stats.open_guard();
            assert_eq!(stats.active(), 1);
        }

        assert_eq!(stats.active(), 0);
        assert_eq!(stats.snapshot().closed, 1);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let stats = Arc::new(ConnectionStatistics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = s.open_guard();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 8000);
        assert_eq!(snapshot.closed, 8000);
        assert_eq!(snapshot.active, 0);
    }

    #[tokio::test]
    async fn test_wait_for_drain_immediate() {
        let stats = ConnectionStatistics::new();
        assert!(stats.wait_for_drain(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_with_connections() {
        let stats = Arc::new(ConnectionStatistics::new());
        let guard = stats.open_guard();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(stats.wait_for_drain(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_timeout() {
        let stats = Arc::new(ConnectionStatistics::new());
        let _guard = stats.open_guard();

        assert!(!stats.wait_for_drain(Duration::from_millis(50)).await);
    }
}
