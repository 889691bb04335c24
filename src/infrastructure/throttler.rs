//! Connection Throttler
//!
//! Local admission control for a connector's accept path. Pauses the
//! accept loop for a bounded, cancellable delay while the connector is
//! over its configured connection count or accept rate.

use crate::config::ThrottlingConfig;
use crate::infrastructure::shutdown::ShutdownController;
use crate::infrastructure::statistics::ConnectionStatistics;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RATE_WINDOW_MS: u64 = 1000;

/// The rate window lives in one word: start (ms) above, accept count below.
/// The count saturates, which caps the effective rate limit at `COUNT_MASK`.
const COUNT_BITS: u32 = 24;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

fn pack_window(start_ms: u64, accepts: u64) -> u64 {
    (start_ms << COUNT_BITS) | accepts.min(COUNT_MASK)
}

fn unpack_window(window: u64) -> (u64, u64) {
    (window >> COUNT_BITS, window & COUNT_MASK)
}

/// Throttler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// Accepting without delay
    Normal,
    /// Delaying accepts
    Throttled,
}

impl std::fmt::Display for ThrottleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThrottleState::Normal => write!(f, "normal"),
            ThrottleState::Throttled => write!(f, "throttled"),
        }
    }
}

/// Outcome of gating one accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No delay was needed
    Immediate,
    /// Accept was held for the given delay
    Delayed(Duration),
    /// Shutdown interrupted the delay
    Cancelled,
}

/// Admission controller for one connector.
pub struct ConnectionThrottler {
    connector: String,
    watermarks: Option<(usize, usize)>,
    max_accept_rate: Option<u32>,
    max_delay: Duration,
    statistics: Arc<ConnectionStatistics>,
    /// 0 = Normal, 1 = Throttled
    state: AtomicU8,
    /// Current accept-rate window, see [`pack_window`]
    window: AtomicU64,
}

impl ConnectionThrottler {
    /// Create a throttler from an already validated configuration.
    pub fn new(connector: &str, config: &ThrottlingConfig, statistics: Arc<ConnectionStatistics>) -> Self {
        Self {
            connector: connector.to_string(),
            watermarks: config.watermarks(),
            max_accept_rate: config.max_accept_rate,
            max_delay: config.max_delay(),
            statistics,
            state: AtomicU8::new(0),
            window: AtomicU64::new(pack_window(Self::now_ms(), 0)),
        }
    }

    /// Get the current timestamp in milliseconds.
    fn now_ms() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u64
    }

    pub fn state(&self) -> ThrottleState {
        match self.state.load(Ordering::SeqCst) {
            0 => ThrottleState::Normal,
            _ => ThrottleState::Throttled,
        }
    }

    /// Delay imposed for `active` live connections.
    ///
    /// Zero at or below the low-water mark, `max_delay` at or above the
    /// high-water mark, linear in between.
    pub fn connection_delay(&self, active: usize) -> Duration {
        let Some((low, high)) = self.watermarks else {
            return Duration::ZERO;
        };
        if active <= low {
            return Duration::ZERO;
        }
        if active >= high {
            return self.max_delay;
        }
        let max_ms = self.max_delay.as_millis();
        let ms = max_ms * (active - low) as u128 / (high - low) as u128;
        Duration::from_millis(ms as u64)
    }

    /// Delay imposed by the accept-rate limit at `now_ms`.
    fn rate_delay_at(&self, now_ms: u64) -> Duration {
        let Some(max_rate) = self.max_accept_rate else {
            return Duration::ZERO;
        };
        let (start, accepts) = self.window();
        // An expired window is replaced by the next recorded accept.
        if now_ms.saturating_sub(start) >= RATE_WINDOW_MS {
            return Duration::ZERO;
        }
        if accepts < u64::from(max_rate).min(COUNT_MASK) {
            return Duration::ZERO;
        }
        let remaining = (start + RATE_WINDOW_MS).saturating_sub(now_ms);
        Duration::from_millis(remaining).min(self.max_delay)
    }

    /// Start and accept count of the current rate window.
    fn window(&self) -> (u64, u64) {
        unpack_window(self.window.load(Ordering::Acquire))
    }

    /// Delay that would be imposed right now.
    pub fn current_delay(&self) -> Duration {
        self.delay_at(self.statistics.active(), Self::now_ms())
    }

    fn delay_at(&self, active: usize, now_ms: u64) -> Duration {
        self.connection_delay(active)
            .max(self.rate_delay_at(now_ms))
            .min(self.max_delay)
    }

    /// Count an accepted connection against the rate window.
    pub fn record_accept(&self) {
        if self.max_accept_rate.is_some() {
            self.record_accept_at(Self::now_ms());
        }
    }

    /// Count one accept at `now_ms`, opening a new window if the current
    /// one has expired. Rollover and count are a single update.
    fn record_accept_at(&self, now_ms: u64) {
        let _ = self
            .window
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |window| {
                let (start, accepts) = unpack_window(window);
                if now_ms.saturating_sub(start) >= RATE_WINDOW_MS {
                    Some(pack_window(now_ms, 1))
                } else {
                    Some(pack_window(start, accepts + 1))
                }
            });
    }

    fn transition(&self, throttled: bool) {
        let new = u8::from(throttled);
        let prev = self.state.swap(new, Ordering::SeqCst);
        if prev != new {
            let state = if throttled {
                ThrottleState::Throttled
            } else {
                ThrottleState::Normal
            };
            tracing::info!(
                "connector {} throttling state -> {} (active={})",
                self.connector,
                state,
                self.statistics.active()
            );
        }
    }

    /// Gate one accept, pausing if the connector is over its limits.
    ///
    /// The pause is bounded by `max_delay` and returns early on shutdown.
    pub async fn admit(&self, shutdown: &ShutdownController) -> Admission {
        let delay = self.current_delay();
        self.transition(!delay.is_zero());

        if delay.is_zero() {
            return Admission::Immediate;
        }

        tracing::debug!("connector {} delaying accept by {:?}", self.connector, delay);
        self.statistics.record_throttled(delay);

        if shutdown.sleep(delay).await {
            Admission::Delayed(delay)
        } else {
            Admission::Cancelled
        }
    }
}
