//! Infrastructure Layer
//!
//! Sockets, admission control, counters and shutdown plumbing.

pub mod listen_channel;
pub mod metric_cache;
pub mod shutdown;
pub mod socket_configurator;
pub mod statistics;
pub mod throttler;

pub use listen_channel::{ChannelOrigin, ListenChannel};
pub use metric_cache::MetricContextCache;
pub use shutdown::{shutdown_signal, ShutdownController};
pub use socket_configurator::SocketConfigurator;
pub use statistics::{ConnectionGuard, ConnectionStatistics};
pub use throttler::{Admission, ConnectionThrottler, ThrottleState};
