//! Connector - inbound adapter owning one listening port.
//!
//! Opens or adopts the listening channel, gates accepts through the
//! throttler, tunes each accepted socket and hands it to a
//! [`ConnectionHandler`] together with a handle back to this connector.

use crate::config::ConnectorConfig;
use crate::domain::entities::{ConnectorState, MetricContextRef, StatisticsSnapshot};
use crate::domain::metric_names;
use crate::domain::ports::{ConnectionHandler, MetricsBackend};
use crate::domain::value_objects::DimensionKeys;
use crate::error::ConnectorError;
use crate::infrastructure::{
    Admission, ChannelOrigin, ConnectionGuard, ConnectionStatistics, ConnectionThrottler,
    ListenChannel, MetricContextCache, ShutdownController, SocketConfigurator, ThrottleState,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

/// Pause after a failed accept (e.g. descriptor exhaustion) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Read-only view of an opened connector.
///
/// Every accepted connection carries one, so request processing can reach
/// the configuration and metric contexts of the connector that accepted it.
pub struct ConnectorHandle {
    config: ConnectorConfig,
    listen_port: u16,
    origin: ChannelOrigin,
    metrics: MetricContextCache,
    statistics: Arc<ConnectionStatistics>,
}

impl ConnectorHandle {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The port the channel is actually bound to.
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn channel_origin(&self) -> ChannelOrigin {
        self.origin
    }

    pub fn connector_metric_context(&self) -> MetricContextRef {
        self.metrics.connector_context()
    }

    pub fn request_metric_context(&self, method: &str, scheme: &str) -> MetricContextRef {
        self.metrics.request_context(method, scheme)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }
}

/// A configured connection, tracked until dropped.
pub struct AcceptedConnection {
    stream: TcpStream,
    peer: SocketAddr,
    connector: Arc<ConnectorHandle>,
    guard: ConnectionGuard,
}

impl AcceptedConnection {
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The connector that accepted this connection.
    pub fn connector(&self) -> &Arc<ConnectorHandle> {
        &self.connector
    }

    /// Split into parts. The connection counts as open until the guard drops.
    pub fn into_parts(self) -> (TcpStream, Arc<ConnectorHandle>, ConnectionGuard) {
        (self.stream, self.connector, self.guard)
    }
}

/// Owner of one listening channel.
pub struct Connector {
    config: ConnectorConfig,
    keys: Arc<DimensionKeys>,
    backend: Arc<dyn MetricsBackend>,
    statistics: Arc<ConnectionStatistics>,
    throttler: Option<ConnectionThrottler>,
    configurator: SocketConfigurator,
    shutdown: ShutdownController,
    state: AtomicU8,
    channel: Mutex<Option<Arc<ListenChannel>>>,
    handle: OnceLock<Arc<ConnectorHandle>>,
}

impl Connector {
    /// Create a connector. Throttling settings are validated here, before
    /// any socket exists.
    pub fn new(
        config: ConnectorConfig,
        backend: Arc<dyn MetricsBackend>,
        keys: Arc<DimensionKeys>,
    ) -> Result<Self, ConnectorError> {
        config.validate()?;

        let statistics = Arc::new(ConnectionStatistics::new());
        let throttler = if config.throttling.enabled {
            tracing::info!(
                "connector {} throttling enabled (watermarks={:?}, max_accept_rate={:?}, max_delay={:?})",
                config.name,
                config.throttling.watermarks(),
                config.throttling.max_accept_rate,
                config.throttling.max_delay()
            );
            Some(ConnectionThrottler::new(&config.name, &config.throttling, statistics.clone()))
        } else {
            None
        };

        Ok(Self {
            configurator: SocketConfigurator::from_config(&config),
            config,
            keys,
            backend,
            statistics,
            throttler,
            shutdown: ShutdownController::new(),
            state: AtomicU8::new(ConnectorState::Unopened.as_u8()),
            channel: Mutex::new(None),
            handle: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectorState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Open the listening channel.
    ///
    /// Adopts `activator_channel` when given, otherwise binds
    /// `bind_address:listen_port`. Must be called once, inside a tokio
    /// runtime. A failed open leaves the connector closed.
    pub fn open(&self, activator_channel: Option<std::net::TcpListener>) -> Result<(), ConnectorError> {
        let mut slot = self.channel.lock();
        if self.state() != ConnectorState::Unopened {
            return Err(ConnectorError::AlreadyOpened(self.config.name.clone()));
        }

        let result = match activator_channel {
            None => {
                tracing::info!("no channel set by activator, opening channel ourselves");
                let addr = SocketAddr::new(self.config.bind_address, self.config.listen_port);
                ListenChannel::bind(addr, self.config.reuse_address, self.config.accept_queue_size)
            }
            Some(listener) => {
                tracing::info!("using channel set by activator: {:?}", listener.local_addr());
                ListenChannel::adopt(listener, self.config.reuse_address)
            }
        };

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!(
                    "connector {} failed to open port {}: {}",
                    self.config.name,
                    self.config.listen_port,
                    e
                );
                self.set_state(ConnectorState::Closed);
                return Err(e);
            }
        };

        let port = channel.local_port();
        if port != self.config.listen_port {
            tracing::info!(
                "connector {} configured for port {} is bound to port {}",
                self.config.name,
                self.config.listen_port,
                port
            );
        }

        let metrics = MetricContextCache::new(self.backend.clone(), self.keys.clone(), &self.config.name, port);
        let handle = Arc::new(ConnectorHandle {
            config: self.config.clone(),
            listen_port: port,
            origin: channel.origin(),
            metrics,
            statistics: self.statistics.clone(),
        });
        // Only set once: the state check above runs under the channel lock.
        let _ = self.handle.set(handle);

        tracing::info!(
            "connector {} listening on {} ({:?})",
            self.config.name,
            channel.local_addr(),
            channel.origin()
        );
        *slot = Some(Arc::new(channel));
        self.set_state(ConnectorState::Open);
        Ok(())
    }

    /// Handle to the opened connector.
    pub fn handle(&self) -> Result<Arc<ConnectorHandle>, ConnectorError> {
        self.handle
            .get()
            .cloned()
            .ok_or_else(|| ConnectorError::NotOpen(self.config.name.clone()))
    }

    /// Bound port once open, the configured port before.
    pub fn listen_port(&self) -> u16 {
        self.handle
            .get()
            .map(|h| h.listen_port())
            .unwrap_or(self.config.listen_port)
    }

    pub fn connector_metric_context(&self) -> Result<MetricContextRef, ConnectorError> {
        Ok(self.handle()?.connector_metric_context())
    }

    pub fn request_metric_context(&self, method: &str, scheme: &str) -> Result<MetricContextRef, ConnectorError> {
        Ok(self.handle()?.request_metric_context(method, scheme))
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Throttler state, if throttling is enabled.
    pub fn throttle_state(&self) -> Option<ThrottleState> {
        self.throttler.as_ref().map(|t| t.state())
    }

    /// Apply the configured socket options to an accepted socket.
    pub fn configure_accepted_socket(&self, stream: &TcpStream) {
        self.configurator.configure(stream);
    }

    /// Accept one connection.
    ///
    /// Waits out any throttling delay first. Returns `Ok(None)` once the
    /// connector is shutting down.
    pub async fn accept(&self) -> Result<Option<AcceptedConnection>, ConnectorError> {
        let handle = self.handle()?;
        let channel = self.channel.lock().clone();
        let Some(channel) = channel else {
            return Ok(None);
        };
        if self.shutdown.is_shutdown() {
            return Ok(None);
        }
        let _ = self.state.compare_exchange(
            ConnectorState::Open.as_u8(),
            ConnectorState::Accepting.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let ctx = handle.connector_metric_context();

        if let Some(throttler) = &self.throttler {
            match throttler.admit(&self.shutdown).await {
                Admission::Immediate => {}
                Admission::Delayed(_) => self.backend.add(metric_names::CONNECTIONS_THROTTLED, 1, &ctx),
                Admission::Cancelled => return Ok(None),
            }
        }

        let (stream, peer) = tokio::select! {
            res = channel.accept() => match res {
                Ok(accepted) => accepted,
                Err(source) => {
                    self.backend.add(metric_names::ACCEPT_ERRORS, 1, &ctx);
                    return Err(ConnectorError::Accept {
                        port: handle.listen_port(),
                        source,
                    });
                }
            },
            _ = self.shutdown.cancelled() => return Ok(None),
        };

        self.configurator.configure(&stream);
        let guard = self.statistics.open_guard();
        if let Some(throttler) = &self.throttler {
            throttler.record_accept();
        }

        self.backend.add(metric_names::CONNECTIONS_ACCEPTED, 1, &ctx);
        self.record_active(&ctx);
        tracing::trace!("connector {} accepted {}", self.config.name, peer);

        Ok(Some(AcceptedConnection {
            stream,
            peer,
            connector: handle,
            guard,
        }))
    }

    fn record_active(&self, ctx: &MetricContextRef) {
        self.backend
            .set(metric_names::CONNECTIONS_ACTIVE, self.statistics.active() as f64, ctx);
    }

    /// Run `acceptors` accept loops until shutdown.
    ///
    /// Each accepted connection is handled on its own task.
    pub async fn serve(
        self: &Arc<Self>,
        handler: Arc<dyn ConnectionHandler<AcceptedConnection>>,
    ) -> Result<(), ConnectorError> {
        self.handle()?;

        let mut acceptors = JoinSet::new();
        for id in 0..self.config.acceptors {
            let connector = self.clone();
            let handler = handler.clone();
            acceptors.spawn(async move { connector.accept_loop(id, handler).await });
        }

        while let Some(res) = acceptors.join_next().await {
            if let Err(e) = res {
                tracing::error!("connector {} acceptor task failed: {}", self.config.name, e);
            }
        }
        Ok(())
    }

    #[cfg_attr(coverage_nightly, coverage(off))]
    async fn accept_loop(
        self: Arc<Self>,
        id: usize,
        handler: Arc<dyn ConnectionHandler<AcceptedConnection>>,
    ) {
        tracing::debug!("connector {} acceptor {} started", self.config.name, id);
        loop {
            match self.accept().await {
                Ok(Some(connection)) => {
                    let handler = handler.clone();
                    let connector = self.clone();
                    tokio::spawn(async move {
                        let ctx = connection.connector().connector_metric_context();
                        handler.handle(connection).await;
                        connector.record_active(&ctx);
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("connector {}: {}", self.config.name, e);
                    if !self.shutdown.sleep(ACCEPT_ERROR_BACKOFF).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!("connector {} acceptor {} stopped", self.config.name, id);
    }

    /// Stop accepting. Does not wait; safe to call from any task.
    pub fn shutdown(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                match ConnectorState::from_u8(current) {
                    ConnectorState::Unopened => Some(ConnectorState::Closed.as_u8()),
                    ConnectorState::Open | ConnectorState::Accepting => {
                        Some(ConnectorState::Draining.as_u8())
                    }
                    ConnectorState::Draining | ConnectorState::Closed => None,
                }
            });
        self.shutdown.shutdown();
    }

    /// Shut down, wait for live connections up to the drain timeout, and
    /// release the channel.
    ///
    /// Returns `false` if connections were still open at the timeout.
    pub async fn close(&self) -> bool {
        self.shutdown();
        let drained = self
            .statistics
            .wait_for_drain(self.config.drain_timeout())
            .await;

        let released = self.channel.lock().take();
        self.set_state(ConnectorState::Closed);
        if released.is_some() {
            let stats = self.statistics.snapshot();
            tracing::info!(
                "connector {} closed (accepted={}, active={}, throttled={})",
                self.config.name,
                stats.accepted,
                stats.active,
                stats.throttled
            );
        }
        drained
    }
}
