//! Socket Configurator
//!
//! Per-socket TCP options applied the moment a connection is accepted.

use crate::config::ConnectorConfig;
use socket2::SockRef;
use std::io;
use tokio::net::TcpStream;

/// Applies keep-alive and no-delay to accepted sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfigurator {
    keep_alive: bool,
    no_delay: bool,
}

impl SocketConfigurator {
    pub fn new(keep_alive: bool, no_delay: bool) -> Self {
        Self {
            keep_alive,
            no_delay,
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(config.tcp_keep_alive_enabled, config.tcp_no_delay)
    }

    /// Set the options, returning the first failure.
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let sock_ref = SockRef::from(stream);
        sock_ref.set_keepalive(self.keep_alive)?;
        sock_ref.set_nodelay(self.no_delay)?;
        Ok(())
    }

    /// Set the options, logging and ignoring failures.
    ///
    /// A peer that disconnected between accept and configure must not
    /// take down the accept loop.
    pub fn configure(&self, stream: &TcpStream) {
        if let Err(e) = self.apply(stream) {
            tracing::debug!("failed to set socket options: {}", e);
        }
    }
}
