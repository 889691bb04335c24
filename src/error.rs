//! Connector errors.

use crate::config::ConfigError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to open listening channel on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to adopt activator channel: {0}")]
    Adopt(#[source] io::Error),
    #[error("activator channel is not bound (local port {0})")]
    ChannelNotBound(u16),
    #[error("activator channel on port {0} is not listening")]
    ChannelNotListening(u16),
    #[error("connector {0} is already opened")]
    AlreadyOpened(String),
    #[error("connector {0} is not open")]
    NotOpen(String),
    #[error("accept failed on port {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: io::Error,
    },
}
