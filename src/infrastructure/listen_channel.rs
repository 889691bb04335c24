//! Listening Channel
//!
//! Owns the listening socket of a connector. A channel is either opened
//! here (socket, bind, listen) or adopted from an external activator
//! that already bound it, so a restart never drops the bound port.

use crate::error::ConnectorError;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// First file descriptor passed by a systemd-style socket activator.
#[cfg(unix)]
const SD_LISTEN_FDS_START: std::os::unix::io::RawFd = 3;

/// How the connector came to own its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrigin {
    SelfOpened,
    Adopted,
}

/// A bound, listening TCP channel.
///
/// Must be constructed inside a tokio runtime.
#[derive(Debug)]
pub struct ListenChannel {
    listener: TcpListener,
    local_addr: SocketAddr,
    origin: ChannelOrigin,
}

impl ListenChannel {
    /// Open, bind and listen on `addr`.
    pub fn bind(addr: SocketAddr, reuse_address: bool, backlog: u32) -> Result<Self, ConnectorError> {
        let port = addr.port();
        let bind_err = |source: io::Error| ConnectorError::Bind { port, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(reuse_address).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket
            .listen(backlog.min(i32::MAX as u32) as i32)
            .map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let listener = TcpListener::from_std(socket.into()).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        Ok(Self {
            listener,
            local_addr,
            origin: ChannelOrigin::SelfOpened,
        })
    }

    /// Take ownership of a channel another process already bound.
    ///
    /// The channel is never rebound; its actual local port is read back
    /// and becomes the port of this channel. A channel that is bound but
    /// not yet listening is refused.
    pub fn adopt(listener: std::net::TcpListener, reuse_address: bool) -> Result<Self, ConnectorError> {
        let local_addr = {
            let socket = SockRef::from(&listener);
            socket
                .set_reuse_address(reuse_address)
                .map_err(ConnectorError::Adopt)?;

            let local_addr = listener.local_addr().map_err(ConnectorError::Adopt)?;
            if local_addr.port() == 0 {
                return Err(ConnectorError::ChannelNotBound(local_addr.port()));
            }
            if !is_listening(&socket)? {
                return Err(ConnectorError::ChannelNotListening(local_addr.port()));
            }
            local_addr
        };

        listener.set_nonblocking(true).map_err(ConnectorError::Adopt)?;
        let listener = TcpListener::from_std(listener).map_err(ConnectorError::Adopt)?;

        Ok(Self {
            listener,
            local_addr,
            origin: ChannelOrigin::Adopted,
        })
    }

    /// Listener handed over by a socket activator, if this process was activated.
    #[cfg(unix)]
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn from_activator_env() -> Option<std::net::TcpListener> {
        use std::os::unix::io::FromRawFd;

        let fd = activator_fd(
            std::env::var("LISTEN_PID").ok().as_deref(),
            std::env::var("LISTEN_FDS").ok().as_deref(),
            std::process::id(),
        )?;
        // SAFETY: the activation protocol transfers ownership of this descriptor
        // to the process named by LISTEN_PID, which was checked above.
        Some(unsafe { std::net::TcpListener::from_raw_fd(fd) })
    }

    #[cfg(not(unix))]
    pub fn from_activator_env() -> Option<std::net::TcpListener> {
        None
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn origin(&self) -> ChannelOrigin {
        self.origin
    }

    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }
}

/// Whether the socket is in the listening state (SO_ACCEPTCONN).
#[cfg(any(target_os = "android", target_os = "freebsd", target_os = "fuchsia", target_os = "linux"))]
fn is_listening(socket: &SockRef<'_>) -> Result<bool, ConnectorError> {
    socket.is_listener().map_err(ConnectorError::Adopt)
}

/// Platforms without SO_ACCEPTCONN; the first accept reports the failure.
#[cfg(not(any(target_os = "android", target_os = "freebsd", target_os = "fuchsia", target_os = "linux")))]
fn is_listening(_socket: &SockRef<'_>) -> Result<bool, ConnectorError> {
    Ok(true)
}

/// Descriptor to adopt given the activator environment.
#[cfg(unix)]
fn activator_fd(listen_pid: Option<&str>, listen_fds: Option<&str>, own_pid: u32) -> Option<std::os::unix::io::RawFd> {
    let pid: u32 = listen_pid?.trim().parse().ok()?;
    if pid != own_pid {
        return None;
    }
    let count: u32 = listen_fds?.trim().parse().ok()?;
    if count == 0 {
        return None;
    }
    if count > 1 {
        tracing::warn!("activator passed {} channels, adopting the first", count);
    }
    Some(SD_LISTEN_FDS_START)
}
