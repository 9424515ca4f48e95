//! Connection lifecycle for a single TCPB server.
//!
//! A `Connection` owns at most one live socket. It is created unconnected,
//! moves to `Connected` on a successful [`Connection::connect`], and leaves
//! that state either through [`Connection::disconnect`] or because the
//! framing layer hit an unrecoverable I/O error (state `Closed`).

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, TcpbError};
use crate::models::Endpoint;

/// Connect, send and recv timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(15);

/// A connected byte stream the framing layer can drive.
///
/// Implemented for `TcpStream`. Other implementations let callers supply
/// pre-connected or in-memory streams.
pub trait SocketStream: Read + Write + Send {
    /// Shut down both directions of the stream.
    fn shutdown(&self) -> io::Result<()>;
}

impl SocketStream for TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected.
    Unconnected,
    Connected,
    /// Dropped after a transport or protocol failure.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client's single connection to a TCPB server.
pub struct Connection {
    pub(super) endpoint: Endpoint,
    pub(super) timeout: Duration,
    pub(super) stream: Option<Box<dyn SocketStream>>,
    pub(super) state: ConnectionState,
}

impl Connection {
    /// Create an unconnected connection to `endpoint`.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            stream: None,
            state: ConnectionState::Unconnected,
        }
    }

    /// Wrap an already-connected stream.
    pub fn with_stream(endpoint: Endpoint, stream: Box<dyn SocketStream>) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_SOCKET_TIMEOUT,
            stream: Some(stream),
            state: ConnectionState::Connected,
        }
    }

    /// Resolve the endpoint, connect, and set send/recv timeouts.
    ///
    /// A live connection is dropped first, so at most one socket exists.
    ///
    /// # Errors
    ///
    /// Returns `TcpbError::Connection` if the hostname does not resolve,
    /// every resolved address refuses the connection, or a timeout cannot
    /// be applied. No connection exists afterwards.
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            info!(endpoint = %self.endpoint, "Replacing existing connection");
            self.disconnect();
        }

        let addrs: Vec<SocketAddr> = (self.endpoint.host(), self.endpoint.port())
            .to_socket_addrs()
            .map_err(|e| self.connection_error(e))?
            .collect();
        if addrs.is_empty() {
            return Err(self.connection_error(io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not look up hostname {}", self.endpoint.host()),
            )));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    self.configure(&stream)?;
                    info!(endpoint = %self.endpoint, %addr, "Connected to TCPB server");
                    self.stream = Some(Box::new(stream));
                    self.state = ConnectionState::Connected;
                    return Ok(());
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected));
        warn!(endpoint = %self.endpoint, error = %source, "Could not connect to TCPB server");
        Err(self.connection_error(source))
    }

    /// Shut down and release the socket. A no-op when not connected.
    pub fn disconnect(&mut self) {
        self.close(ConnectionState::Unconnected);
    }

    /// Ask the server whether it is idle. Does not reserve the server.
    pub fn is_available(&mut self) -> Result<bool> {
        let status = self.request_status("IsAvailable() status")?;
        Ok(!status.busy)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn close(&mut self, state: ConnectionState) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                // Peer may already be gone; the socket is released either way.
                debug!(endpoint = %self.endpoint, error = %e, "Socket shutdown reported an error");
            }
            info!(endpoint = %self.endpoint, %state, "Disconnected from TCPB server");
            self.state = state;
        }
    }

    fn configure(&self, stream: &TcpStream) -> Result<()> {
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| self.connection_error(e))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| self.connection_error(e))?;
        Ok(())
    }

    fn connection_error(&self, source: io::Error) -> TcpbError {
        TcpbError::Connection {
            endpoint: self.endpoint.clone(),
            source,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
