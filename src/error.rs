//! Error types for the TCPB client.
//!
//! Failures fall into two groups. Local failures (`Precondition`,
//! `InvalidValue`, `InvalidState`) never touch the socket and leave the
//! connection usable. Connection, transport and protocol failures leave the
//! client without a live connection; a new `connect()` is required.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::JobState;
use crate::job::RequiredField;
use crate::models::Endpoint;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TcpbError>;

/// Client error taxonomy.
#[derive(Debug, Error)]
pub enum TcpbError {
    /// Hostname resolution, socket option, or connect failure.
    #[error("Connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// An operation needed the socket but no connection is live.
    #[error("Not connected to a TCPB server")]
    NotConnected,

    /// A send or recv was short, zero, or errored. The connection has
    /// already been closed when this is returned.
    #[error("Transport failure during {context}: {failure}")]
    Transport {
        context: String,
        failure: TransportFailure,
    },

    /// Job submission attempted before every required field was set.
    #[error("Job is missing required fields: {}", join_fields(.missing))]
    Precondition { missing: Vec<RequiredField> },

    /// A value was rejected before anything was sent.
    #[error("Invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    /// The server sent something the protocol does not allow here.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An async job primitive was called out of order.
    #[error("Cannot {operation} while job state is {state}")]
    InvalidState {
        operation: &'static str,
        state: JobState,
    },

    /// Polling for job completion exceeded the configured bound.
    #[error("Job did not complete within {}s", .0.as_secs())]
    JobTimeout(Duration),
}

impl TcpbError {
    /// Whether the error left the client without a live connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TcpbError::Connection { .. }
                | TcpbError::NotConnected
                | TcpbError::Transport { .. }
                | TcpbError::Protocol(_)
        )
    }
}

/// Why a framed send or recv could not deliver the whole buffer.
#[derive(Debug)]
pub enum TransportFailure {
    /// The socket call reported an error (after the single interrupt retry).
    Io(std::io::Error),
    /// The peer performed an orderly shutdown before any byte arrived.
    PeerClosed,
    /// Fewer bytes than requested were transferred.
    Short { transferred: usize, expected: usize },
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Io(err) => write!(f, "I/O error: {}", err),
            TransportFailure::PeerClosed => write!(f, "connection closed by server"),
            TransportFailure::Short {
                transferred,
                expected,
            } => write!(f, "only {} of {} bytes transferred", transferred, expected),
        }
    }
}

fn join_fields(fields: &[RequiredField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
