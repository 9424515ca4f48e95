//! Socket layer for talking to a TCPB server.
//!
//! This module owns the single TCP connection of a client and moves whole
//! frames over it.
//!
//! # Protocol
//!
//! Every message, in both directions, is an 8-byte header followed by a
//! protobuf payload:
//!
//! ```text
//! | type: u32 BE | length: u32 BE | payload: `length` bytes |
//! ```
//!
//! A short, zero, or failed transfer leaves the stream out of frame
//! alignment, so any such failure closes the connection before the error
//! is returned. There is no resynchronization and no automatic reconnect.
//!
//! Every send/recv attempt is logged under the `tcpb::ipc` tracing target;
//! [`crate::logging`] can route those events to a transcript file.
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use tcpb::ipc::Connection;
//! use tcpb::models::Endpoint;
//!
//! let mut conn = Connection::new(Endpoint::new("localhost", 11111)?, Duration::from_secs(15));
//! conn.connect()?;
//! let idle = conn.is_available()?;
//! ```

mod connection;
mod framing;

pub use connection::{Connection, ConnectionState, SocketStream, DEFAULT_SOCKET_TIMEOUT};
pub use framing::{recv_n, send_n, FrameHeader, PartialIo, FRAME_HEADER_LEN, MAX_MESSAGE_SIZE};

#[cfg(test)]
pub(crate) mod testing;
