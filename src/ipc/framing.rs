//! Length-prefixed framing over a [`Connection`](super::Connection).
//!
//! Two layers:
//!
//! - [`send_n`] / [`recv_n`] loop raw socket calls until the whole buffer
//!   moved, the peer stopped making progress, or an error occurred.
//! - `handle_send` / `handle_recv` add policy on top: zero-length sends
//!   skip the socket, an interrupted call is retried once, and anything
//!   short of a full transfer closes the connection.
//!
//! # Wire Format
//!
//! ```text
//! <message type: u32 BE><payload length: u32 BE><payload>
//! ```

use std::io::{self, Read, Write};

use prost::Message;
use tracing::{debug, trace, warn};

use super::connection::{Connection, ConnectionState};
use crate::error::{Result, TcpbError, TransportFailure};
use crate::proto::{MessageType, Status};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 8;

/// Maximum payload size (100MB) to prevent OOM from malicious/buggy servers.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// The 8-byte header in front of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u32,
    pub length: u32,
}

impl FrameHeader {
    /// Header for a payload of `len` bytes.
    ///
    /// # Errors
    ///
    /// `TcpbError::InvalidValue` if `len` exceeds [`MAX_MESSAGE_SIZE`].
    pub fn new(message_type: MessageType, len: usize) -> Result<Self> {
        if len > MAX_MESSAGE_SIZE {
            return Err(TcpbError::InvalidValue {
                field: "payload",
                value: format!("{} bytes exceeds maximum {} bytes", len, MAX_MESSAGE_SIZE),
            });
        }
        Ok(Self {
            message_type: message_type.code(),
            length: len as u32,
        })
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut bytes = [0u8; FRAME_HEADER_LEN];
        bytes[..4].copy_from_slice(&self.message_type.to_be_bytes());
        bytes[4..].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            message_type: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// A raw socket error, with the bytes already moved before it happened.
#[derive(Debug)]
pub struct PartialIo {
    pub transferred: usize,
    pub source: io::Error,
}

/// Write until `buf` is fully sent or the writer stops making progress.
///
/// Returns the number of bytes sent, which is less than `buf.len()` only if
/// a write reported zero bytes.
pub fn send_n<W: Write + ?Sized>(
    writer: &mut W,
    buf: &[u8],
) -> std::result::Result<usize, PartialIo> {
    let mut sent = 0;
    while sent < buf.len() {
        match writer.write(&buf[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(source) => {
                return Err(PartialIo {
                    transferred: sent,
                    source,
                })
            }
        }
    }
    Ok(sent)
}

/// Read until `buf` is full or the peer performs an orderly shutdown.
///
/// Returns the number of bytes read, which is less than `buf.len()` only if
/// a read reported end of stream.
pub fn recv_n<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::result::Result<usize, PartialIo> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(source) => {
                return Err(PartialIo {
                    transferred: received,
                    source,
                })
            }
        }
    }
    Ok(received)
}

/// EINTR / EAGAIN: worth exactly one more attempt.
fn is_interrupted(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

impl Connection {
    /// Send all of `buf`, closing the connection on any failure.
    ///
    /// `context` names the packet in log output and errors.
    pub fn handle_send(&mut self, buf: &[u8], context: &str) -> Result<()> {
        if buf.is_empty() {
            trace!(context, "Skipping send of zero-length packet");
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(TcpbError::NotConnected)?;

        let outcome = match send_n(stream, buf) {
            Err(err) if is_interrupted(&err.source) => {
                debug!(context, endpoint = %self.endpoint, "Packet send was interrupted, trying again");
                let done = err.transferred;
                send_n(stream, &buf[done..])
                    .map(|n| done + n)
                    .map_err(|e| PartialIo {
                        transferred: done + e.transferred,
                        source: e.source,
                    })
            }
            other => other,
        };

        match outcome {
            Ok(sent) if sent == buf.len() => {
                debug!(context, endpoint = %self.endpoint, bytes = sent, "Successfully sent packet");
                Ok(())
            }
            Ok(sent) => Err(self.transport_failure(
                context,
                TransportFailure::Short {
                    transferred: sent,
                    expected: buf.len(),
                },
            )),
            Err(err) => Err(self.transport_failure(context, TransportFailure::Io(err.source))),
        }
    }

    /// Fill all of `buf`, closing the connection on any failure.
    pub fn handle_recv(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        if buf.is_empty() {
            trace!(context, "Skipping recv of zero-length packet");
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(TcpbError::NotConnected)?;

        let outcome = match recv_n(stream, buf) {
            Err(err) if is_interrupted(&err.source) => {
                debug!(context, endpoint = %self.endpoint, "Packet read was interrupted, trying again");
                let done = err.transferred;
                recv_n(stream, &mut buf[done..])
                    .map(|n| done + n)
                    .map_err(|e| PartialIo {
                        transferred: done + e.transferred,
                        source: e.source,
                    })
            }
            other => other,
        };

        match outcome {
            Ok(received) if received == buf.len() => {
                debug!(context, endpoint = %self.endpoint, bytes = received, "Successfully recv'd packet");
                Ok(())
            }
            Ok(0) => Err(self.transport_failure(context, TransportFailure::PeerClosed)),
            Ok(received) => Err(self.transport_failure(
                context,
                TransportFailure::Short {
                    transferred: received,
                    expected: buf.len(),
                },
            )),
            Err(err) => Err(self.transport_failure(context, TransportFailure::Io(err.source))),
        }
    }

    /// Send a header plus payload.
    pub fn send_frame(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
        context: &str,
    ) -> Result<()> {
        let header = FrameHeader::new(message_type, payload.len())?;
        self.handle_send(&header.to_bytes(), &format!("{} header", context))?;
        self.handle_send(payload, &format!("{} payload", context))
    }

    /// Encode and send a protobuf message.
    pub fn send_message<M: Message>(
        &mut self,
        message_type: MessageType,
        message: &M,
        context: &str,
    ) -> Result<()> {
        self.send_frame(message_type, &message.encode_to_vec(), context)
    }

    /// Receive one frame and decode it as `M`.
    ///
    /// The payload is always drained before the type is checked, so the
    /// error reports what actually arrived.
    ///
    /// # Errors
    ///
    /// Transport errors from the underlying recv, or `TcpbError::Protocol`
    /// (with the connection closed) for an oversized frame, an unexpected
    /// message type, or a payload that does not decode.
    pub fn recv_message<M: Message + Default>(
        &mut self,
        expected: MessageType,
        context: &str,
    ) -> Result<M> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.handle_recv(&mut header, &format!("{} header", context))?;
        let header = FrameHeader::from_bytes(header);

        let len = header.length as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(self.protocol_failure(format!(
                "{} frame of {} bytes exceeds maximum {} bytes",
                context, len, MAX_MESSAGE_SIZE
            )));
        }

        let mut payload = vec![0u8; len];
        self.handle_recv(&mut payload, &format!("{} payload", context))?;

        if header.message_type != expected.code() {
            let got = MessageType::from_code(header.message_type)
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| format!("unknown type {}", header.message_type));
            return Err(self.protocol_failure(format!(
                "{}: expected {} message, got {}",
                context, expected, got
            )));
        }

        M::decode(payload.as_slice()).map_err(|e| {
            self.protocol_failure(format!("{}: malformed {} payload: {}", context, expected, e))
        })
    }

    /// Send an empty STATUS request and read the STATUS reply.
    pub fn request_status(&mut self, context: &str) -> Result<Status> {
        self.send_frame(MessageType::Status, &[], context)?;
        self.recv_message(MessageType::Status, context)
    }

    fn transport_failure(&mut self, context: &str, failure: TransportFailure) -> TcpbError {
        warn!(context, endpoint = %self.endpoint, %failure, "Transport failure, closing socket");
        self.close(ConnectionState::Closed);
        TcpbError::Transport {
            context: context.to_string(),
            failure,
        }
    }

    fn protocol_failure(&mut self, message: String) -> TcpbError {
        warn!(endpoint = %self.endpoint, "{}, closing socket", message);
        self.close(ConnectionState::Closed);
        TcpbError::Protocol(message)
    }
}
