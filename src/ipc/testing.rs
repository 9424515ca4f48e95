//! In-memory `SocketStream` with scripted reads and writes.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use prost::Message;

use super::connection::SocketStream;
use super::framing::FrameHeader;
use crate::proto::{JobOutput, MessageType, Status};

enum ReadStep {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

enum WriteStep {
    /// Accept at most this many bytes on the next write.
    Limit(usize),
    Error(io::ErrorKind),
}

#[derive(Default)]
struct Script {
    reads: VecDeque<ReadStep>,
    writes: VecDeque<WriteStep>,
    written: Vec<u8>,
    read_calls: usize,
    write_calls: usize,
    shut_down: bool,
}

/// Cloneable handle; clones share the same script so a test can keep one
/// while the connection owns another.
#[derive(Clone, Default)]
pub(crate) struct ScriptedStream {
    script: Arc<Mutex<Script>>,
}

impl ScriptedStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_bytes(&self, bytes: &[u8]) {
        self.script
            .lock()
            .unwrap()
            .reads
            .push_back(ReadStep::Data(bytes.to_vec()));
    }

    pub(crate) fn push_frame(&self, message_type: MessageType, payload: &[u8]) {
        let header = FrameHeader::new(message_type, payload.len()).unwrap();
        let mut frame = header.to_bytes().to_vec();
        frame.extend_from_slice(payload);
        self.push_bytes(&frame);
    }

    pub(crate) fn push_status(&self, status: &Status) {
        self.push_frame(MessageType::Status, &status.encode_to_vec());
    }

    pub(crate) fn push_output(&self, output: &JobOutput) {
        self.push_frame(MessageType::JobOutput, &output.encode_to_vec());
    }

    pub(crate) fn push_read_error(&self, kind: io::ErrorKind) {
        self.script
            .lock()
            .unwrap()
            .reads
            .push_back(ReadStep::Error(kind));
    }

    pub(crate) fn push_write_limit(&self, limit: usize) {
        self.script
            .lock()
            .unwrap()
            .writes
            .push_back(WriteStep::Limit(limit));
    }

    pub(crate) fn push_write_error(&self, kind: io::ErrorKind) {
        self.script
            .lock()
            .unwrap()
            .writes
            .push_back(WriteStep::Error(kind));
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.script.lock().unwrap().written.clone()
    }

    /// Frame headers of everything written so far.
    pub(crate) fn sent_headers(&self) -> Vec<FrameHeader> {
        let written = self.written();
        let mut headers = Vec::new();
        let mut rest = written.as_slice();
        while rest.len() >= 8 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&rest[..8]);
            let header = FrameHeader::from_bytes(bytes);
            rest = &rest[8 + header.length as usize..];
            headers.push(header);
        }
        headers
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.script.lock().unwrap().read_calls
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.script.lock().unwrap().write_calls
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.script.lock().unwrap().shut_down
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        script.read_calls += 1;
        match script.reads.pop_front() {
            None => Ok(0),
            Some(ReadStep::Error(kind)) => Err(kind.into()),
            Some(ReadStep::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    script.reads.push_front(ReadStep::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        script.write_calls += 1;
        let n = match script.writes.pop_front() {
            None => buf.len(),
            Some(WriteStep::Limit(limit)) => limit.min(buf.len()),
            Some(WriteStep::Error(kind)) => return Err(kind.into()),
        };
        script.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SocketStream for ScriptedStream {
    fn shutdown(&self) -> io::Result<()> {
        self.script.lock().unwrap().shut_down = true;
        Ok(())
    }
}
