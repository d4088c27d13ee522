//! Wire protocol: message envelope and form-feed framing.
//!
//! Every message is a UTF-8 JSON object `{"type": ..., "content": ...}`
//! terminated by a single form-feed byte. The receiver buffers socket reads
//! and splits on the terminator; a zero-byte read mid-frame means the peer
//! is gone.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time;

use crate::error::{BridgeError, Result};

/// Frame terminator.
pub const FRAME_END: u8 = 0x0C;

/// Socket read chunk size.
const READ_CHUNK: usize = 4096;

/// Channel description triple: kind, shape descriptor, annotations.
/// Serializes as a three-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDesc(
    pub String,
    pub Option<String>,
    pub BTreeMap<String, String>,
);

/// Reason/exception payload of `close` and `exception` messages. The
/// `exception` key is omitted entirely when absent; its value is a stable
/// taxonomy ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<u8>,
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum WireMsg {
    /// Server → client, once after accept: the full channel layout.
    Description(BTreeMap<String, ChannelDesc>),
    /// Serialized values for the channels written since the last update.
    Update(BTreeMap<String, Json>),
    /// Terminal teardown, optionally carrying a taxonomy error ID.
    Close(Signal),
    /// Non-terminal error relay; the session continues.
    Exception(Signal),
}

/// One frame-delimited connection over a unix stream socket.
#[derive(Debug)]
pub struct FramedConn {
    stream: UnixStream,
    buf: BytesMut,
}

impl FramedConn {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Encodes and transmits one frame.
    pub async fn send(&mut self, msg: &WireMsg) -> Result<()> {
        let frame = encode_frame(msg)?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(map_disconnect)?;
        Ok(())
    }

    /// Best-effort non-blocking send used during teardown.
    pub fn send_nonblocking(&mut self, msg: &WireMsg) {
        if let Ok(frame) = encode_frame(msg) {
            let _ = self.stream.try_write(&frame);
        }
    }

    /// Receives one complete frame, applying `timeout` to each socket read.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<WireMsg> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == FRAME_END) {
                let frame = self.buf.split_to(pos);
                self.buf.advance(1);
                return serde_json::from_slice(&frame)
                    .map_err(|e| BridgeError::Protocol(format!("bad frame: {e}")));
            }
            self.buf.reserve(READ_CHUNK);
            let read = self.stream.read_buf(&mut self.buf);
            let n = match timeout {
                Some(limit) => time::timeout(limit, read)
                    .await
                    .map_err(|_| BridgeError::Timeout)?,
                None => read.await,
            }
            .map_err(map_disconnect)?;
            if n == 0 {
                return Err(BridgeError::Closed { reason: None });
            }
        }
    }
}

fn encode_frame(msg: &WireMsg) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(msg)
        .map_err(|e| BridgeError::Protocol(format!("encode frame: {e}")))?;
    if frame.contains(&FRAME_END) {
        return Err(BridgeError::Protocol(
            "message contains a stray form feed".to_string(),
        ));
    }
    frame.push(FRAME_END);
    Ok(frame)
}

fn map_disconnect(e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => BridgeError::Closed { reason: None },
        _ => BridgeError::Io(e),
    }
}
