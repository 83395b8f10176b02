//! Wire protocol codec for the node's raw TCP interface
//!
//! Every message is an 8-byte header followed by a payload:
//!
//! ```text
//! [size: u24 LE (header included)][type: u8][nonce: u32 LE][payload ...]
//! ```
//!
//! Incoming bytes accumulate in a [`FrameBuffer`] and are consumed only once
//! a whole frame is present, so partial TCP reads are harmless.

pub mod decoder;
pub mod filter;

pub use filter::GossipFilter;

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{OracleError, Result};

pub const HEADER_SIZE: usize = 8;
/// Largest size representable in the 24-bit header field
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;
pub const DEFAULT_PORT: u16 = 21841;

// Message types
pub const EXCHANGE_PUBLIC_PEERS: u8 = 0;
pub const REQUEST_CURRENT_TICK_INFO: u8 = 27;
pub const RESPOND_CURRENT_TICK_INFO: u8 = 28;
pub const END_RESPONSE: u8 = 35;
pub const REQUEST_ORACLE_DATA: u8 = 66;
pub const RESPOND_ORACLE_DATA: u8 = 67;

// REQUEST_ORACLE_DATA sub-query types
pub const REQ_ALL_QUERY_IDS: u32 = 0;
pub const REQ_QUERY_AND_RESPONSE: u32 = 5;

// RESPOND_ORACLE_DATA sub-type tags
pub const RESP_QUERY_IDS: u32 = 0;
pub const RESP_QUERY_METADATA: u32 = 1;
pub const RESP_QUERY_DATA: u32 = 2;
pub const RESP_REPLY_DATA: u32 = 3;
pub const RESP_TICK_RANGE: u32 = 9;

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub size: usize,
    pub msg_type: u8,
    pub nonce: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Sub-type tag and chunk of a `RESPOND_ORACLE_DATA` payload
    pub fn oracle_chunk(&self) -> Result<(u32, &[u8])> {
        if self.payload.len() < 4 {
            return Err(OracleError::MalformedFrame(format!(
                "oracle data payload of {} bytes has no sub-type tag",
                self.payload.len()
            )));
        }
        let tag = u32::from_le_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]);
        Ok((tag, &self.payload[4..]))
    }
}

/// Encode a frame: 3-byte LE total size, 1-byte type, 4-byte nonce, payload.
pub fn encode(msg_type: u8, nonce: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let size = HEADER_SIZE + payload.len();
    if size > MAX_FRAME_SIZE {
        return Err(OracleError::MalformedFrame(format!(
            "payload of {} bytes does not fit a 24-bit size",
            payload.len()
        )));
    }
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(size as u32).to_le_bytes()[..3]);
    out.push(msg_type);
    out.extend_from_slice(&nonce.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Payload of a `REQUEST_ORACLE_DATA` frame: sub-query type, padding, 8-byte argument.
pub fn oracle_request_payload(req_type: u32, tick_or_id: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&req_type.to_le_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&tick_or_id.to_le_bytes());
    payload
}

/// Growable receive buffer with a read cursor.
///
/// Consumed bytes are only reclaimed when the cursor passes half the
/// buffer, so each chunk is copied once on arrival. A header declaring less
/// than its own size leaves no way to find the next frame boundary, so the
/// buffer drops its contents and refuses every later frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    start: usize,
    corrupt: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        if self.corrupt {
            return;
        }
        if self.start > 0 && self.start * 2 >= self.buf.len() {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed
    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn try_take_frame(&mut self) -> Result<Option<Frame>> {
        if self.corrupt {
            return Err(OracleError::CorruptStream(
                "earlier frame header was invalid".to_string(),
            ));
        }
        let pending = &self.buf[self.start..];
        if pending.len() < HEADER_SIZE {
            return Ok(None);
        }
        let size = u32::from_le_bytes([pending[0], pending[1], pending[2], 0]) as usize;
        if size < HEADER_SIZE {
            self.buf.clear();
            self.start = 0;
            self.corrupt = true;
            return Err(OracleError::CorruptStream(format!(
                "declared size {} is smaller than the header",
                size
            )));
        }
        if pending.len() < size {
            return Ok(None);
        }
        let msg_type = pending[3];
        let nonce = u32::from_le_bytes([pending[4], pending[5], pending[6], pending[7]]);
        let payload = pending[HEADER_SIZE..size].to_vec();
        self.start += size;
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }
        Ok(Some(Frame {
            size,
            msg_type,
            nonce,
            payload,
        }))
    }
}

/// Anything that yields whole frames
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Frame>;
}

/// Raw frame source over a byte stream with a per-frame deadline
pub struct FrameReader<R> {
    inner: R,
    buffer: FrameBuffer,
    frame_timeout: Duration,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R, frame_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            inner,
            buffer: FrameBuffer::new(),
            frame_timeout,
            cancel,
        }
    }

    async fn fill_until_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.buffer.try_take_frame()? {
                return Ok(frame);
            }
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Err(OracleError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream closed with {} buffered bytes", self.buffer.len()),
                )));
            }
            self.buffer.extend(&chunk[..n]);
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for FrameReader<R> {
    async fn next_frame(&mut self) -> Result<Frame> {
        let frame_timeout = self.frame_timeout;
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(OracleError::Cancelled),
            res = tokio::time::timeout(frame_timeout, self.fill_until_frame()) => {
                res.map_err(|_| OracleError::FrameTimeout(frame_timeout))?
            }
        }
    }
}
