//! Meshtastic stream framing.
//!
//! Over both serial and TCP the radio speaks length-prefixed protobuf frames:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! Anything between frames (firmware debug text on serial, line noise) is
//! skipped by scanning forward to the next header. A header with an
//! implausible length is treated as noise and the scan resumes one byte later.
use bytes::{Buf, Bytes, BytesMut};

use crate::relay::transport::TransportError;

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;
/// Upper bound on a declared payload length.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Incremental frame decoder. Feed arbitrary chunks with [`push`](Self::push)
/// and drain whole payloads with [`next_frame`](Self::next_frame).
pub struct StreamFramer {
    buf: BytesMut,
    discarded: usize,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            discarded: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes dropped while resynchronizing, since creation.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.discarded += n;
    }

    /// Next complete payload, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.buf.windows(2).position(|w| w == [START1, START2]) {
                Some(0) => {}
                Some(pos) => self.discard(pos),
                None => {
                    // a lone trailing START1 may be the first half of a header
                    let keep = usize::from(self.buf.last() == Some(&START1));
                    let drop = self.buf.len() - keep;
                    if drop > 0 {
                        self.discard(drop);
                    }
                    return None;
                }
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            if declared == 0 || declared > MAX_FRAME_SIZE {
                self.discard(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).freeze());
        }
    }
}

/// Prefix `payload` with the stream header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Send(format!(
            "frame payload of {} bytes is out of range",
            payload.len()
        )));
    }
    let len = payload.len() as u16;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&[START1, START2]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
