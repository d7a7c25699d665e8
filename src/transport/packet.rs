use crate::error_handling::types::TransportError;
use crate::protocol::msg_id;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Size of the `msg_id || length` header.
pub const HEADER_LEN: usize = 8;
/// Bodies above this length are treated as a corrupt stream.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub msg_id: u32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(msg_id: u32, body: Vec<u8>) -> Self {
        Self { msg_id, body }
    }

    /// Header-only packet.
    pub fn empty(msg_id: u32) -> Self {
        Self {
            msg_id,
            body: Vec::new(),
        }
    }

    pub fn json<T: Serialize>(msg_id: u32, body: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(body).map_err(|e| TransportError::Encode(e.to_string()))?;
        Ok(Self { msg_id, body })
    }

    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            TransportError::Decode(format!("{}: {}", msg_id::name(self.msg_id), e))
        })
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.wire_len());
        frame.extend_from_slice(&self.msg_id.to_be_bytes());
        frame.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&self.body);
        frame
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("msg_id", &msg_id::name(self.msg_id))
            .field("len", &self.body.len())
            .finish()
    }
}

/// Per-socket accumulator turning a byte stream into packets.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_body_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_BODY_LEN)
    }
}

impl FrameDecoder {
    pub fn new(max_body_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_body_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete packet, `None` while only a partial tail is buffered.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let msg_id = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if len > self.max_body_len {
            return Err(TransportError::Framing(format!(
                "implausible length {} for msg_id {}",
                len, msg_id
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let body = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(Packet { msg_id, body }))
    }

    /// Every complete packet currently buffered.
    pub fn drain_packets(&mut self) -> Result<Vec<Packet>, TransportError> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }
}
