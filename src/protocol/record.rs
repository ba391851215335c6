//! Record buffer for accumulating partial reads, plus fixed-size bodies.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a state
//! machine for handling fragmented records:
//! - `WaitingForHeader`: need at least 8 bytes
//! - `WaitingForBody`: header parsed, need content + padding bytes
//!
//! Padding is consumed and discarded; only the content reaches the caller.

use bytes::{Bytes, BytesMut};

use super::wire::{ProtocolStatus, RecordHeader, Role, HEADER_LEN, VERSION_1};
use crate::error::{FcgiError, Result};

/// A complete FastCGI record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Decoded header.
    pub header: RecordHeader,
    /// Content bytes, without padding (zero-copy via `bytes::Bytes`).
    pub content: Bytes,
}

impl Record {
    /// Get a reference to the content bytes.
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u16 {
        self.header.request_id
    }

    /// Get the raw record type byte.
    #[inline]
    pub fn rtype(&self) -> u8 {
        self.header.rtype
    }
}

/// Parsing state for [`RecordBuffer`].
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for content + padding bytes.
    WaitingForBody(RecordHeader),
}

/// Buffer for accumulating incoming bytes and extracting complete records.
///
/// All data is stored in a single `BytesMut` to minimize allocations; the
/// content of each extracted record is split off without copying.
pub struct RecordBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
}

impl RecordBuffer {
    /// Create a new record buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
        }
    }

    /// Push data into the buffer and extract all complete records.
    ///
    /// Partial data is kept internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`FcgiError::InvalidVersion`] if a record header carries a
    /// version other than 1; the buffer is unusable afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Record>> {
        self.buffer.extend_from_slice(data);

        let mut records = Vec::new();
        while let Some(record) = self.try_extract_one()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Whether the buffer holds an unfinished record.
    ///
    /// A transport EOF while this is true means the peer stopped mid-record.
    pub fn is_partial(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForBody(_))
    }

    fn try_extract_one(&mut self) -> Result<Option<Record>> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_LEN {
                    return Ok(None);
                }

                let header = RecordHeader::decode(&self.buffer[..HEADER_LEN])
                    .expect("buffer holds a full header");
                if header.version != VERSION_1 {
                    return Err(FcgiError::InvalidVersion(header.version));
                }
                let _ = self.buffer.split_to(HEADER_LEN);

                self.state = State::WaitingForBody(header);
                self.try_extract_one()
            }

            State::WaitingForBody(header) => {
                if self.buffer.len() < header.padded_len() {
                    return Ok(None);
                }

                let content = self
                    .buffer
                    .split_to(usize::from(header.content_length))
                    .freeze();
                // discard padding
                let _ = self.buffer.split_to(usize::from(header.padding_length));

                self.state = State::WaitingForHeader;
                Ok(Some(Record { header, content }))
            }
        }
    }
}

impl Default for RecordBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of a BeginRequest record (8 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    /// The requested role.
    pub role: Role,
    /// Keep the connection open after the request completes.
    pub keep_conn: bool,
}

impl BeginRequestBody {
    /// Wire flag bit for keeping the connection open.
    const KEEP_CONN: u8 = 1;

    /// Encode the body into its 8 wire bytes.
    pub fn encode(&self) -> [u8; 8] {
        let role = self.role as u16;
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&role.to_be_bytes());
        buf[2] = if self.keep_conn { Self::KEEP_CONN } else { 0 };
        buf
    }

    /// Decode a body from wire bytes.
    ///
    /// Returns `None` on short input or an unknown role.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 8 {
            return None;
        }
        let role = match u16::from_be_bytes([buf[0], buf[1]]) {
            1 => Role::Responder,
            2 => Role::Authorizer,
            3 => Role::Filter,
            _ => return None,
        };
        Some(Self {
            role,
            keep_conn: buf[2] & Self::KEEP_CONN != 0,
        })
    }
}

/// Body of an EndRequest record (8 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    /// Application exit status.
    pub app_status: u32,
    /// Raw protocol status byte; see [`ProtocolStatus`].
    pub protocol_status: u8,
}

impl EndRequestBody {
    /// Encode the body into its 8 wire bytes.
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.app_status.to_be_bytes());
        buf[4] = self.protocol_status;
        buf
    }

    /// Decode a body from wire bytes. Returns `None` on short input.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 8 {
            return None;
        }
        Some(Self {
            app_status: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            protocol_status: buf[4],
        })
    }

    /// The named protocol status, if the byte is within the defined range.
    #[inline]
    pub fn status(&self) -> Option<ProtocolStatus> {
        ProtocolStatus::from_byte(self.protocol_status)
    }
}
