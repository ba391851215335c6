//! Protocol module - FastCGI record framing and fixed-size bodies.
//!
//! Implements the FastCGI 1.0 wire format:
//! - 8-byte record header encoding/decoding
//! - Record buffer for accumulating partial reads
//! - Name-value pair length codec (Params / GetValues payloads)
//! - BeginRequest / EndRequest body codecs

mod record;
mod wire;

/// An encoder and decoder for FastCGI name-value pairs.
pub mod nv;

pub use record::{BeginRequestBody, EndRequestBody, Record, RecordBuffer};
pub use wire::{
    ProtocolStatus, RecordHeader, RecordType, Role, HEADER_LEN, MANAGEMENT_REQUEST_ID,
    MAX_CONTENT_LEN, MAX_PADDING, VERSION_1,
};
