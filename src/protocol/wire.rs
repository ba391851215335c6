//! Wire format encoding and decoding.
//!
//! Implements the 8-byte FastCGI record header:
//! ```text
//! ┌─────────┬───────┬──────────┬─────────────┬─────────────┬──────────┐
//! │ Version │ Type  │ Req ID   │ Content Len │ Padding Len │ Reserved │
//! │ 1 byte  │ 1 byte│ 2 bytes  │ 2 bytes     │ 1 byte      │ 1 byte   │
//! │         │       │ uint16 BE│ uint16 BE   │             │          │
//! └─────────┴───────┴──────────┴─────────────┴─────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Every record body is padded so
//! that `content_length + padding_length` is a multiple of 8.

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_LEN: usize = 8;

/// The only FastCGI protocol version this crate speaks.
pub const VERSION_1: u8 = 1;

/// Maximum content length of a single record body.
pub const MAX_CONTENT_LEN: usize = 65535;

/// Maximum padding length following a record body.
pub const MAX_PADDING: usize = 255;

/// The fixed request ID for management records.
pub const MANAGEMENT_REQUEST_ID: u16 = 0;

/// FastCGI record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Starts a request and assigns its role and flags.
    BeginRequest = 1,
    /// Asks the peer to abandon a request.
    AbortRequest = 2,
    /// Ends a request; carries the application and protocol status.
    EndRequest = 3,
    /// Name-value pairs with the CGI environment (stream).
    Params = 4,
    /// Request body bytes (stream).
    Stdin = 5,
    /// Response body bytes (stream).
    Stdout = 6,
    /// Diagnostic output (stream).
    Stderr = 7,
    /// Extra data for the Filter role (stream).
    Data = 8,
    /// Management query for peer capabilities.
    GetValues = 9,
    /// Management reply to [`RecordType::GetValues`].
    GetValuesResult = 10,
    /// Management reply to an unrecognized record type.
    UnknownType = 11,
}

impl RecordType {
    /// Parse a record type from its wire byte.
    ///
    /// Returns `None` for bytes outside the defined range; the record is
    /// still framed correctly by [`super::RecordBuffer`] in that case, the
    /// dispatcher just cannot name it.
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            _ => return None,
        })
    }

    /// The constant name of this record type in the FastCGI specification.
    pub fn name(self) -> &'static str {
        match self {
            Self::BeginRequest => "FCGI_BEGIN_REQUEST",
            Self::AbortRequest => "FCGI_ABORT_REQUEST",
            Self::EndRequest => "FCGI_END_REQUEST",
            Self::Params => "FCGI_PARAMS",
            Self::Stdin => "FCGI_STDIN",
            Self::Stdout => "FCGI_STDOUT",
            Self::Stderr => "FCGI_STDERR",
            Self::Data => "FCGI_DATA",
            Self::GetValues => "FCGI_GET_VALUES",
            Self::GetValuesResult => "FCGI_GET_VALUES_RESULT",
            Self::UnknownType => "FCGI_UNKNOWN_TYPE",
        }
    }

    /// Whether records of this type may only appear with request ID 0.
    #[inline]
    pub fn is_management(self) -> bool {
        matches!(
            self,
            Self::GetValues | Self::GetValuesResult | Self::UnknownType
        )
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// FastCGI request roles.
///
/// Only [`Role::Responder`] is driven by this client; the other variants
/// exist so the wire value can be named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum Role {
    /// Computes an HTTP response from CGI variables and stdin.
    #[default]
    Responder = 1,
    /// Makes an allow/deny decision from CGI variables.
    Authorizer = 2,
    /// Transforms a data stream before it reaches the client.
    Filter = 3,
}

/// Protocol status carried in an EndRequest body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    /// Normal end of request.
    RequestComplete = 0,
    /// The peer rejects a second multiplexed request on this connection.
    CantMultiplex = 1,
    /// The peer is out of some resource, e.g. worker processes.
    Overloaded = 2,
    /// The peer does not implement the requested role.
    UnknownRole = 3,
}

impl ProtocolStatus {
    /// Parse a protocol status from its wire byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::RequestComplete,
            1 => Self::CantMultiplex,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            _ => return None,
        })
    }
}

/// Decoded FastCGI record header.
///
/// `rtype` is kept as the raw wire byte so that records of unknown type can
/// still be framed and skipped; use [`RecordType::from_byte`] to name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Protocol version; always [`VERSION_1`] on encode.
    pub version: u8,
    /// Raw record type byte.
    pub rtype: u8,
    /// The ID of the request this record belongs to (0 = management).
    pub request_id: u16,
    /// The length of this record's payload.
    pub content_length: u16,
    /// The amount of padding following the payload.
    pub padding_length: u8,
}

impl RecordHeader {
    /// Create a header for an outgoing record.
    ///
    /// The padding length is derived from the content length so that the
    /// padded body is 8-byte aligned.
    pub fn new(rtype: RecordType, request_id: u16, content_length: u16) -> Self {
        Self {
            version: VERSION_1,
            rtype: rtype as u8,
            request_id,
            content_length,
            padding_length: (content_length.wrapping_neg() & 7) as u8,
        }
    }

    /// Encode the header to its wire bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.rtype;
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        buf
    }

    /// Decode a header from wire bytes.
    ///
    /// Returns `None` if the buffer is too short. Version validation is the
    /// caller's job; see [`super::RecordBuffer`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            version: buf[0],
            rtype: buf[1],
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        })
    }

    /// Content plus padding, i.e. the number of body bytes on the wire.
    #[inline]
    pub fn padded_len(&self) -> usize {
        usize::from(self.content_length) + usize::from(self.padding_length)
    }

    /// A slice of `padding_length` zero bytes to append after the content.
    #[inline]
    pub fn padding_bytes(&self) -> &'static [u8] {
        static PADDING: [u8; MAX_PADDING] = [0; MAX_PADDING];
        &PADDING[..usize::from(self.padding_length)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = RecordHeader::new(RecordType::Stdout, 42, 100);
        let decoded = RecordHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = RecordHeader {
            version: 1,
            rtype: 9,
            request_id: 0x46af,
            content_length: 0x32a4,
            padding_length: 0x8b,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [0x01, 0x09, 0x46, 0xaf, 0x32, 0xa4, 0x8b, 0x00]);

        let parsed = RecordHeader::decode(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_size_is_exactly_8() {
        assert_eq!(HEADER_LEN, 8);
        let header = RecordHeader::new(RecordType::Params, 1, 0);
        assert_eq!(header.encode().len(), 8);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 7]; // one byte short
        assert!(RecordHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_padding_aligns_to_eight() {
        for content_length in [0u16, 1, 7, 8, 9, 1024, 65535] {
            let header = RecordHeader::new(RecordType::Stdin, 7, content_length);
            let body = u32::from(header.content_length) + u32::from(header.padding_length);
            assert_eq!(body % 8, 0, "record body is not 8-byte aligned");
            assert!(header.padding_length < 8);
        }
    }

    #[test]
    fn test_padding_bytes_are_zero() {
        let header = RecordHeader::new(RecordType::Stdin, 7, 3);
        assert_eq!(header.padding_length, 5);
        assert_eq!(header.padding_bytes().len(), 5);
        assert!(header.padding_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_record_type_from_byte() {
        for b in 1u8..=11 {
            let rtype = RecordType::from_byte(b).unwrap();
            assert_eq!(rtype as u8, b);
        }
        assert!(RecordType::from_byte(0).is_none());
        assert!(RecordType::from_byte(12).is_none());
        assert!(RecordType::from_byte(0xff).is_none());
    }

    #[test]
    fn test_record_type_names() {
        assert_eq!(RecordType::BeginRequest.name(), "FCGI_BEGIN_REQUEST");
        assert_eq!(RecordType::AbortRequest.name(), "FCGI_ABORT_REQUEST");
        assert_eq!(RecordType::EndRequest.to_string(), "FCGI_END_REQUEST");
    }

    #[test]
    fn test_management_types() {
        assert!(RecordType::GetValues.is_management());
        assert!(RecordType::GetValuesResult.is_management());
        assert!(RecordType::UnknownType.is_management());
        assert!(!RecordType::BeginRequest.is_management());
        assert!(!RecordType::Stdout.is_management());
    }

    #[test]
    fn test_protocol_status_from_byte() {
        assert_eq!(
            ProtocolStatus::from_byte(0),
            Some(ProtocolStatus::RequestComplete)
        );
        assert_eq!(
            ProtocolStatus::from_byte(3),
            Some(ProtocolStatus::UnknownRole)
        );
        assert!(ProtocolStatus::from_byte(4).is_none());
    }

    #[test]
    fn test_default_role_is_responder() {
        assert_eq!(Role::default(), Role::Responder);
        assert_eq!(Role::Responder as u16, 1);
    }
}
