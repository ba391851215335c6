//! Error types for the FastCGI client.

use thiserror::Error;

/// Main error type for all FastCGI client operations.
#[derive(Debug, Error)]
pub enum FcgiError {
    /// I/O error on the underlying transport or a response pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record header carried a FastCGI version other than 1.
    #[error("invalid FastCGI header version {0}")]
    InvalidVersion(u8),

    /// The transport reached EOF in the middle of a record, or before the
    /// peer finished a request.
    #[error("unexpected EOF from application transport")]
    ShortRead,

    /// A name-value pair length prefix claimed more bytes than remain.
    #[error("malformed name-value pair")]
    MalformedPair,

    /// A name or value is too large for the FastCGI length encoding.
    #[error("name-value pair part exceeds maximum encodable length")]
    PairTooLong,

    /// The client connection has been closed.
    #[error("client connection has been closed")]
    ConnectionClosed,

    /// The caller's cancellation handle fired before the peer finished.
    #[error("timeout or canceled")]
    Canceled,

    /// A CGI header line from the upstream exceeded the line budget.
    #[error("long header line from upstream")]
    LongHeaderLine,

    /// The upstream response ended before a complete header block.
    #[error("no headers in upstream response")]
    NoHeaders,

    /// A CGI header line did not contain a `:` separator.
    #[error("bogus header line: {0:?}")]
    BogusHeader(String),

    /// The `Status` header value was shorter than three characters.
    #[error("bogus status (short): {0:?}")]
    BogusStatusShort(String),

    /// The `Status` header value did not start with a decimal status code.
    #[error("bogus status: {0:?}")]
    BogusStatus(String),

    /// The upstream sent neither a `Status` nor a `Content-Type` header.
    #[error("missing required Content-Type in upstream headers")]
    MissingContentType,

    /// Copying the response body into the sink failed.
    #[error("body copy error: {0}")]
    BodyCopy(#[source] std::io::Error),

    /// Copying the stderr stream into the error sink failed.
    #[error("stderr copy error: {0}")]
    StderrCopy(#[source] std::io::Error),
}

/// Result type alias using [`FcgiError`].
pub type Result<T> = std::result::Result<T, FcgiError>;
