//! Stream writers - split byte streams into records of a fixed type and ID.
//!
//! A FastCGI stream (Params, Stdin) is a sequence of records of one type,
//! closed by an empty record of that type. [`StreamWriter`] does the record
//! splitting; [`BufferedStreamWriter`] adds a record-sized buffer so small
//! writes coalesce into maximally-sized records.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWrite;

use crate::conn::Conn;
use crate::error::Result;
use crate::protocol::{RecordType, MAX_CONTENT_LEN};

/// Splits arbitrary-length payloads into records of at most
/// [`MAX_CONTENT_LEN`] bytes each.
pub(crate) struct StreamWriter<T> {
    conn: Arc<Conn<T>>,
    rtype: RecordType,
    request_id: u16,
}

impl<T: AsyncWrite> StreamWriter<T> {
    pub(crate) fn new(conn: Arc<Conn<T>>, rtype: RecordType, request_id: u16) -> Self {
        Self {
            conn,
            rtype,
            request_id,
        }
    }

    /// Write `data` as one or more complete records.
    ///
    /// Returns the number of bytes accepted; on error, bytes from chunks
    /// already written are counted.
    pub(crate) async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        let mut rest = data;
        while !rest.is_empty() {
            let n = rest.len().min(MAX_CONTENT_LEN);
            self.conn
                .write_record(self.rtype, self.request_id, &rest[..n])
                .await?;
            written += n;
            rest = &rest[n..];
        }
        Ok(written)
    }

    /// Close the stream with an empty record of the same type and ID.
    pub(crate) async fn close(&self) -> Result<()> {
        self.conn
            .write_record(self.rtype, self.request_id, &[])
            .await
    }
}

/// A [`StreamWriter`] with a record-sized buffer.
///
/// Writes accumulate until a full record's worth is available; `close`
/// flushes the remainder and then emits the empty terminator record.
pub(crate) struct BufferedStreamWriter<T> {
    inner: StreamWriter<T>,
    buf: BytesMut,
}

impl<T: AsyncWrite> BufferedStreamWriter<T> {
    pub(crate) fn new(conn: Arc<Conn<T>>, rtype: RecordType, request_id: u16) -> Self {
        Self {
            inner: StreamWriter::new(conn, rtype, request_id),
            buf: BytesMut::with_capacity(MAX_CONTENT_LEN),
        }
    }

    /// Buffer `data`, writing maximally-sized records as the buffer fills.
    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= MAX_CONTENT_LEN {
            let chunk = self.buf.split_to(MAX_CONTENT_LEN);
            self.inner.write(&chunk).await?;
        }
        Ok(())
    }

    /// Write out any buffered bytes as a final partial record.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let chunk = self.buf.split();
            self.inner.write(&chunk).await?;
        }
        Ok(())
    }

    /// Flush, then terminate the stream with an empty record.
    pub(crate) async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.inner.close().await
    }
}
