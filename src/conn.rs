//! Framed connection - owns the transport write half.
//!
//! All record writes go through a single mutex and a reusable scratch
//! buffer: header, content, and padding are assembled in the scratch and
//! handed to the transport in one write. This keeps records atomic on the
//! wire even when many request tasks write concurrently.
//!
//! The read direction has exactly one owner (the client's demultiplexing
//! reader task), so reads need no synchronization here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;

use crate::error::{FcgiError, Result};
use crate::protocol::{nv, BeginRequestBody, RecordHeader, RecordType, Role, MAX_CONTENT_LEN};
use crate::stream::BufferedStreamWriter;

struct WriteState<T> {
    io: WriteHalf<T>,
    scratch: BytesMut,
}

/// The write side of a FastCGI connection.
pub(crate) struct Conn<T> {
    writer: Mutex<WriteState<T>>,
    closed: AtomicBool,
}

impl<T: AsyncWrite> Conn<T> {
    pub(crate) fn new(io: WriteHalf<T>) -> Self {
        Self {
            writer: Mutex::new(WriteState {
                io,
                scratch: BytesMut::with_capacity(8 * 1024),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Write a single record: header, content, padding, one transport write.
    pub(crate) async fn write_record(
        &self,
        rtype: RecordType,
        request_id: u16,
        content: &[u8],
    ) -> Result<()> {
        debug_assert!(content.len() <= MAX_CONTENT_LEN);
        if self.closed.load(Ordering::Acquire) {
            return Err(FcgiError::ConnectionClosed);
        }

        let header = RecordHeader::new(rtype, request_id, content.len() as u16);
        let mut state = self.writer.lock().await;
        let state = &mut *state;
        state.scratch.clear();
        state.scratch.extend_from_slice(&header.encode());
        state.scratch.extend_from_slice(content);
        state.scratch.extend_from_slice(header.padding_bytes());
        state.io.write_all(&state.scratch).await?;
        state.io.flush().await?;
        Ok(())
    }

    /// Write a BeginRequest record for `request_id`.
    pub(crate) async fn write_begin_request(
        &self,
        request_id: u16,
        role: Role,
        keep_conn: bool,
    ) -> Result<()> {
        let body = BeginRequestBody { role, keep_conn };
        self.write_record(RecordType::BeginRequest, request_id, &body.encode())
            .await
    }

    /// Write an AbortRequest record for `request_id`.
    pub(crate) async fn write_abort_request(&self, request_id: u16) -> Result<()> {
        self.write_record(RecordType::AbortRequest, request_id, &[])
            .await
    }

    /// Serialize all pairs through a stream writer of `rtype`, then close
    /// the stream with its empty terminator record.
    pub(crate) async fn write_pairs<I, N, V>(
        self: &Arc<Self>,
        rtype: RecordType,
        request_id: u16,
        pairs: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut w = BufferedStreamWriter::new(self.clone(), rtype, request_id);
        let mut lens = [0u8; 4];
        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            let name_len = nv::check_len(name.len())?;
            let value_len = nv::check_len(value.len())?;

            let n = nv::encode_len(name_len, &mut lens);
            w.write(&lens[..n]).await?;
            let n = nv::encode_len(value_len, &mut lens);
            w.write(&lens[..n]).await?;
            w.write(name).await?;
            w.write(value).await?;
        }
        w.close().await
    }

    /// Shut the transport down. Idempotent: later calls are no-ops.
    pub(crate) async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.writer.lock().await;
        state.io.shutdown().await?;
        Ok(())
    }

    /// Whether [`Conn::close`] has been called.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
