//! Response pipes - decouple the reader task from the HTTP response writer.
//!
//! Each request gets two independent in-memory pipes, one for the peer's
//! stdout stream and one for stderr. The reader task holds the writer ends
//! while the request is in flight; the consumer reads the other ends
//! (usually through [`ResponsePipe::write_to`]). The pipes have bounded
//! buffers, so a stalled consumer eventually stalls the transport reader
//! instead of growing memory.

use std::sync::Arc;

use tokio::io::{simplex, AsyncWriteExt, ReadHalf, SimplexStream, WriteHalf};
use tokio::sync::Mutex;

/// Pipe buffer size: one maximally-sized record per stream.
const PIPE_BUF: usize = 64 * 1024;

/// Writer ends of the two response pipes.
pub(crate) struct PipeWriters {
    pub(crate) stdout: WriteHalf<SimplexStream>,
    pub(crate) stderr: WriteHalf<SimplexStream>,
}

impl PipeWriters {
    /// Shut both writer ends down, surfacing EOF to the readers.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stdout.shutdown().await;
        let _ = self.stderr.shutdown().await;
    }
}

/// Shared handoff slot for the writer ends.
///
/// The reader task takes the writers out when it starts; whoever ends up
/// holding them shuts them down exactly once. A `close` that finds the slot
/// empty is a no-op, which makes closing safe to call multiple times.
pub(crate) type SharedWriters = Arc<Mutex<Option<PipeWriters>>>;

/// Close the writer ends still in the shared slot, if any.
pub(crate) async fn close_writers(writers: &SharedWriters) {
    if let Some(mut w) = writers.lock().await.take() {
        w.shutdown().await;
    }
}

/// The stdout and stderr streams of one FastCGI request.
///
/// Returned by `Client::send`; consume it with
/// [`write_to`](ResponsePipe::write_to).
pub struct ResponsePipe {
    pub(crate) stdout: ReadHalf<SimplexStream>,
    pub(crate) stderr: ReadHalf<SimplexStream>,
    pub(crate) writers: SharedWriters,
}

impl ResponsePipe {
    /// Create a fresh pipe pair plus the shared writer-end slot.
    pub(crate) fn new() -> (Self, SharedWriters) {
        let (stdout_read, stdout_write) = simplex(PIPE_BUF);
        let (stderr_read, stderr_write) = simplex(PIPE_BUF);
        let writers = Arc::new(Mutex::new(Some(PipeWriters {
            stdout: stdout_write,
            stderr: stderr_write,
        })));
        (
            Self {
                stdout: stdout_read,
                stderr: stderr_read,
                writers: writers.clone(),
            },
            writers,
        )
    }

    /// Close both writer ends. Safe to call multiple times.
    ///
    /// The request coordinator does this once the request finishes; calling
    /// it earlier makes the readers observe EOF.
    pub async fn close(&self) {
        close_writers(&self.writers).await;
    }
}
