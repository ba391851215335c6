//! Client - request coordination over a shared FastCGI connection.
//!
//! Every request spawns three cooperating tasks:
//!
//! ```text
//! send() ─┬─► writer task ──► BeginRequest, Params, Stdin ──► transport
//!         ├─► reader task ◄── per-request record channel ◄── demultiplexer ◄── transport
//!         └─► supervisor ──► joins both, drains errors into the stderr
//!                            pipe, releases the request ID, closes pipes
//! ```
//!
//! A single demultiplexing reader task owns the transport read half and
//! dispatches records to per-request channels by request ID, so many
//! requests can be in flight on one connection at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, SimplexStream, WriteHalf,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::conn::Conn;
use crate::error::{FcgiError, Result};
use crate::id::IdPool;
use crate::pipe::{close_writers, PipeWriters, ResponsePipe, SharedWriters};
use crate::protocol::{
    EndRequestBody, ProtocolStatus, Record, RecordBuffer, RecordType, Role, MANAGEMENT_REQUEST_ID,
};
use crate::stream::BufferedStreamWriter;

/// Records that may queue per request before the demultiplexer stalls.
const ROUTE_BUFFER: usize = 8;

type BoxedStream = Box<dyn AsyncRead + Send + Unpin>;

/// A logical FastCGI request: a role, a CGI parameter map, and an optional
/// stdin byte stream.
///
/// # Example
///
/// ```ignore
/// let request = Request::new()
///     .param("SCRIPT_FILENAME", "/var/www/index.php")
///     .param("REQUEST_METHOD", "GET")
///     .stdin(std::io::Cursor::new(body));
/// let mut pipe = client.send(request).await?;
/// ```
pub struct Request {
    role: Role,
    params: HashMap<String, String>,
    keep_conn: bool,
    stdin: Option<BoxedStream>,
    data: Option<BoxedStream>,
    cancel: CancellationToken,
}

impl Request {
    /// Create an empty Responder request with no parameters and no stdin.
    pub fn new() -> Self {
        Self {
            role: Role::Responder,
            params: HashMap::new(),
            keep_conn: true,
            stdin: None,
            data: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Add a CGI parameter (`SCRIPT_FILENAME`, `REQUEST_METHOD`, ...).
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// The CGI parameter map, for callers that populate it in bulk.
    pub fn params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.params
    }

    /// Set the request role.
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Ask the peer to keep the connection open after this request.
    ///
    /// On the wire this is flag bit 0 of the BeginRequest body. Defaults to
    /// `true` since the client multiplexes requests over one connection.
    pub fn keep_conn(mut self, keep: bool) -> Self {
        self.keep_conn = keep;
        self
    }

    /// Supply the request body, streamed to the peer as Stdin records.
    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Supply the extra data stream of the Filter role.
    ///
    /// Reserved: the Responder driver does not transmit it.
    pub fn data(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.data = Some(Box::new(reader));
        self
    }

    /// Attach a cancellation handle; canceling it abandons the request.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

struct RouteRegistration {
    request_id: u16,
    tx: mpsc::Sender<Record>,
}

struct Shared<T> {
    conn: Arc<Conn<T>>,
    ids: IdPool,
    registrations: mpsc::UnboundedSender<RouteRegistration>,
    shutdown: CancellationToken,
}

/// A FastCGI client multiplexing requests over one transport.
///
/// Cheap to clone; all clones share the connection and the request ID pool.
pub struct Client<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Send + 'static> Client<T> {
    /// Create a client over a connected bidirectional transport.
    pub fn new(transport: T) -> Self {
        Self::with_request_limit(transport, 0)
    }

    /// Create a client with at most `limit` concurrent requests.
    ///
    /// 0 means no limit beyond the 16-bit request ID space.
    pub fn with_request_limit(transport: T, limit: u32) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let conn = Arc::new(Conn::new(write_half));
        let shutdown = CancellationToken::new();
        let (reg_tx, reg_rx) = mpsc::unbounded_channel();

        tokio::spawn(demux_loop(read_half, reg_rx, shutdown.clone()));

        Self {
            shared: Arc::new(Shared {
                conn,
                ids: IdPool::new(limit),
                registrations: reg_tx,
                shutdown,
            }),
        }
    }

    /// Dispatch a request and return its response pipe.
    ///
    /// Returns as soon as the request ID is allocated; the request itself is
    /// written and read by background tasks. Fatal request errors surface on
    /// the pipe's stderr stream, so the only direct error here is
    /// [`FcgiError::ConnectionClosed`].
    pub async fn send(&self, request: Request) -> Result<ResponsePipe> {
        if self.shared.conn.is_closed() {
            return Err(FcgiError::ConnectionClosed);
        }

        let Request {
            role,
            params,
            keep_conn,
            stdin,
            data,
            cancel,
        } = request;
        if data.is_some() {
            tracing::debug!("data stream is ignored for the Responder role");
        }

        let request_id = self.shared.ids.alloc().await;
        let (pipe, writers) = ResponsePipe::new();

        let (route_tx, route_rx) = mpsc::channel(ROUTE_BUFFER);
        let registration = RouteRegistration {
            request_id,
            tx: route_tx,
        };
        if self.shared.registrations.send(registration).is_err() {
            // the demultiplexer is gone, so the transport is dead
            self.shared.ids.release(request_id);
            return Err(FcgiError::ConnectionClosed);
        }

        let (error_tx, mut error_rx) = mpsc::unbounded_channel();

        let writer_task = {
            let conn = self.shared.conn.clone();
            let error_tx = error_tx.clone();
            tokio::spawn(async move {
                let result =
                    write_request(conn, request_id, role, keep_conn, params, stdin).await;
                if let Err(e) = result {
                    let _ = error_tx.send(e);
                }
            })
        };

        let reader_task = {
            let writers = writers.clone();
            tokio::spawn(async move {
                let (result, pipe_writers) = read_response(route_rx, writers, cancel).await;
                if let Err(e) = result {
                    let _ = error_tx.send(e);
                }
                pipe_writers
            })
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            supervise(
                request_id,
                writer_task,
                reader_task,
                &mut error_rx,
                writers,
            )
            .await;
            shared.ids.release(request_id);
        });

        Ok(pipe)
    }

    /// Close the client: stops the demultiplexer and shuts the transport.
    ///
    /// In-flight requests observe the closure on their stderr streams.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.shared.shutdown.cancel();
        self.shared.conn.close().await
    }
}

/// Joins the writer and reader halves of one request, drains the error
/// fan-in channel into the stderr pipe, and closes both pipe writers.
async fn supervise(
    request_id: u16,
    writer_task: tokio::task::JoinHandle<()>,
    reader_task: tokio::task::JoinHandle<Option<PipeWriters>>,
    error_rx: &mut mpsc::UnboundedReceiver<FcgiError>,
    writers: SharedWriters,
) {
    if let Err(e) = writer_task.await {
        tracing::error!(request_id, error = %e, "request writer task failed");
    }
    let mut pipe_writers = match reader_task.await {
        Ok(pipe_writers) => pipe_writers,
        Err(e) => {
            tracing::error!(request_id, error = %e, "request reader task failed");
            None
        }
    };

    // both tasks are done, so every error is already in the channel
    while let Ok(err) = error_rx.try_recv() {
        tracing::debug!(request_id, error = %err, "request error");
        if let Some(w) = pipe_writers.as_mut() {
            let _ = w.stderr.write_all(err.to_string().as_bytes()).await;
        }
    }

    if let Some(w) = pipe_writers.as_mut() {
        w.shutdown().await;
    }
    close_writers(&writers).await;
}

/// The writer half of a request: BeginRequest, the Params stream, then the
/// Stdin stream. On any failure an AbortRequest is attempted so the peer
/// can release its worker slot.
async fn write_request<T: AsyncWrite>(
    conn: Arc<Conn<T>>,
    request_id: u16,
    role: Role,
    keep_conn: bool,
    params: HashMap<String, String>,
    stdin: Option<BoxedStream>,
) -> Result<()> {
    let result = write_request_inner(&conn, request_id, role, keep_conn, params, stdin).await;
    if result.is_err() {
        if let Err(e) = conn.write_abort_request(request_id).await {
            tracing::debug!(request_id, error = %e, "abort after write failure also failed");
        }
    }
    result
}

async fn write_request_inner<T: AsyncWrite>(
    conn: &Arc<Conn<T>>,
    request_id: u16,
    role: Role,
    keep_conn: bool,
    params: HashMap<String, String>,
    stdin: Option<BoxedStream>,
) -> Result<()> {
    conn.write_begin_request(request_id, role, keep_conn).await?;
    conn.write_pairs(RecordType::Params, request_id, &params)
        .await?;

    let mut stdin_writer = BufferedStreamWriter::new(conn.clone(), RecordType::Stdin, request_id);
    if let Some(mut stdin) = stdin {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match stdin.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = stdin_writer.close().await;
                    return Err(e.into());
                }
            };
            if let Err(e) = stdin_writer.write(&chunk[..n]).await {
                let _ = stdin_writer.close().await;
                return Err(e);
            }
        }
    }
    stdin_writer.close().await
}

/// The reader half of a request: consumes this request's records from the
/// demultiplexer and copies them into the response pipes until EndRequest,
/// racing the caller's cancellation handle throughout.
async fn read_response(
    mut records: mpsc::Receiver<Record>,
    writers: SharedWriters,
    cancel: CancellationToken,
) -> (Result<()>, Option<PipeWriters>) {
    let mut writers = writers.lock().await.take();

    let result = loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => break Err(FcgiError::Canceled),
            record = records.recv() => match record {
                Some(record) => record,
                None => break Err(FcgiError::ShortRead),
            },
        };

        let outcome = match RecordType::from_byte(record.rtype()) {
            Some(RecordType::Stdout) => {
                pipe_write(
                    writers.as_mut().map(|w| &mut w.stdout),
                    record.content(),
                    &cancel,
                )
                .await
            }
            Some(RecordType::Stderr) => {
                pipe_write(
                    writers.as_mut().map(|w| &mut w.stderr),
                    record.content(),
                    &cancel,
                )
                .await
            }
            Some(RecordType::EndRequest) => {
                report_end_request(&record, writers.as_mut(), &cancel).await;
                break Ok(());
            }
            other => {
                let diag = match other {
                    Some(rtype) => format!("unexpected record type {rtype} in read loop"),
                    None => format!(
                        "unexpected record type {} in read loop",
                        record.rtype()
                    ),
                };
                pipe_write(
                    writers.as_mut().map(|w| &mut w.stderr),
                    diag.as_bytes(),
                    &cancel,
                )
                .await
            }
        };

        if let Err(e) = outcome {
            break Err(e);
        }
    };

    (result, writers)
}

/// Surface an abnormal EndRequest protocol status on the stderr pipe.
async fn report_end_request(
    record: &Record,
    writers: Option<&mut PipeWriters>,
    cancel: &CancellationToken,
) {
    let Some(end) = EndRequestBody::decode(record.content()) else {
        tracing::debug!(request_id = record.request_id(), "truncated EndRequest body");
        return;
    };
    tracing::debug!(
        request_id = record.request_id(),
        app_status = end.app_status,
        protocol_status = end.protocol_status,
        "request ended"
    );
    if end.status() != Some(ProtocolStatus::RequestComplete) {
        let diag = format!(
            "request ended with protocol status {}",
            end.protocol_status
        );
        let _ = pipe_write(writers.map(|w| &mut w.stderr), diag.as_bytes(), cancel).await;
    }
}

/// Write into a pipe half, racing cancellation. A missing half means the
/// pipes were already closed; the data is dropped.
async fn pipe_write(
    half: Option<&mut WriteHalf<SimplexStream>>,
    data: &[u8],
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(half) = half else {
        return Ok(());
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(FcgiError::Canceled),
        res = half.write_all(data) => res.map_err(FcgiError::Io),
    }
}

/// The connection's single reader: frames records off the transport and
/// routes them to per-request channels by request ID. Dropping the route
/// map on exit closes every per-request channel, which in-flight requests
/// observe as an unexpected EOF.
async fn demux_loop<T: AsyncRead>(
    mut io: ReadHalf<T>,
    mut registrations: mpsc::UnboundedReceiver<RouteRegistration>,
    shutdown: CancellationToken,
) {
    let mut routes: HashMap<u16, mpsc::Sender<Record>> = HashMap::new();
    let mut buffer = RecordBuffer::new();
    let mut chunk = vec![0u8; 64 * 1024];

    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return,
            read = io.read(&mut chunk) => match read {
                Ok(0) => {
                    if buffer.is_partial() {
                        tracing::warn!("transport closed mid-record");
                    }
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "transport read failed");
                    return;
                }
            },
        };

        let records = match buffer.push(&chunk[..n]) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "record decode failed");
                return;
            }
        };

        for record in records {
            // registrations are enqueued before the request's first record
            // can reach the wire, so draining here is always enough
            while let Ok(reg) = registrations.try_recv() {
                routes.insert(reg.request_id, reg.tx);
            }

            let request_id = record.request_id();
            if request_id == MANAGEMENT_REQUEST_ID {
                tracing::debug!(rtype = record.rtype(), "ignoring management record");
                continue;
            }

            let is_end = record.rtype() == RecordType::EndRequest as u8;
            match routes.get(&request_id) {
                Some(tx) => {
                    if tx.send(record).await.is_err() || is_end {
                        routes.remove(&request_id);
                    }
                }
                None => {
                    tracing::debug!(request_id, "record for unknown request id");
                }
            }
        }
    }
}
