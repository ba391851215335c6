//! CGI response parsing into an HTTP response sink.
//!
//! The upstream's stdout stream is a CGI header block (`Name: value` lines,
//! blank-line terminated, optionally carrying `Status:` and `Location:`)
//! followed by the response body. [`ResponsePipe::write_to`] parses the
//! block, commits status and headers to an [`HttpResponseSink`], streams the
//! body into the sink's writer, and concurrently copies the stderr stream
//! into an error sink.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

use crate::error::{FcgiError, Result};
use crate::pipe::ResponsePipe;

/// Budget for a single CGI header line's raw bytes, terminator included.
const MAX_HEADER_LINE: usize = 1024;

/// Destination for a parsed upstream response: a status setter, a header
/// map, and a body writer.
///
/// Duplicate header names are appended, not overwritten; implementations
/// backed by multi-maps should preserve every value.
pub trait HttpResponseSink {
    /// Where the response body is streamed.
    type Body: AsyncWrite + Unpin + Send;

    /// Set the HTTP status code. Called once, before the body is written
    /// (or with 500 when parsing fails).
    fn set_status(&mut self, code: u16);

    /// Append one response header.
    fn append_header(&mut self, name: &str, value: &str);

    /// The body writer.
    fn body(&mut self) -> &mut Self::Body;
}

impl ResponsePipe {
    /// Parse the stdout stream into `sink` and copy the stderr stream into
    /// `error_sink`, concurrently; returns the first error of the two.
    ///
    /// On a malformed header block the sink receives status 500 where the
    /// upstream left the response unusable (overlong header line, missing
    /// header block, missing `Content-Type`).
    pub async fn write_to<S, E>(&mut self, sink: &mut S, error_sink: &mut E) -> Result<()>
    where
        S: HttpResponseSink,
        E: AsyncWrite + Unpin,
    {
        let (stdout, stderr) = (&mut self.stdout, &mut self.stderr);
        let (response, errors) = tokio::join!(
            parse_response(stdout, sink),
            copy_stderr(stderr, error_sink),
        );
        response.and(errors)
    }
}

/// Copy the stderr stream verbatim into the error sink.
async fn copy_stderr<R, W>(mut stderr: R, error_sink: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::io::copy(&mut stderr, error_sink)
        .await
        .map(|_| ())
        .map_err(FcgiError::StderrCopy)
}

/// Parse a CGI header block off `stdout`, commit it to the sink, then
/// stream the remaining bytes as the response body.
async fn parse_response<R, S>(stdout: R, sink: &mut S) -> Result<()>
where
    R: AsyncRead + Unpin,
    S: HttpResponseSink,
{
    let mut reader = BufReader::with_capacity(MAX_HEADER_LINE, stdout);
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut status_code: Option<u16> = None;
    let mut header_lines = 0usize;
    let mut saw_blank_line = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        // the take() bound keeps an overlong line from being buffered whole
        let read = (&mut reader)
            .take(MAX_HEADER_LINE as u64)
            .read_until(b'\n', &mut line)
            .await;
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                sink.set_status(500);
                return Err(FcgiError::Io(e));
            }
        };
        if n == 0 {
            break; // EOF before a blank line
        }
        // no newline within the budget's worth of raw bytes means the line
        // is over budget; a short read without a newline is just EOF
        if line.last() != Some(&b'\n') && line.len() >= MAX_HEADER_LINE {
            sink.set_status(500);
            return Err(FcgiError::LongHeaderLine);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        if line.is_empty() {
            saw_blank_line = true;
            break;
        }
        header_lines += 1;

        let text = String::from_utf8_lossy(&line);
        let Some((name, value)) = text.split_once(':') else {
            return Err(FcgiError::BogusHeader(text.into_owned()));
        };
        let name = name.trim_matches(|c: char| c.is_ascii_whitespace());
        let value = value.trim_matches(|c: char| c.is_ascii_whitespace());

        if name == "Status" {
            if value.len() < 3 {
                return Err(FcgiError::BogusStatusShort(value.to_string()));
            }
            let code = value
                .get(..3)
                .and_then(|digits| digits.parse::<u16>().ok())
                .ok_or_else(|| FcgiError::BogusStatus(value.to_string()))?;
            status_code = Some(code);
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    if header_lines == 0 || !saw_blank_line {
        sink.set_status(500);
        return Err(FcgiError::NoHeaders);
    }

    let has_header =
        |wanted: &str| headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(wanted));
    if status_code.is_none() && has_header("Location") {
        status_code = Some(302);
    }
    if status_code.is_none() && !has_header("Content-Type") {
        sink.set_status(500);
        return Err(FcgiError::MissingContentType);
    }

    for (name, value) in &headers {
        sink.append_header(name, value);
    }
    sink.set_status(status_code.unwrap_or(200));

    tokio::io::copy_buf(&mut reader, sink.body())
        .await
        .map(|_| ())
        .map_err(FcgiError::BodyCopy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory sink recording everything the parser commits.
    struct MockSink {
        status: Option<u16>,
        headers: Vec<(String, String)>,
        body: Cursor<Vec<u8>>,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                status: None,
                headers: Vec::new(),
                body: Cursor::new(Vec::new()),
            }
        }

        fn body_bytes(&self) -> &[u8] {
            self.body.get_ref()
        }
    }

    impl HttpResponseSink for MockSink {
        type Body = Cursor<Vec<u8>>;

        fn set_status(&mut self, code: u16) {
            self.status = Some(code);
        }

        fn append_header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }

        fn body(&mut self) -> &mut Self::Body {
            &mut self.body
        }
    }

    async fn parse(stdout: &[u8]) -> (MockSink, Result<()>) {
        let mut sink = MockSink::new();
        let result = parse_response(stdout, &mut sink).await;
        (sink, result)
    }

    #[tokio::test]
    async fn test_minimal_document_response() {
        let (sink, result) = parse(b"Content-Type: text/html\r\n\r\nhi").await;

        result.unwrap();
        assert_eq!(sink.status, Some(200));
        assert_eq!(
            sink.headers,
            vec![("Content-Type".to_string(), "text/html".to_string())]
        );
        assert_eq!(sink.body_bytes(), b"hi");
    }

    #[tokio::test]
    async fn test_explicit_status() {
        let (sink, result) =
            parse(b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnope").await;

        result.unwrap();
        assert_eq!(sink.status, Some(404));
        assert_eq!(
            sink.headers,
            vec![("Content-Type".to_string(), "text/plain".to_string())]
        );
        assert_eq!(sink.body_bytes(), b"nope");
    }

    #[tokio::test]
    async fn test_location_defaults_to_found() {
        let (sink, result) = parse(b"Location: /login\r\n\r\n").await;

        result.unwrap();
        assert_eq!(sink.status, Some(302));
        assert_eq!(
            sink.headers,
            vec![("Location".to_string(), "/login".to_string())]
        );
        assert!(sink.body_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_location_does_not_override_explicit_status() {
        let (sink, result) = parse(b"Status: 301 Moved\r\nLocation: /new\r\n\r\n").await;

        result.unwrap();
        assert_eq!(sink.status, Some(301));
    }

    #[tokio::test]
    async fn test_missing_content_type_is_server_error() {
        let (sink, result) = parse(b"X-Foo: bar\r\n\r\n").await;

        assert!(matches!(result, Err(FcgiError::MissingContentType)));
        assert_eq!(sink.status, Some(500));
    }

    #[tokio::test]
    async fn test_empty_stdout_has_no_headers() {
        let (sink, result) = parse(b"").await;

        assert!(matches!(result, Err(FcgiError::NoHeaders)));
        assert_eq!(sink.status, Some(500));
    }

    #[tokio::test]
    async fn test_eof_before_blank_line_has_no_headers() {
        let (sink, result) = parse(b"Content-Type: text/html\r\n").await;

        assert!(matches!(result, Err(FcgiError::NoHeaders)));
        assert_eq!(sink.status, Some(500));
    }

    #[tokio::test]
    async fn test_blank_line_with_zero_headers_has_no_headers() {
        let (sink, result) = parse(b"\r\nbody").await;

        assert!(matches!(result, Err(FcgiError::NoHeaders)));
        assert_eq!(sink.status, Some(500));
    }

    #[tokio::test]
    async fn test_long_header_line() {
        let mut stdout = b"X-Big: ".to_vec();
        stdout.extend_from_slice(&[b'a'; 2000]);
        stdout.extend_from_slice(b"\r\n\r\n");

        let (sink, result) = parse(&stdout).await;
        assert!(matches!(result, Err(FcgiError::LongHeaderLine)));
        assert_eq!(sink.status, Some(500));
    }

    #[tokio::test]
    async fn test_line_at_exactly_the_budget_is_accepted() {
        // content plus CRLF is exactly 1024 raw bytes
        let value_len = MAX_HEADER_LINE - 2 - "Content-Type: ".len();
        let mut stdout = b"Content-Type: ".to_vec();
        stdout.extend_from_slice(&vec![b'x'; value_len]);
        stdout.extend_from_slice(b"\r\n\r\nok");

        let (sink, result) = parse(&stdout).await;
        result.unwrap();
        assert_eq!(sink.status, Some(200));
        assert_eq!(sink.body_bytes(), b"ok");
    }

    #[tokio::test]
    async fn test_line_terminator_counts_against_the_budget() {
        // content plus CRLF is 1025 raw bytes: one over
        let value_len = MAX_HEADER_LINE - 1 - "Content-Type: ".len();
        let mut stdout = b"Content-Type: ".to_vec();
        stdout.extend_from_slice(&vec![b'x'; value_len]);
        stdout.extend_from_slice(b"\r\n\r\nok");

        let (sink, result) = parse(&stdout).await;
        assert!(matches!(result, Err(FcgiError::LongHeaderLine)));
        assert_eq!(sink.status, Some(500));
    }

    #[tokio::test]
    async fn test_bogus_header_without_colon() {
        let (sink, result) = parse(b"Content-Type text/html\r\n\r\n").await;

        assert!(matches!(result, Err(FcgiError::BogusHeader(_))));
        // bogus lines fail the parse without committing a status
        assert_eq!(sink.status, None);
    }

    #[tokio::test]
    async fn test_bogus_status_short() {
        let (_, result) = parse(b"Status: 9\r\n\r\n").await;
        assert!(matches!(result, Err(FcgiError::BogusStatusShort(_))));
    }

    #[tokio::test]
    async fn test_bogus_status_non_numeric() {
        let (_, result) = parse(b"Status: abc\r\n\r\n").await;
        assert!(matches!(result, Err(FcgiError::BogusStatus(_))));
    }

    #[tokio::test]
    async fn test_status_header_is_case_sensitive() {
        // lowercase "status" is an ordinary header, not a status override
        let (sink, result) =
            parse(b"status: 404\r\nContent-Type: text/plain\r\n\r\nok").await;

        result.unwrap();
        assert_eq!(sink.status, Some(200));
        assert!(sink
            .headers
            .contains(&("status".to_string(), "404".to_string())));
    }

    #[tokio::test]
    async fn test_duplicate_headers_append() {
        let (sink, result) = parse(
            b"Set-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Type: text/plain\r\n\r\n",
        )
        .await;

        result.unwrap();
        let cookies: Vec<_> = sink
            .headers
            .iter()
            .filter(|(name, _)| name == "Set-Cookie")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn test_whitespace_trimmed_from_name_and_value() {
        let (sink, result) = parse(b"  Content-Type  :   text/plain  \r\n\r\n").await;

        result.unwrap();
        assert_eq!(
            sink.headers,
            vec![("Content-Type".to_string(), "text/plain".to_string())]
        );
    }

    #[tokio::test]
    async fn test_bare_newline_lines_accepted() {
        let (sink, result) = parse(b"Content-Type: text/plain\n\nbody").await;

        result.unwrap();
        assert_eq!(sink.status, Some(200));
        assert_eq!(sink.body_bytes(), b"body");
    }

    #[tokio::test]
    async fn test_write_to_joins_stdout_and_stderr() {
        let (mut pipe, writers) = crate::pipe::ResponsePipe::new();

        {
            use tokio::io::AsyncWriteExt;
            let mut w = writers.lock().await.take().unwrap();
            w.stdout
                .write_all(b"Content-Type: text/plain\r\n\r\nbody")
                .await
                .unwrap();
            w.stderr.write_all(b"some diagnostics").await.unwrap();
            w.shutdown().await;
        }

        let mut sink = MockSink::new();
        let mut errors = Vec::new();
        pipe.write_to(&mut sink, &mut errors).await.unwrap();

        assert_eq!(sink.status, Some(200));
        assert_eq!(sink.body_bytes(), b"body");
        assert_eq!(errors, b"some diagnostics");
    }
}
