//! # fcgi-client
//!
//! A FastCGI client library: speaks the binary wire protocol to an upstream
//! application server (e.g. PHP-FPM) on behalf of a front-end HTTP reverse
//! proxy.
//!
//! ## Architecture
//!
//! - **Record codec** ([`protocol`]): 8-byte headers, 8-byte-aligned
//!   padding, name-value pair length encoding.
//! - **Framed connection**: all record writes serialized through one mutex,
//!   so records stay atomic on the wire under concurrent requests.
//! - **Request coordination** ([`Client::send`]): allocates a 16-bit request
//!   ID, writes BeginRequest + Params + Stdin, and demultiplexes the peer's
//!   interleaved Stdout/Stderr/EndRequest records into per-request pipes.
//! - **CGI response parsing** ([`ResponsePipe::write_to`]): turns the stdout
//!   stream's header block and body into status, headers, and body on an
//!   [`HttpResponseSink`].
//!
//! ## Example
//!
//! ```ignore
//! use fcgi_client::{Client, Request};
//!
//! #[tokio::main]
//! async fn main() -> fcgi_client::Result<()> {
//!     let socket = tokio::net::UnixStream::connect("/run/php/php-fpm.sock").await?;
//!     let client = Client::new(socket);
//!
//!     let request = Request::new()
//!         .param("SCRIPT_FILENAME", "/var/www/index.php")
//!         .param("REQUEST_METHOD", "GET")
//!         .param("QUERY_STRING", "page=1");
//!
//!     let mut pipe = client.send(request).await?;
//!     pipe.write_to(&mut my_sink, &mut tokio::io::stderr()).await?;
//!     client.close().await
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod response;

mod client;
mod conn;
mod id;
mod pipe;
mod stream;

pub use client::{Client, Request};
pub use error::{FcgiError, Result};
pub use pipe::ResponsePipe;
pub use protocol::Role;
pub use response::HttpResponseSink;
