//! # Description
//!
//! This crate provides a blocking HTTP/1.1 dispatcher for uploads that are too large to hold in memory.
//!
//! A request body is composed of three ordered segments: a literal prefix, a [`body::StreamSource`] that is read
//! incrementally, and a literal suffix. The segments are written directly to the transport, so a multi-megabyte file
//! can be sent with only a small fixed chunk buffer. The typical use is a `multipart/form-data` upload, where the
//! prefix and suffix carry the part boundaries and the source is the file itself (see [`multipart`]).
//!
//! The [`client::Dispatcher`] also follows redirects using the rules of RFC 7231: `301`/`307` preserve the method and
//! body when permitted by the [`redirect::RedirectPolicy`], while `302`/`303` downgrade to `GET` and drop the body.
//!
//! # Transport
//!
//! The dispatcher is generic over a [`Connector`], which opens a [`Connection`] for every hop.
//! The [`tcp`] module provides the real implementation over plain TCP or TLS, and the [`mock`] module provides a
//! scripted implementation that is most useful for testing.
//!
//! # Errors
//!
//! Local failures (refused connections, failed header or payload writes, unreadable response heads) are reported as a
//! [`error::DispatchError`] and abort the whole redirect chain. Any HTTP status received from the server, including
//! `4xx` and `5xx`, is returned as a successful [`response::Response`].
//!
//! # Features
//!
//! - `tcp`: the [`tcp::TcpConnector`] transport
//! - `mock`: the scripted [`mock::MockConnector`] transport
//!
//! # Example
//!
//! ```no_run
//! use streampost::body::{Body, FileSource};
//! use streampost::client::Dispatcher;
//! use streampost::hyperium_http::Request;
//! use streampost::multipart::MultipartUpload;
//! use streampost::redirect::RedirectPolicy;
//! use streampost::tcp::TcpConnector;
//!
//! let upload = MultipartUpload::new("----streampost").file("file", "recording.wav", "audio/wav");
//! let source = FileSource::open("recording.wav").unwrap();
//! let request = Request::post("https://example.com/api/transcribe")
//!     .header("content-type", upload.content_type())
//!     .body(upload.into_body(source))
//!     .unwrap();
//!
//! let mut dispatcher = Dispatcher::new(TcpConnector::new()).with_redirect_policy(RedirectPolicy::FollowSameMethod);
//! let mut response = dispatcher.send(request).unwrap();
//! println!("{} {}", response.status(), response.read_body_to_string().unwrap());
//! ```

pub extern crate http as hyperium_http;
#[cfg(any(feature = "tcp"))]
pub extern crate tcp_stream;

pub mod body;
pub mod client;
pub mod cookie;
pub mod error;
pub mod header;
#[cfg(any(feature = "mock"))]
pub mod mock;
pub mod multipart;
pub mod redirect;
pub mod response;
#[cfg(any(feature = "tcp"))]
pub mod tcp;

use std::io::Error;

/// An open, blocking byte-stream connection to a single host.
///
/// A [`Connection`] is opened by a [`Connector`] for every hop and is never reused across hops.
pub trait Connection {
    /// Write some of `data`, returning how many bytes the transport accepted.
    ///
    /// Returning `Ok(0)` for a non-empty `data` means the transport stalled.
    /// The dispatcher will back off and retry once before abandoning the write.
    fn write(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Flush any bytes buffered by the transport.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Read bytes into `buf`, returning `Ok(0)` at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Append bytes up to and including the next `\n` to `line`, returning the count appended.
    ///
    /// At most `limit` bytes are appended, so a line longer than `limit` comes back without its `\n`.
    /// Returns `Ok(0)` when the connection is closed before any byte could be read.
    fn read_line(&mut self, line: &mut Vec<u8>, limit: usize) -> Result<usize, Error>;

    /// Close the connection. Subsequent calls must be no-ops.
    fn close(&mut self);
}

/// Opens a [`Connection`] to a resolved `host:port`, optionally secured with TLS.
pub trait Connector {
    type Connection: Connection;

    fn connect(&mut self, host: &str, port: u16, secure: bool)
        -> Result<Self::Connection, Error>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        (**self).write(data)
    }

    fn flush(&mut self) -> Result<(), Error> {
        (**self).flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read(buf)
    }

    fn read_line(&mut self, line: &mut Vec<u8>, limit: usize) -> Result<usize, Error> {
        (**self).read_line(line, limit)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
