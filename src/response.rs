//! Response head parsing and the [`Response`] returned by a dispatch

use std::{
    fmt::Debug,
    io::{Error, ErrorKind},
    str::FromStr,
};

use hyperium_http::{
    header::{CONTENT_LENGTH, LOCATION, SET_COOKIE, TRANSFER_ENCODING},
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version,
};

use crate::{error::DispatchError, Connection};

/// Largest response head that will be buffered before it is rejected as malformed.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// The status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// The `Location` header, when present and non-empty.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|x| x.to_str().ok())
            .map(str::trim)
            .filter(|x| !x.is_empty())
    }

    /// Every `Set-Cookie` directive, in order received.
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|x| x.to_str().ok())
            .map(str::to_owned)
            .collect()
    }

    pub fn content_length(&self) -> Result<Option<u64>, Error> {
        match self.headers.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(v) => {
                let v = String::from_utf8_lossy(v.as_bytes());
                Ok(Some(v.trim().parse().map_err(|_| {
                    Error::new(ErrorKind::InvalidData, "content-length not a number")
                })?))
            }
        }
    }
}

/// Read the status line and header block from `conn`.
///
/// Interim `1xx` heads are skipped. The body is left unread on the connection.
pub fn read_head<C: Connection + ?Sized>(conn: &mut C) -> Result<ResponseHead, DispatchError> {
    loop {
        let raw = read_raw_head(conn)?;
        let head = parse_head(&raw)?;
        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            log::debug!("skipping interim response {}", head.status);
            continue;
        }
        return Ok(head);
    }
}

/// Collect lines up to and including the blank line ending the head.
fn read_raw_head<C: Connection + ?Sized>(conn: &mut C) -> Result<Vec<u8>, DispatchError> {
    let mut raw = Vec::new();
    loop {
        let start = raw.len();
        let read = conn
            .read_line(&mut raw, MAX_HEAD_SIZE + 1 - start)
            .map_err(DispatchError::from_read)?;
        if read == 0 {
            return Err(DispatchError::ConnectionLost(Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed before receiving full response head",
            )));
        }
        if raw.len() > MAX_HEAD_SIZE {
            return Err(DispatchError::MalformedResponse(format!(
                "response head exceeds {MAX_HEAD_SIZE} bytes"
            )));
        }
        let line = &raw[start..];
        if !line.ends_with(b"\n") {
            return Err(DispatchError::ConnectionLost(Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed mid-line while receiving response head",
            )));
        }
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // tolerate stray blank lines before the status line
                raw.clear();
                continue;
            }
            return Ok(raw);
        }
    }
}

/// Parse a complete response head.
pub fn parse_head(raw: &[u8]) -> Result<ResponseHead, DispatchError> {
    let mut headers = vec![httparse::EMPTY_HEADER; count_max_headers(raw)];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(raw).map_err(|err| {
        DispatchError::MalformedResponse(format!("http response parse failed: {err:?}"))
    })? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => {
            return Err(DispatchError::MalformedResponse(
                "incomplete response head".to_owned(),
            ))
        }
    }

    let code = parsed
        .code
        .ok_or_else(|| DispatchError::MalformedResponse("missing status code".to_owned()))?;
    let status = StatusCode::from_u16(code).map_err(|_| {
        DispatchError::MalformedResponse(format!("response invalid status code '{code}'"))
    })?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let mut map = HeaderMap::new();
    for h in parsed.headers.iter() {
        let name = HeaderName::from_str(h.name).map_err(|_| {
            DispatchError::MalformedResponse(format!("response invalid header name '{}'", h.name))
        })?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| {
            DispatchError::MalformedResponse(format!(
                "response invalid header value '{:?}'",
                h.value
            ))
        })?;
        map.append(name, value);
    }
    Ok(ResponseHead {
        status,
        version,
        headers: map,
    })
}

fn count_max_headers(payload: &[u8]) -> usize {
    payload.iter().filter(|x| **x == b'\n').count()
}

/// The final response of a dispatch: its head, and the still-open connection positioned at the start of the body.
pub struct Response<T: Connection> {
    head: ResponseHead,
    connection: T,
    method: Method,
    uri: Uri,
    hops: u16,
}

impl<T: Connection> Response<T> {
    pub(crate) fn new(
        head: ResponseHead,
        connection: T,
        method: Method,
        uri: Uri,
        hops: u16,
    ) -> Self {
        Self {
            head,
            connection,
            method,
            uri,
            hops,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn location(&self) -> Option<&str> {
        self.head.location()
    }

    /// The method used by the final hop
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target of the final hop
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Number of redirects that were followed
    pub fn hops(&self) -> u16 {
        self.hops
    }

    /// Read the body delimited by `Content-Length`, or until the server closes the connection.
    ///
    /// Chunked transfer encoding is not supported.
    pub fn read_body(&mut self) -> Result<Vec<u8>, Error> {
        if self.method == Method::HEAD
            || self.head.status.is_informational()
            || self.head.status == StatusCode::NO_CONTENT
            || self.head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(Vec::new());
        }
        if self.head.headers.contains_key(TRANSFER_ENCODING) {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "transfer-encoding is not supported",
            ));
        }
        let mut body = Vec::new();
        let mut buf = [0u8; 4096];
        match self.head.content_length()? {
            Some(len) => {
                while (body.len() as u64) < len {
                    let want = usize::try_from(len - body.len() as u64)
                        .unwrap_or(usize::MAX)
                        .min(buf.len());
                    match self.connection.read(&mut buf[..want]) {
                        Ok(0) => {
                            return Err(Error::new(
                                ErrorKind::UnexpectedEof,
                                "http connection terminated before receiving full body",
                            ))
                        }
                        Ok(n) => body.extend_from_slice(&buf[..n]),
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
            None => loop {
                match self.connection.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => body.extend_from_slice(&buf[..n]),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            },
        }
        Ok(body)
    }

    pub fn read_body_to_string(&mut self) -> Result<String, Error> {
        let body = self.read_body()?;
        String::from_utf8(body).map_err(|err| Error::new(ErrorKind::InvalidData, err))
    }

    pub fn connection_mut(&mut self) -> &mut T {
        &mut self.connection
    }

    pub fn into_parts(self) -> (ResponseHead, T) {
        (self.head, self.connection)
    }

    pub fn close(mut self) {
        self.connection.close();
    }
}

impl<T: Connection> Debug for Response<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.head.status)
            .field("uri", &self.uri)
            .field("hops", &self.hops)
            .finish()
    }
}
