//! Per-attempt request headers and HTTP/1.1 request head serialization

use std::io::{Error, ErrorKind};

use hyperium_http::{
    header::{CONNECTION, CONTENT_LENGTH, COOKIE, HOST, USER_AGENT},
    HeaderMap, HeaderName, HeaderValue, Method, Uri,
};

const LINE_BREAK: &str = "\r\n";

/// Headers that are always computed per attempt and never copied from the caller.
const COMPUTED: [HeaderName; 2] = [HOST, CONTENT_LENGTH];

/// The header table of a single request attempt.
///
/// The table is cleared at the start of every hop and rebuilt from the caller's headers plus the values computed for
/// that hop, so nothing set for one hop can leak into the next.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    headers: HeaderMap,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every header
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Populate the table for an attempt against `host`: the `Host` header, optional `User-Agent`,
    /// `Connection: close`, then every caller header except the computed ones.
    pub fn fill(
        &mut self,
        host: &str,
        user_agent: Option<&str>,
        caller: &HeaderMap,
    ) -> Result<(), Error> {
        self.insert(HOST, host)?;
        if let Some(user_agent) = user_agent {
            self.insert(USER_AGENT, user_agent)?;
        }
        self.insert(CONNECTION, "close")?;
        for name in caller.keys() {
            if COMPUTED.contains(name) {
                continue;
            }
            self.headers.remove(name);
            for value in caller.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Set `Content-Length` when `len` is positive, otherwise make sure it is absent.
    pub fn set_content_length(&mut self, len: u64) {
        if len > 0 {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        } else {
            self.headers.remove(CONTENT_LENGTH);
        }
    }

    /// Add jar cookies to the `Cookie` header, after any pairs the caller already set.
    pub fn set_cookie(&mut self, cookie: &str) -> Result<(), Error> {
        let mut pairs: Vec<&str> = self
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|x| x.to_str().ok())
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .collect();
        pairs.push(cookie);
        let merged = pairs.join("; ");
        self.insert(COOKIE, &merged)
    }

    /// Insert a header, replacing any previous value for `name`.
    pub fn insert(&mut self, name: HeaderName, value: &str) -> Result<(), Error> {
        let value = HeaderValue::from_str(value).map_err(|_| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid value for header '{}'", name.as_str()).as_str(),
            )
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Serialize the request line and header block, terminated by the blank line.
pub fn assemble(method: &Method, uri: &Uri, table: &HeaderTable) -> Result<Vec<u8>, Error> {
    let mut head = Vec::new();
    head.extend_from_slice(method.as_str().as_bytes());
    head.extend_from_slice(" ".as_bytes());
    match uri.path_and_query() {
        Some(x) if !x.as_str().is_empty() && x.as_str().starts_with('/') => {
            head.extend_from_slice(x.as_str().as_bytes())
        }
        Some(x) if !x.as_str().is_empty() => {
            // "?query" without a path
            head.extend_from_slice("/".as_bytes());
            head.extend_from_slice(x.as_str().as_bytes());
        }
        _ => head.extend_from_slice("/".as_bytes()),
    }
    head.extend_from_slice(" HTTP/1.1".as_bytes());
    head.extend_from_slice(LINE_BREAK.as_bytes());
    for (n, v) in table.headers.iter() {
        head.extend_from_slice(n.as_str().as_bytes());
        head.extend_from_slice(": ".as_bytes());
        head.extend_from_slice(
            v.to_str()
                .map_err(|_| {
                    Error::new(
                        ErrorKind::InvalidData,
                        format!("could not convert header '{}' to string", n.as_str()).as_str(),
                    )
                })?
                .as_bytes(),
        );
        head.extend_from_slice(LINE_BREAK.as_bytes());
    }
    head.extend_from_slice(LINE_BREAK.as_bytes());
    Ok(head)
}
