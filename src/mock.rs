//! Mock connections, most useful for testing

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt::Debug,
    io::{BufRead, Cursor, Error, ErrorKind, Read},
    rc::Rc,
};

use crate::{Connection, Connector};

/// The scripted outcome of a single [`MockConnection::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockWrite {
    /// Accept every byte
    Accept,
    /// Accept at most the given number of bytes
    Partial(usize),
    /// Accept nothing, returning `Ok(0)`
    Stall,
    /// Fail with the given error kind
    Fail(ErrorKind),
}

#[derive(Default)]
struct TranscriptState {
    sent: Vec<u8>,
    write_calls: usize,
    closed: bool,
}

/// A shared view of everything written to a [`MockConnection`], which remains readable after the connection has been
/// moved into a dispatcher.
#[derive(Clone, Default)]
pub struct MockTranscript {
    state: Rc<RefCell<TranscriptState>>,
}
impl MockTranscript {
    /// All bytes accepted by the connection
    pub fn sent(&self) -> Vec<u8> {
        self.state.borrow().sent.clone()
    }

    /// Number of calls to `write(..)`, including stalled and failed calls
    pub fn write_calls(&self) -> usize {
        self.state.borrow().write_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Split the sent bytes into the request head (without the blank line) and the body.
    pub fn request(&self) -> (String, Vec<u8>) {
        let sent = self.sent();
        match sent.windows(4).position(|x| x == b"\r\n\r\n") {
            Some(pos) => (
                String::from_utf8_lossy(&sent[..pos]).into_owned(),
                sent[pos + 4..].to_vec(),
            ),
            None => (String::from_utf8_lossy(&sent).into_owned(), Vec::new()),
        }
    }

    /// Value of the first request header matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        let (head, _) = self.request();
        head.split("\r\n").skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            if n.trim().eq_ignore_ascii_case(name) {
                Some(v.trim().to_owned())
            } else {
                None
            }
        })
    }
}

/// A mock connection, using an internal [`VecDeque`] of [`MockWrite`] outcomes to script write results and a
/// pre-loaded byte buffer as the data returned to readers.
///
/// When the `write_queue` is empty, writes accept every byte.
pub struct MockConnection {
    pub write_queue: VecDeque<MockWrite>,
    response: Cursor<Vec<u8>>,
    transcript: MockTranscript,
}
impl MockConnection {
    /// Create a connection that will return `response` to readers.
    pub fn new<B: Into<Vec<u8>>>(response: B) -> Self {
        Self {
            write_queue: VecDeque::new(),
            response: Cursor::new(response.into()),
            transcript: MockTranscript::default(),
        }
    }

    /// Append scripted write outcomes
    pub fn with_writes<I: IntoIterator<Item = MockWrite>>(mut self, writes: I) -> Self {
        self.write_queue.extend(writes);
        self
    }

    pub fn transcript(&self) -> MockTranscript {
        self.transcript.clone()
    }
}
impl Connection for MockConnection {
    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let mut state = self.transcript.state.borrow_mut();
        state.write_calls += 1;
        if state.closed {
            return Err(Error::new(ErrorKind::NotConnected, "closed"));
        }
        let accepted = match self.write_queue.pop_front().unwrap_or(MockWrite::Accept) {
            MockWrite::Accept => data.len(),
            MockWrite::Partial(n) => n.min(data.len()),
            MockWrite::Stall => 0,
            MockWrite::Fail(kind) => return Err(Error::new(kind, "mock write failure")),
        };
        state.sent.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.response.read(buf)
    }

    fn read_line(&mut self, line: &mut Vec<u8>, limit: usize) -> Result<usize, Error> {
        self.response.by_ref().take(limit as u64).read_until(b'\n', line)
    }

    fn close(&mut self) {
        self.transcript.state.borrow_mut().closed = true;
    }
}
impl Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MockConnection")
    }
}

/// A mock connector, returning queued connections in order.
///
/// Every call to [`Connector::connect`] is recorded in `connects` as `(host, port, secure)`.
/// When the `connect_queue` is empty, `connect` fails with [`ErrorKind::ConnectionRefused`].
#[derive(Default)]
pub struct MockConnector {
    pub connect_queue: VecDeque<Result<MockConnection, Error>>,
    pub connects: Vec<(String, u16, bool)>,
}
impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection that replies with `response`, returning its transcript.
    pub fn respond<B: Into<Vec<u8>>>(&mut self, response: B) -> MockTranscript {
        self.push(MockConnection::new(response))
    }

    /// Queue a connection, returning its transcript.
    pub fn push(&mut self, conn: MockConnection) -> MockTranscript {
        let transcript = conn.transcript();
        self.connect_queue.push_back(Ok(conn));
        transcript
    }
}
impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&mut self, host: &str, port: u16, secure: bool) -> Result<MockConnection, Error> {
        self.connects.push((host.to_owned(), port, secure));
        match self.connect_queue.pop_front() {
            Some(x) => x,
            None => Err(Error::new(
                ErrorKind::ConnectionRefused,
                "no mock connection queued",
            )),
        }
    }
}
impl Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("connects", &self.connects)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use crate::{Connection, Connector};

    use super::{MockConnection, MockConnector, MockWrite};

    #[test]
    fn test_mock_connection() {
        let mut conn = MockConnection::new("HTTP/1.1 200 OK\r\n\r\nhello")
            .with_writes([MockWrite::Partial(2), MockWrite::Stall]);
        let transcript = conn.transcript();

        // pop write results
        assert_eq!(conn.write(b"abcd").unwrap(), 2);
        assert_eq!(conn.write(b"cd").unwrap(), 0);
        assert_eq!(conn.write(b"cd").unwrap(), 2);
        assert_eq!(transcript.sent(), b"abcd");
        assert_eq!(transcript.write_calls(), 3);

        // read lines then the rest
        let mut line = Vec::new();
        assert_eq!(conn.read_line(&mut line, 64).unwrap(), 17);
        assert_eq!(line, b"HTTP/1.1 200 OK\r\n");
        line.clear();
        conn.read_line(&mut line, 64).unwrap();
        assert_eq!(line, b"\r\n");
        let mut rest = [0u8; 16];
        assert_eq!(conn.read(&mut rest).unwrap(), 5);

        conn.close();
        assert!(transcript.is_closed());
        assert!(conn.write(b"x").is_err());
    }

    #[test]
    fn test_mock_connector() {
        let mut connector = MockConnector::new();
        connector.respond("");
        assert!(connector.connect("a.example", 80, false).is_ok());
        assert!(connector.connect("b.example", 443, true).is_err());
        assert_eq!(
            connector.connects,
            vec![
                ("a.example".to_owned(), 80, false),
                ("b.example".to_owned(), 443, true)
            ]
        );
    }
}
