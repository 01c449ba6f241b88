//! Segmented request bodies and the [`BodyTransmitter`] that streams them

use std::{
    fs::File,
    io::{Error, ErrorKind, Read, Seek, SeekFrom},
    path::Path,
    thread,
    time::Duration,
};

use crate::Connection;

/// Size of the buffer used to pull bytes from a [`StreamSource`] before forwarding them to the connection.
pub const CHUNK_SIZE: usize = 512;

/// Default delay before retrying a write that stalled.
pub const DEFAULT_STALL_BACKOFF: Duration = Duration::from_millis(100);

/// A sequential byte producer of known total size.
///
/// The transmitter calls [`StreamSource::read_chunk`] until [`StreamSource::has_more`] returns false.
/// It never seeks while sending. [`StreamSource::rewind`] is only called before a redirect hop that re-sends the body.
pub trait StreamSource {
    /// Total number of bytes this source produces from its start.
    fn size(&self) -> u64;

    /// Returns true while unread bytes remain.
    fn has_more(&self) -> bool;

    /// Read up to `buf.len()` bytes, returning the count read.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Restart the source from its first byte.
    fn rewind(&mut self) -> Result<(), Error> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "stream source cannot be rewound",
        ))
    }
}

impl<S: StreamSource + ?Sized> StreamSource for &mut S {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn has_more(&self) -> bool {
        (**self).has_more()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read_chunk(buf)
    }

    fn rewind(&mut self) -> Result<(), Error> {
        (**self).rewind()
    }
}

/// A [`StreamSource`] with no bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;
impl StreamSource for Empty {
    fn size(&self) -> u64 {
        0
    }

    fn has_more(&self) -> bool {
        false
    }

    fn read_chunk(&mut self, _buf: &mut [u8]) -> Result<usize, Error> {
        Ok(0)
    }

    fn rewind(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A [`StreamSource`] over an in-memory slice
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    offset: usize,
}
impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}
impl<'a> StreamSource for SliceSource<'a> {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn has_more(&self) -> bool {
        self.offset < self.data.len()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let remaining = &self.data[self.offset..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.offset += len;
        Ok(len)
    }

    fn rewind(&mut self) -> Result<(), Error> {
        self.offset = 0;
        Ok(())
    }
}

/// A [`StreamSource`] reading exactly `len` bytes from a seekable reader, starting at its position on creation.
pub struct ReaderSource<R> {
    reader: R,
    start: u64,
    len: u64,
    consumed: u64,
}

/// A [`StreamSource`] over an opened file
pub type FileSource = ReaderSource<File>;

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(mut reader: R, len: u64) -> Result<Self, Error> {
        let start = reader.stream_position()?;
        Ok(Self {
            reader,
            start,
            len,
            consumed: 0,
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl ReaderSource<File> {
    /// Open the file at `path`, using its current size as the source size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_file(File::open(path)?)
    }

    /// Use the whole of `file`, regardless of its current position.
    pub fn from_file(mut file: File) -> Result<Self, Error> {
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        Self::new(file, len)
    }
}

impl<R: Read + Seek> StreamSource for ReaderSource<R> {
    fn size(&self) -> u64 {
        self.len
    }

    fn has_more(&self) -> bool {
        self.consumed < self.len
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let remaining = self.len - self.consumed;
        let limit = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let read = self.reader.read(&mut buf[..limit])?;
        self.consumed += read as u64;
        Ok(read)
    }

    fn rewind(&mut self) -> Result<(), Error> {
        self.reader.seek(SeekFrom::Start(self.start))?;
        self.consumed = 0;
        Ok(())
    }
}

/// A request body made of a literal `prefix`, a streamed `source`, and a literal `suffix`, sent in that order.
pub struct Body<S = Empty> {
    prefix: Vec<u8>,
    source: S,
    suffix: Vec<u8>,
}

impl Body<Empty> {
    /// A body with no bytes. No `Content-Length` header is sent for it.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Empty, Vec::new())
    }

    /// A body that consists of a single literal segment.
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self::new(bytes.into(), Empty, Vec::new())
    }
}

impl<S: StreamSource> Body<S> {
    pub fn new<P: Into<Vec<u8>>, X: Into<Vec<u8>>>(prefix: P, source: S, suffix: X) -> Self {
        Self {
            prefix: prefix.into(),
            source,
            suffix: suffix.into(),
        }
    }

    /// Total bytes of all three segments, which is the value of the `Content-Length` header.
    pub fn len(&self) -> u64 {
        self.prefix.len() as u64 + self.source.size() + self.suffix.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn suffix(&self) -> &[u8] {
        &self.suffix
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_parts(self) -> (Vec<u8>, S, Vec<u8>) {
        (self.prefix, self.source, self.suffix)
    }
}

impl Default for Body<Empty> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Writes segments to a [`Connection`] with bounded retry on stalls.
///
/// A stall is a write that accepted zero bytes. After a stall the transmitter sleeps for the configured backoff and
/// retries the identical write exactly once. If the retry stalls as well, the current segment is abandoned, but the
/// remaining segments are still attempted. Callers detect the shortfall by comparing the returned byte count with the
/// expected length.
#[derive(Debug, Clone, Copy)]
pub struct BodyTransmitter {
    backoff: Duration,
}

impl BodyTransmitter {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Write prefix, source and suffix in order, returning the total bytes accepted by the connection.
    ///
    /// The connection is flushed afterwards. If the flush fails, none of the accepted bytes can be confirmed as
    /// delivered and 0 is returned.
    pub fn transmit<C, S>(&self, conn: &mut C, body: &mut Body<S>) -> u64
    where
        C: Connection + ?Sized,
        S: StreamSource,
    {
        let mut total = self.write_segment(conn, &body.prefix) as u64;
        total += self.stream_source(conn, &mut body.source);
        total += self.write_segment(conn, &body.suffix) as u64;
        if let Err(err) = conn.flush() {
            log::error!("failed to flush payload after {total} bytes: {err}");
            return 0;
        }
        total
    }

    /// Write `data` until it is fully sent or the write is abandoned, returning the bytes sent.
    pub fn write_segment<C: Connection + ?Sized>(&self, conn: &mut C, data: &[u8]) -> usize {
        let mut sent = 0;
        while sent < data.len() {
            match self.write_with_retry(conn, &data[sent..]) {
                Some(n) => sent += n,
                None => break,
            }
        }
        sent
    }

    fn stream_source<C, S>(&self, conn: &mut C, source: &mut S) -> u64
    where
        C: Connection + ?Sized,
        S: StreamSource,
    {
        let mut chunk = [0u8; CHUNK_SIZE];
        let mut sent = 0;
        while source.has_more() {
            let read = match source.read_chunk(&mut chunk) {
                Ok(0) => {
                    log::error!(
                        "stream source ended {} bytes early",
                        source.size().saturating_sub(sent)
                    );
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    log::error!("failed to read stream source: {err}");
                    break;
                }
            };
            let written = self.write_segment(conn, &chunk[..read]);
            sent += written as u64;
            if written < read {
                break;
            }
        }
        sent
    }

    /// `None` means the write was abandoned.
    fn write_with_retry<C: Connection + ?Sized>(&self, conn: &mut C, data: &[u8]) -> Option<usize> {
        match write_once(conn, data) {
            Ok(0) => {
                log::warn!("failed to send chunk, waiting {:?}", self.backoff);
                thread::sleep(self.backoff);
                match write_once(conn, data) {
                    Ok(0) => {
                        log::error!("failed to send chunk after retry");
                        None
                    }
                    Ok(n) => Some(n),
                    Err(err) => {
                        log::error!("failed to send chunk: {err}");
                        None
                    }
                }
            }
            Ok(n) => Some(n),
            Err(err) => {
                log::error!("failed to send chunk: {err}");
                None
            }
        }
    }
}

impl Default for BodyTransmitter {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_BACKOFF)
    }
}

/// Single write where a would-block is reported as a stall.
fn write_once<C: Connection + ?Sized>(conn: &mut C, data: &[u8]) -> Result<usize, Error> {
    loop {
        match conn.write(data) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
