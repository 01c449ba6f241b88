//! Provides a blocking TCP/TLS [`Connector`] implementation

use std::{
    fmt::Debug,
    io::{BufRead, BufReader, Error, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, ToSocketAddrs},
    time::Duration,
};

use native_tls::Certificate;
use tcp_stream::{
    HandshakeError, HandshakeResult, NativeTlsConnector, OwnedTLSConfig, TLSConfig, TcpStream,
};

use crate::{Connection, Connector};

/// A [`Connector`] that opens blocking TCP connections, upgrading them to TLS for secure targets.
///
/// ## Example
///
/// ```no_run
/// use std::time::Duration;
/// use streampost::tcp::TcpConnector;
///
/// let connector = TcpConnector::new()
///     .with_connect_timeout(Some(Duration::from_secs(5)))
///     .with_io_timeout(Some(Duration::from_secs(30)));
/// ```
pub struct TcpConnector {
    tls_config: OwnedTLSConfig,
    accept_invalid_hostnames: bool,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}
impl TcpConnector {
    /// Create a new TcpConnector with no timeouts
    pub fn new() -> Self {
        Self {
            tls_config: OwnedTLSConfig::default(),
            accept_invalid_hostnames: false,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Override the default TLS config
    pub fn with_tls_config(mut self, tls_config: OwnedTLSConfig) -> Self {
        self.tls_config = tls_config;
        self
    }

    /// Set whether we should accept invalid hostnames or not
    pub fn with_accept_invalid_hostnames(mut self, accept_invalid_hostnames: bool) -> Self {
        self.accept_invalid_hostnames = accept_invalid_hostnames;
        self
    }

    /// Bound the time spent establishing each TCP connection
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set read and write timeouts on every opened stream
    pub fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    fn connect_plain(&self, host: &str, port: u16) -> Result<std::net::TcpStream, Error> {
        let addrs: Vec<SocketAddr> = format!("{host}:{port}").to_socket_addrs()?.collect();
        let mut err = None;
        for addr in addrs {
            let result = match self.connect_timeout {
                Some(timeout) => std::net::TcpStream::connect_timeout(&addr, timeout),
                None => std::net::TcpStream::connect(addr),
            };
            match result {
                Ok(x) => return Ok(x),
                Err(x) => err = Some(x),
            }
        }
        match err {
            Some(err) => Err(err),
            None => Err(Error::new(ErrorKind::Other, "could not resolve addr")),
        }
    }

    fn into_tls_impl(
        &self,
        s: TcpStream,
        domain: &str,
        config: TLSConfig<'_, '_, '_>,
    ) -> HandshakeResult {
        let mut builder = NativeTlsConnector::builder();
        if self.accept_invalid_hostnames {
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(identity) = config.identity {
            match identity {
                tcp_stream::Identity::PKCS12 { der, password } => builder.identity(
                    native_tls::Identity::from_pkcs12(&der, password)
                        .map_err(|e| Error::new(ErrorKind::Other, e))?,
                ),
                tcp_stream::Identity::PKCS8 { pem, key } => builder.identity(
                    native_tls::Identity::from_pkcs8(&pem, key)
                        .map_err(|e| Error::new(ErrorKind::Other, e))?,
                ),
            };
        }

        if let Some(cert_chain) = config.cert_chain {
            let mut cert_chain = std::io::BufReader::new(cert_chain.as_bytes());
            for cert in rustls_pemfile::read_all(&mut cert_chain) {
                if let rustls_pemfile::Item::X509Certificate(cert) = cert? {
                    builder.add_root_certificate(
                        Certificate::from_der(&cert[..])
                            .map_err(|e| Error::new(ErrorKind::Other, e))?,
                    );
                }
            }
        }

        let connector = builder
            .build()
            .map_err(|e| Error::new(ErrorKind::Other, e))?;

        s.into_native_tls(&connector, domain)
    }
}
impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&mut self, host: &str, port: u16, secure: bool) -> Result<TcpConnection, Error> {
        let stream = self.connect_plain(host, port)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        let mut stream = TcpStream::Plain(stream, true);
        if secure {
            let domain = host.trim_start_matches('[').trim_end_matches(']');
            let mut result = self.into_tls_impl(stream, domain, self.tls_config.as_ref());
            stream = loop {
                match result {
                    Ok(x) => break x,
                    Err(HandshakeError::WouldBlock(x)) => result = x.handshake(),
                    Err(HandshakeError::Failure(err)) => {
                        return Err(Error::new(ErrorKind::ConnectionRefused, err))
                    }
                }
            };
        }
        log::debug!("connected to {host}:{port} secure={secure}");
        Ok(TcpConnection::new(stream))
    }
}
impl Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector")
            .field("accept_invalid_hostnames", &self.accept_invalid_hostnames)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

/// A blocking [`Connection`] that encapsulates a plain or TLS [`TcpStream`].
///
/// Reads are buffered so that the response head can be consumed line by line, while writes go straight to the stream.
pub struct TcpConnection {
    reader: BufReader<TcpStream>,
    closed: bool,
}
impl TcpConnection {
    pub fn new<I: Into<TcpStream>>(stream: I) -> Self {
        Self {
            reader: BufReader::new(stream.into()),
            closed: false,
        }
    }

    pub fn stream(&self) -> &TcpStream {
        self.reader.get_ref()
    }
}
impl Connection for TcpConnection {
    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.reader.get_mut().write(data)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.reader.get_mut().flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.reader.read(buf)
    }

    fn read_line(&mut self, line: &mut Vec<u8>, limit: usize) -> Result<usize, Error> {
        self.reader.by_ref().take(limit as u64).read_until(b'\n', line)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.reader.get_ref().shutdown(Shutdown::Both).ok();
        }
    }
}
impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
impl Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("closed", &self.closed)
            .finish()
    }
}
