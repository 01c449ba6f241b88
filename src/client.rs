//! The redirect-following [`Dispatcher`]

use std::{
    fmt::Debug,
    io::{Error, ErrorKind},
    time::{Duration, Instant},
};

use hyperium_http::{
    header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, PROXY_AUTHORIZATION},
    Method, Request, Uri,
};

use crate::{
    body::{Body, BodyTransmitter, StreamSource, DEFAULT_STALL_BACKOFF},
    cookie::{CookieJar, MemoryCookieJar},
    error::DispatchError,
    header::{self, HeaderTable},
    redirect::{self, RedirectPolicy},
    response::{self, Response},
    Connection, Connector,
};

/// Default maximum number of redirects followed for one request.
pub const DEFAULT_REDIRECT_LIMIT: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}
impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Where a single hop connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}
impl Target {
    pub fn from_uri(uri: &Uri) -> Result<Self, DispatchError> {
        let scheme = match uri.scheme_str() {
            None | Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            Some(x) => {
                return Err(DispatchError::InvalidRequest(format!(
                    "bad http uri scheme '{x}'"
                )))
            }
        };
        let host = match uri.host() {
            Some(x) if !x.is_empty() => x.to_owned(),
            _ => return Err(DispatchError::InvalidRequest("missing host".to_owned())),
        };
        let port = match uri.port_u16() {
            Some(x) => x,
            None => scheme.default_port(),
        };
        Ok(Self { scheme, host, port })
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Value of the `Host` header, which omits the default port
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Settings applied to every dispatch.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub redirect_policy: RedirectPolicy,
    pub redirect_limit: u16,
    pub stall_backoff: Duration,
    pub deadline: Option<Duration>,
    pub user_agent: Option<String>,
}
impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            redirect_policy: RedirectPolicy::Disabled,
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
            stall_backoff: DEFAULT_STALL_BACKOFF,
            deadline: None,
            user_agent: Some(concat!("streampost/", env!("CARGO_PKG_VERSION")).to_owned()),
        }
    }
}

/// A blocking HTTP/1.1 client that streams segmented bodies and follows redirects.
///
/// Each call to [`Dispatcher::send`] runs the whole redirect chain sequentially. Every hop opens a fresh connection
/// through the [`Connector`], writes the request head and body, then reads the response head. The hop's connection is
/// closed before the next hop connects. Cookies received on any hop are recorded in the [`CookieJar`] and offered to
/// subsequent hops and requests.
///
/// ## Example
///
/// ```no_run
/// use streampost::body::Body;
/// use streampost::client::Dispatcher;
/// use streampost::hyperium_http::Request;
/// use streampost::redirect::RedirectPolicy;
/// use streampost::tcp::TcpConnector;
///
/// let mut dispatcher = Dispatcher::new(TcpConnector::new())
///     .with_redirect_policy(RedirectPolicy::FollowSameMethod)
///     .with_redirect_limit(5);
/// let request = Request::get("http://icanhazip.com").body(Body::empty()).unwrap();
/// let mut response = dispatcher.send(request).unwrap();
/// println!("{}", response.read_body_to_string().unwrap());
/// ```
pub struct Dispatcher<C, J = MemoryCookieJar> {
    connector: C,
    cookie_jar: J,
    config: DispatchConfig,
}

impl<C: Connector> Dispatcher<C, MemoryCookieJar> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            cookie_jar: MemoryCookieJar::new(),
            config: DispatchConfig::default(),
        }
    }
}

impl<C: Connector, J: CookieJar> Dispatcher<C, J> {
    /// Replace the cookie jar
    pub fn with_cookie_jar<K: CookieJar>(self, cookie_jar: K) -> Dispatcher<C, K> {
        Dispatcher {
            connector: self.connector,
            cookie_jar,
            config: self.config,
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_redirect_policy(mut self, redirect_policy: RedirectPolicy) -> Self {
        self.config.redirect_policy = redirect_policy;
        self
    }

    pub fn with_redirect_limit(mut self, redirect_limit: u16) -> Self {
        self.config.redirect_limit = redirect_limit;
        self
    }

    /// Delay before retrying a stalled write
    pub fn with_stall_backoff(mut self, stall_backoff: Duration) -> Self {
        self.config.stall_backoff = stall_backoff;
        self
    }

    /// Bound the wall-clock time of a whole redirect chain. The deadline is checked before each hop starts.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    pub fn cookie_jar(&self) -> &J {
        &self.cookie_jar
    }

    pub fn cookie_jar_mut(&mut self) -> &mut J {
        &mut self.cookie_jar
    }

    /// Send `request`, following redirects according to the configured policy.
    ///
    /// Returns the response of the final hop, with its body still unread on the connection. Any status received from
    /// the server is a success; only local failures are returned as a [`DispatchError`].
    pub fn send<S: StreamSource>(
        &mut self,
        request: Request<Body<S>>,
    ) -> Result<Response<C::Connection>, DispatchError> {
        let (parts, mut body) = request.into_parts();
        let mut method = parts.method;
        let mut uri = parts.uri;
        let mut headers = parts.headers;
        let mut body_active = true;
        let mut hops: u16 = 0;
        let mut table = HeaderTable::new();
        let transmitter = BodyTransmitter::new(self.config.stall_backoff);
        let started = Instant::now();

        loop {
            if let Some(deadline) = self.config.deadline {
                if started.elapsed() >= deadline {
                    return Err(DispatchError::DeadlineExceeded { hops });
                }
            }

            // wipe any headers from the previous hop
            table.clear();

            log::debug!("request type: '{method}' redirect count: {hops} target: {uri}");
            let target = Target::from_uri(&uri)?;
            let mut conn = self
                .connector
                .connect(&target.host, target.port, target.is_secure())
                .map_err(DispatchError::ConnectionRefused)?;

            let content_length = if body_active { body.len() } else { 0 };
            let head = self
                .prepare_head(&mut table, &method, &uri, &target, &headers, content_length)
                .map_err(DispatchError::SendHeaderFailed)?;
            let sent = transmitter.write_segment(&mut conn, &head);
            if sent != head.len() {
                conn.close();
                return Err(DispatchError::SendHeaderFailed(Error::new(
                    ErrorKind::WriteZero,
                    format!("sent {sent} of {} request head bytes", head.len()).as_str(),
                )));
            }

            if content_length > 0 {
                if hops > 0 {
                    if let Err(err) = body.source_mut().rewind() {
                        log::warn!("could not rewind stream source for redirect: {err}");
                    }
                }
                let sent = transmitter.transmit(&mut conn, &mut body);
                if sent != content_length {
                    conn.close();
                    return Err(DispatchError::SendPayloadFailed {
                        sent,
                        expected: content_length,
                    });
                }
            } else if let Err(err) = conn.flush() {
                conn.close();
                return Err(DispatchError::SendHeaderFailed(err));
            }

            let head = response::read_head(&mut conn)?;
            log::debug!("sendRequest code={}", head.status.as_u16());
            self.cookie_jar.record(&uri, &head.set_cookies());

            let follow = redirect::evaluate(
                self.config.redirect_policy,
                hops,
                self.config.redirect_limit,
                head.status,
                &method,
                head.location(),
            );
            let follow = match follow {
                Some(x) => x,
                None => return Ok(Response::new(head, conn, method, uri, hops)),
            };

            // the counter advances even if the location turns out to be unusable
            hops += 1;
            let location = head.location().unwrap_or_default().to_owned();
            log::debug!(
                "following redirect ({}): '{location}' redirect count: {hops}",
                if follow.keep_body {
                    "the same method"
                } else {
                    "dropped to GET"
                }
            );
            let next = match redirect::resolve_location(&uri, &location) {
                Some(x) => x,
                None => {
                    log::debug!("failed setting URL for redirection");
                    return Ok(Response::new(head, conn, method, uri, hops));
                }
            };
            conn.close();

            if next.host() != uri.host() {
                for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE] {
                    headers.remove(name);
                }
            }
            if !follow.keep_body {
                body_active = false;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            method = follow.method;
            uri = next;
        }
    }

    fn prepare_head(
        &self,
        table: &mut HeaderTable,
        method: &Method,
        uri: &Uri,
        target: &Target,
        headers: &hyperium_http::HeaderMap,
        content_length: u64,
    ) -> Result<Vec<u8>, Error> {
        table.fill(
            &target.host_header(),
            self.config.user_agent.as_deref(),
            headers,
        )?;
        table.set_content_length(content_length);
        if let Some(cookie) = self.cookie_jar.cookie_header_for(uri) {
            table.set_cookie(&cookie)?;
        }
        header::assemble(method, uri, table)
    }
}

impl<C: Debug, J: Debug> Debug for Dispatcher<C, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connector", &self.connector)
            .field("cookie_jar", &self.cookie_jar)
            .field("config", &self.config)
            .finish()
    }
}
