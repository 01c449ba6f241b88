//! Cookie jars consulted before each hop and updated after each response head

use ::cookie::Cookie;
use hyperium_http::Uri;

/// Supplies the `Cookie` header for a request and records `Set-Cookie` directives from responses.
pub trait CookieJar {
    /// The `Cookie` header value applicable to `uri`, if any.
    fn cookie_header_for(&self, uri: &Uri) -> Option<String>;

    /// Record the `Set-Cookie` directives received in a response to a request for `uri`.
    fn record(&mut self, uri: &Uri, directives: &[String]);
}

/// A [`CookieJar`] that never sends or stores cookies
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCookies;
impl CookieJar for NoCookies {
    fn cookie_header_for(&self, _uri: &Uri) -> Option<String> {
        None
    }

    fn record(&mut self, _uri: &Uri, _directives: &[String]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
}

impl StoredCookie {
    fn matches(&self, host: &str, path: &str, secure: bool) -> bool {
        if self.secure && !secure {
            return false;
        }
        let domain_match = if self.host_only {
            host == self.domain
        } else {
            domain_matches(host, &self.domain)
        };
        domain_match && path_matches(path, &self.path)
    }
}

/// An in-memory [`CookieJar`], scoped by domain, path and the `Secure` attribute.
///
/// Cookies live as long as the jar. `Max-Age=0` (or negative) removes a stored cookie; `Expires` is ignored.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: Vec<StoredCookie>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    fn store(&mut self, uri: &Uri, directive: &str) {
        let host = match uri.host() {
            Some(x) => x.to_ascii_lowercase(),
            None => return,
        };
        let parsed = match Cookie::parse(directive.to_owned()) {
            Ok(x) => x,
            Err(err) => {
                log::warn!("ignoring invalid set-cookie directive: {err}");
                return;
            }
        };
        let (domain, host_only) = match parsed.domain() {
            Some(d) if !d.is_empty() => {
                let d = d.trim_start_matches('.').to_ascii_lowercase();
                if !domain_matches(&host, &d) {
                    log::warn!("ignoring cookie '{}' for foreign domain '{d}'", parsed.name());
                    return;
                }
                (d, false)
            }
            _ => (host, true),
        };
        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_owned(),
            _ => default_path(uri.path()),
        };
        let expired = parsed
            .max_age()
            .map(|x| x.is_zero() || x.is_negative())
            .unwrap_or(false);

        self.cookies
            .retain(|c| !(c.name == parsed.name() && c.domain == domain && c.path == path));
        if expired {
            return;
        }
        self.cookies.push(StoredCookie {
            name: parsed.name().to_owned(),
            value: parsed.value().to_owned(),
            domain,
            host_only,
            path,
            secure: parsed.secure().unwrap_or(false),
        });
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_header_for(&self, uri: &Uri) -> Option<String> {
        let host = uri.host()?.to_ascii_lowercase();
        let secure = uri.scheme_str() == Some("https");
        let path = uri.path();
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches(&host, path, secure))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    fn record(&mut self, uri: &Uri, directives: &[String]) {
        for directive in directives {
            self.store(uri, directive);
        }
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}

/// Directory of the request path, per RFC 6265 section 5.1.4
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(pos) => request_path[..pos].to_owned(),
    }
}
