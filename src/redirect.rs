//! Redirect follow rules
//!
//! Redirects are handled as described by RFC 7231 section 6.4, implementing `302 Found` as a redirect with `GET` to
//! follow most existing user agents:
//!
//! | Status     | Method             | Body    | Followed when                                   |
//! |------------|--------------------|---------|-------------------------------------------------|
//! | `301`/`307`| preserved          | kept    | [`RedirectPolicy::ForceFollowAlways`], or `GET`/`HEAD` |
//! | `302`/`303`| changed to `GET`   | dropped | always                                          |
//!
//! No status is followed under [`RedirectPolicy::Disabled`], after the hop limit is reached, or without a
//! non-empty `Location`.

use hyperium_http::{Method, StatusCode, Uri};
use url::Url;

/// Governs which redirects are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RedirectPolicy {
    /// Never follow redirects
    #[default]
    Disabled,
    /// Follow `301`/`307` only for `GET` and `HEAD`, and `302`/`303` for any method
    FollowSameMethod,
    /// Follow `301`/`307` for every method, re-sending the body
    ForceFollowAlways,
}

/// How the next hop of a followed redirect is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follow {
    pub method: Method,
    pub keep_body: bool,
}

/// Decide whether a response is followed.
///
/// `hops` is the number of redirects already followed, and `limit` is the maximum number that may be followed.
pub fn evaluate(
    policy: RedirectPolicy,
    hops: u16,
    limit: u16,
    status: StatusCode,
    method: &Method,
    location: Option<&str>,
) -> Option<Follow> {
    if policy == RedirectPolicy::Disabled || hops >= limit {
        return None;
    }
    match location {
        Some(x) if !x.trim().is_empty() => {}
        _ => return None,
    }
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::TEMPORARY_REDIRECT => {
            if policy == RedirectPolicy::ForceFollowAlways
                || *method == Method::GET
                || *method == Method::HEAD
            {
                Some(Follow {
                    method: method.clone(),
                    keep_body: true,
                })
            } else {
                None
            }
        }
        StatusCode::FOUND | StatusCode::SEE_OTHER => Some(Follow {
            method: Method::GET,
            keep_body: false,
        }),
        _ => None,
    }
}

/// Resolve a `Location` value against the URI of the request that received it.
///
/// Absolute URLs, absolute paths, relative paths and query-only references are supported. Fragments are dropped.
/// Returns `None` when the result is not an `http`/`https` URL with a host.
pub fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    let base = Url::parse(&base.to_string()).ok()?;
    let mut target = base.join(location.trim()).ok()?;
    if !matches!(target.scheme(), "http" | "https") || target.host_str().is_none() {
        return None;
    }
    target.set_fragment(None);
    target.as_str().parse().ok()
}
