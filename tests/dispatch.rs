use std::time::Duration;

use http::{Request, StatusCode};

use streampost::{
    body::{Body, SliceSource},
    client::Dispatcher,
    error::DispatchError,
    mock::{MockConnection, MockConnector, MockWrite},
    redirect::RedirectPolicy,
};

const PREFIX: &str = "--B\r\nname\r\n\r\n";
const SUFFIX: &str = "--B--\r\n";

fn dispatcher(policy: RedirectPolicy) -> Dispatcher<MockConnector> {
    Dispatcher::new(MockConnector::new())
        .with_redirect_policy(policy)
        .with_redirect_limit(5)
        .with_stall_backoff(Duration::from_millis(1))
}

fn redirect(code: u16, location: &str) -> String {
    format!("HTTP/1.1 {code} Redirect\r\nLocation: {location}\r\nContent-Length: 0\r\n\r\n")
}

const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

#[test]
fn test_streams_segmented_body() {
    let data = [b'x'; 100];
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    let transcript = dispatcher.connector_mut().respond(OK);

    let request = Request::post("http://upload.example/api")
        .body(Body::new(PREFIX, SliceSource::new(&data), SUFFIX))
        .unwrap();
    let mut response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.hops(), 0);
    assert_eq!(response.read_body().unwrap(), b"ok");

    let (head, body) = transcript.request();
    assert!(head.starts_with("POST /api HTTP/1.1\r\n"));
    assert_eq!(transcript.header("content-length").as_deref(), Some("120"));
    assert_eq!(transcript.header("host").as_deref(), Some("upload.example"));
    assert_eq!(body.len(), 120);
    assert!(body.starts_with(PREFIX.as_bytes()));
    assert!(body.ends_with(SUFFIX.as_bytes()));
    assert_eq!(
        dispatcher.connector().connects,
        vec![("upload.example".to_owned(), 80, false)]
    );
}

#[test]
fn test_empty_body_has_no_content_length() {
    let mut dispatcher = dispatcher(RedirectPolicy::Disabled);
    let transcript = dispatcher.connector_mut().respond(OK);
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    dispatcher.send(request).unwrap();
    assert_eq!(transcript.header("content-length"), None);
    assert!(transcript.request().1.is_empty());
}

#[test]
fn test_see_other_downgrades_to_get() {
    let data = [b'x'; 100];
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    let first = dispatcher.connector_mut().respond(redirect(303, "/new"));
    let second = dispatcher.connector_mut().respond(OK);

    let request = Request::post("http://example.com/upload")
        .header("content-type", "multipart/form-data; boundary=B")
        .body(Body::new(PREFIX, SliceSource::new(&data), SUFFIX))
        .unwrap();
    let response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.hops(), 1);
    assert_eq!(response.uri(), "http://example.com/new");

    assert_eq!(first.header("content-length").as_deref(), Some("120"));
    assert!(first.is_closed());

    let (head, body) = second.request();
    assert!(head.starts_with("GET /new HTTP/1.1\r\n"));
    assert_eq!(second.header("content-length"), None);
    assert_eq!(second.header("content-type"), None);
    assert!(body.is_empty());
}

#[test]
fn test_found_downgrades_any_method() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    let first = dispatcher
        .connector_mut()
        .respond(redirect(302, "http://other.example/landing"));
    let second = dispatcher.connector_mut().respond(OK);

    let request = Request::put("http://example.com/item")
        .header("authorization", "Bearer secret")
        .header("proxy-authorization", "Basic cHJveHk=")
        .header("cookie", "session=abc")
        .body(Body::from_bytes("payload"))
        .unwrap();
    let response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(second.request().0.starts_with("GET /landing HTTP/1.1\r\n"));
    assert_eq!(second.header("host").as_deref(), Some("other.example"));
    assert_eq!(first.header("cookie").as_deref(), Some("session=abc"));
    // credentials are not forwarded to another host
    assert_eq!(second.header("authorization"), None);
    assert_eq!(second.header("proxy-authorization"), None);
    assert_eq!(second.header("cookie"), None);
}

#[test]
fn test_moved_permanently_post_not_followed() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    dispatcher.connector_mut().respond(redirect(301, "/moved"));

    let request = Request::post("http://example.com/upload")
        .body(Body::from_bytes("data"))
        .unwrap();
    let response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.location(), Some("/moved"));
    assert_eq!(response.hops(), 0);
    assert_eq!(dispatcher.connector().connects.len(), 1);
}

#[test]
fn test_force_follow_preserves_post_and_body() {
    let data = [b'y'; 700];
    let mut dispatcher = dispatcher(RedirectPolicy::ForceFollowAlways);
    let first = dispatcher.connector_mut().respond(redirect(307, "/moved"));
    let second = dispatcher.connector_mut().respond(OK);

    let request = Request::post("http://example.com/upload")
        .body(Body::new(PREFIX, SliceSource::new(&data), SUFFIX))
        .unwrap();
    let response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.method(), "POST");

    let (head, body) = second.request();
    assert!(head.starts_with("POST /moved HTTP/1.1\r\n"));
    assert_eq!(second.header("content-length").as_deref(), Some("720"));
    assert_eq!(body, first.request().1);
    assert_eq!(body.len(), 720);
}

#[test]
fn test_disabled_never_follows() {
    for code in [301, 302, 303, 307] {
        let mut dispatcher = dispatcher(RedirectPolicy::Disabled);
        dispatcher.connector_mut().respond(redirect(code, "/elsewhere"));
        let request = Request::get("http://example.com/")
            .body(Body::empty())
            .unwrap();
        let response = dispatcher.send(request).unwrap();
        assert_eq!(response.status().as_u16(), code);
        assert_eq!(dispatcher.connector().connects.len(), 1);
    }
}

#[test]
fn test_redirect_limit() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    for i in 0..6 {
        dispatcher.connector_mut().respond(redirect(302, &format!("/hop{i}")));
    }
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    let response = dispatcher.send(request).unwrap();

    // the sixth redirect is returned unfollowed
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.hops(), 5);
    assert_eq!(response.location(), Some("/hop5"));
    assert_eq!(dispatcher.connector().connects.len(), 6);
}

#[test]
fn test_unusable_location_returns_status() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    dispatcher.connector_mut().respond(redirect(303, "ftp://files.example/x"));
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    let response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    // the hop was counted before the location was rejected
    assert_eq!(response.hops(), 1);
    assert_eq!(dispatcher.connector().connects.len(), 1);
}

#[test]
fn test_headers_do_not_leak_between_hops() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    let first = dispatcher.connector_mut().respond(
        "HTTP/1.1 303 See Other\r\nLocation: https://secure.example/done\r\nSet-Cookie: sid=42; Path=/\r\n\r\n",
    );
    let second = dispatcher.connector_mut().respond(OK);

    let request = Request::post("http://example.com/form")
        .header("x-trace", "abc")
        .body(Body::from_bytes("a=1"))
        .unwrap();
    dispatcher.send(request).unwrap();

    assert_eq!(first.header("content-length").as_deref(), Some("3"));
    assert_eq!(first.header("cookie"), None);
    assert_eq!(second.header("content-length"), None);
    assert_eq!(second.header("host").as_deref(), Some("secure.example"));
    assert_eq!(second.header("x-trace").as_deref(), Some("abc"));
    // host-only cookie from example.com does not apply to secure.example
    assert_eq!(second.header("cookie"), None);
    assert_eq!(
        dispatcher.connector().connects[1],
        ("secure.example".to_owned(), 443, true)
    );
}

#[test]
fn test_cookies_follow_same_host_redirect() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    dispatcher.connector_mut().respond(
        "HTTP/1.1 302 Found\r\nLocation: /home\r\nSet-Cookie: sid=42; Path=/\r\n\r\n",
    );
    let second = dispatcher.connector_mut().respond(OK);
    let request = Request::get("http://example.com/login")
        .header("cookie", "lang=en")
        .body(Body::empty())
        .unwrap();
    dispatcher.send(request).unwrap();
    assert_eq!(second.header("cookie").as_deref(), Some("lang=en; sid=42"));
}

#[test]
fn test_connection_refused() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    let err = dispatcher.send(request).unwrap_err();
    assert!(matches!(err, DispatchError::ConnectionRefused(_)));
    assert_eq!(err.code(), -1);
}

#[test]
fn test_connection_refused_on_redirect_hop() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    dispatcher.connector_mut().respond(redirect(302, "/next"));
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    let err = dispatcher.send(request).unwrap_err();
    assert!(matches!(err, DispatchError::ConnectionRefused(_)));
}

#[test]
fn test_send_header_failed() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    dispatcher.connector_mut().push(
        MockConnection::new(OK).with_writes([MockWrite::Stall, MockWrite::Stall]),
    );
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    let err = dispatcher.send(request).unwrap_err();
    assert!(matches!(err, DispatchError::SendHeaderFailed(_)));
    assert_eq!(err.code(), -2);
}

#[test]
fn test_single_stall_is_recovered() {
    let data = [b'z'; 100];
    let mut dispatcher = dispatcher(RedirectPolicy::Disabled);
    let transcript = dispatcher.connector_mut().push(
        // head, prefix (stalls once), then everything else
        MockConnection::new(OK).with_writes([MockWrite::Accept, MockWrite::Stall]),
    );
    let request = Request::post("http://example.com/")
        .body(Body::new(PREFIX, SliceSource::new(&data), SUFFIX))
        .unwrap();
    let response = dispatcher.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transcript.request().1.len(), 120);
}

#[test]
fn test_send_payload_failed() {
    let data = [b'z'; 100];
    let mut dispatcher = dispatcher(RedirectPolicy::ForceFollowAlways);
    let transcript = dispatcher.connector_mut().push(
        // head, then the prefix stalls twice
        MockConnection::new(redirect(307, "/again")).with_writes([
            MockWrite::Accept,
            MockWrite::Stall,
            MockWrite::Stall,
        ]),
    );
    let request = Request::post("http://example.com/")
        .body(Body::new(PREFIX, SliceSource::new(&data), SUFFIX))
        .unwrap();
    let err = dispatcher.send(request).unwrap_err();
    match err {
        DispatchError::SendPayloadFailed { sent, expected } => {
            assert_eq!(sent, 107);
            assert_eq!(expected, 120);
        }
        err => panic!("unexpected error: {err}"),
    }
    // later segments were still attempted, and no redirect was followed
    assert!(transcript.request().1.ends_with(SUFFIX.as_bytes()));
    assert!(transcript.is_closed());
    assert_eq!(dispatcher.connector().connects.len(), 1);
}

#[test]
fn test_malformed_response() {
    let mut dispatcher = dispatcher(RedirectPolicy::FollowSameMethod);
    dispatcher.connector_mut().respond("garbage\r\n\r\n");
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    assert!(matches!(
        dispatcher.send(request),
        Err(DispatchError::MalformedResponse(_))
    ));
}

#[test]
fn test_deadline_exceeded() {
    let mut dispatcher =
        dispatcher(RedirectPolicy::FollowSameMethod).with_deadline(Some(Duration::ZERO));
    let request = Request::get("http://example.com/")
        .body(Body::empty())
        .unwrap();
    let err = dispatcher.send(request).unwrap_err();
    assert!(matches!(err, DispatchError::DeadlineExceeded { hops: 0 }));
    assert!(dispatcher.connector().connects.is_empty());
}
