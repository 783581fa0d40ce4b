//! Request handling and transformation.
//!
//! # Responsibilities
//! - Rewrite inbound headers so the upstream sees a browser talking to it directly
//! - Decide whether an inbound body is forwarded
//! - Build the outbound request against the upstream target
//!
//! # Design Decisions
//! - `Host`, `Origin` and `Referer` always come from the upstream target
//! - `User-Agent` is replaced with a stock Chrome string (mobile or desktop)
//! - Hop-by-hop headers never cross the relay
//! - Everything else passes through untouched

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri},
};

use crate::http::error::RelayError;
use crate::upstream::UpstreamTarget;

/// User-Agent sent when the client reports a desktop browser.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// User-Agent sent when `sec-ch-ua-mobile: ?1`.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

/// Client hint selecting the mobile User-Agent.
pub const SEC_CH_UA_MOBILE: &str = "sec-ch-ua-mobile";

/// Headers scoped to a single connection (RFC 9110 §7.6.1).
pub static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// Handshake headers the WebSocket dialer generates itself.
static WEBSOCKET_HANDSHAKE: [HeaderName; 3] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// Headers carrying client credentials; never sent to a host other than the upstream.
pub static CREDENTIAL_HEADERS: [HeaderName; 6] = [
    header::AUTHORIZATION,
    header::PROXY_AUTHORIZATION,
    header::COOKIE,
    HeaderName::from_static("x-emby-authorization"),
    HeaderName::from_static("x-emby-token"),
    HeaderName::from_static("x-mediabrowser-token"),
];

/// `true` when the client hint says this is a mobile browser.
pub fn is_mobile(headers: &HeaderMap) -> bool {
    headers
        .get(SEC_CH_UA_MOBILE)
        .map(|v| v.as_bytes() == b"?1")
        .unwrap_or(false)
}

/// Browser User-Agent for the given client class.
pub fn user_agent(mobile: bool) -> &'static str {
    if mobile { MOBILE_USER_AGENT } else { DESKTOP_USER_AGENT }
}

/// Whether the inbound body is streamed upstream for `method`.
pub fn forwards_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Remove every credential-bearing header.
pub fn strip_credentials(headers: &mut HeaderMap) {
    for name in CREDENTIAL_HEADERS.iter() {
        headers.remove(name);
    }
}

/// Transform inbound headers into the set sent upstream for an HTTP request.
pub fn outbound_headers(inbound: &HeaderMap, method: &Method, upstream: &UpstreamTarget) -> HeaderMap {
    let mobile = is_mobile(inbound);

    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::ORIGIN);

    if !forwards_body(method) {
        headers.remove(header::CONTENT_LENGTH);
    }

    headers.insert(header::USER_AGENT, HeaderValue::from_static(user_agent(mobile)));
    if let Ok(host) = HeaderValue::from_str(upstream.host_header()) {
        headers.insert(header::HOST, host);
    }
    if let Ok(origin) = HeaderValue::from_str(&upstream.origin()) {
        headers.insert(header::ORIGIN, origin);
    }
    if let Ok(referer) = HeaderValue::from_str(&upstream.referer()) {
        headers.insert(header::REFERER, referer);
    }

    headers
}

/// Transform inbound headers for the upstream leg of a WebSocket relay.
pub fn websocket_headers(inbound: &HeaderMap, upstream: &UpstreamTarget) -> HeaderMap {
    let mut headers = outbound_headers(inbound, &Method::GET, upstream);
    for name in WEBSOCKET_HANDSHAKE.iter() {
        headers.remove(name);
    }
    headers
}

/// Path and query of an inbound URI, `/` when absent.
pub fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Build the request sent upstream.
///
/// The method, path and query are kept; GET and HEAD never carry a body.
pub fn build_upstream_request(
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
    upstream: &UpstreamTarget,
) -> Result<Request<Body>, RelayError> {
    let target = upstream
        .http_uri(path_and_query(uri))
        .map_err(|e| RelayError::InvalidRequest(format!("cannot map {} upstream: {}", uri, e)))?;

    let body = if forwards_body(&method) { body } else { Body::empty() };
    let headers = outbound_headers(headers, &method, upstream);

    let mut request = Request::builder()
        .method(method)
        .uri(target)
        .body(body)
        .map_err(|e| RelayError::Internal(e.to_string()))?;
    *request.headers_mut() = headers;

    Ok(request)
}
