//! Response handling and transformation.
//!
//! # Responsibilities
//! - Copy the upstream status and headers to the client
//! - Strip headers that break playback inside an embedding page
//! - Inject permissive CORS headers
//!
//! # Design Decisions
//! - Bodies are never touched here; they stream through untouched
//! - Hop-by-hop headers stripped automatically

use axum::http::{header, HeaderMap, HeaderValue};

use crate::http::request::strip_hop_by_hop;
use crate::upstream::UpstreamTarget;

/// Methods advertised in `Access-Control-Allow-Methods`.
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Transform upstream response headers in place for the client.
pub fn transform_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove(header::STRICT_TRANSPORT_SECURITY);
    headers.remove(header::CONTENT_SECURITY_POLICY);

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
}

/// Make a `Location` that points at the upstream origin relative, so the
/// client stays on the relay.
pub fn rewrite_location(headers: &mut HeaderMap, upstream: &UpstreamTarget) {
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };

    let origin = upstream.origin();
    let Some(rest) = location.strip_prefix(origin.as_str()) else {
        return;
    };

    let relative = match rest {
        "" => "/".to_string(),
        r if r.starts_with('/') => r.to_string(),
        r if r.starts_with('?') => format!("/{r}"),
        // Same prefix, different host (e.g. emby.example.com.evil).
        _ => return,
    };

    if let Ok(value) = HeaderValue::from_str(&relative) {
        headers.insert(header::LOCATION, value);
    }
}

/// Content type of a response, if it is valid ASCII.
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
}
