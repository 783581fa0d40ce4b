use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;

pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if key_matches(&state.api_key, token) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Constant-time key check. An empty configured key matches nothing.
fn key_matches(expected: &str, candidate: &str) -> bool {
    !expected.is_empty() && constant_time_eq::constant_time_eq(expected.as_bytes(), candidate.as_bytes())
}
