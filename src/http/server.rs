//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health endpoint and the catch-all relay
//! - Wire up middleware (request ID, tracing, panic capture)
//! - Dispatch each request: WebSocket upgrade or plain HTTP relay
//! - Forward requests to the upstream and stream responses back
//! - Run background tasks (stream sweeper, admin API) alongside the listener

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State, WebSocketUpgrade},
    http::{header, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use hyper::body::Incoming;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::accounting::{MeteredBody, StreamAccounting};
use crate::admin;
use crate::config::validation::ValidationError;
use crate::config::{ConfigError, RelayConfig};
use crate::http::connection::{classify, Dispatch, RelayGuard, RelayPhase, RelayTracker};
use crate::http::error::{panic_response, RelayError};
use crate::http::request::{build_upstream_request, forwards_body, path_and_query, strip_credentials};
use crate::http::response::{content_type, rewrite_location, transform_response_headers};
use crate::http::websocket::{offered_protocols, upstream_request, WebSocketRelay};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::upstream::{build_client, UpstreamClient, UpstreamTarget};

/// Upper bound on followed upstream redirects.
pub const MAX_REDIRECTS: usize = 20;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamTarget>,
    pub client: UpstreamClient,
    pub accounting: StreamAccounting,
    pub tracker: RelayTracker,
    pub shutdown: Shutdown,
    pub connect_timeout: Duration,
    pub follow_redirects: bool,
    pub started_at: std::time::Instant,
}

/// HTTP server for the relay.
pub struct HttpServer {
    router: Router,
    config: RelayConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Fails when the upstream address is missing or unusable.
    pub fn new(config: RelayConfig, shutdown: Shutdown) -> Result<Self, ConfigError> {
        let server = config.upstream.server.as_deref().unwrap_or_default();
        let upstream = UpstreamTarget::parse_with(server, config.upstream.allow_plaintext).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::new("upstream.server", e.to_string())])
        })?;

        let state = AppState {
            upstream: Arc::new(upstream),
            client: build_client(&config.timeouts),
            accounting: StreamAccounting::new(&config.accounting),
            tracker: RelayTracker::new(),
            shutdown,
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            follow_redirects: config.upstream.follow_redirects,
            started_at: std::time::Instant::now(),
        };

        let router = Self::build_router(state.clone());
        Ok(Self { router, config, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/healthz", get(health_handler).fallback(relay_handler))
            .route("/", any(relay_handler))
            .route("/{*path}", any(relay_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(request_span))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(CatchPanicLayer::custom(panic_response)),
            )
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Returns after a shutdown trigger once in-flight requests drain, or once
    /// the grace period expires, whichever comes first.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.state.upstream,
            "HTTP server starting"
        );

        let shutdown = self.state.shutdown.clone();

        tokio::spawn(self.state.accounting.clone().run_sweeper(shutdown.subscribe()));

        if self.config.admin.enabled {
            let admin_state = admin::AdminState::new(&self.state, &self.config.admin);
            let bind = self.config.admin.bind_address.clone();
            let admin_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(&bind, admin_state, admin_shutdown).await {
                    tracing::error!(address = %bind, error = %e, "Admin API failed");
                }
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let graceful = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        };
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future();

        let grace = Duration::from_secs(self.config.listener.shutdown_grace_secs);
        let deadline = async {
            shutdown.wait().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = serve => result?,
            _ = deadline => {
                tracing::warn!(
                    active_relays = self.state.tracker.active_count(),
                    grace_secs = grace.as_secs(),
                    "Shutdown grace period expired, dropping remaining streams"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle to the stream accounting service.
    pub fn accounting(&self) -> StreamAccounting {
        self.state.accounting.clone()
    }

    /// A clone of the fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    )
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
}

/// Liveness endpoint. Never touches the upstream.
async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}

/// Catch-all handler: the upgrade decision point of every relay.
async fn relay_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let mut guard = state.tracker.track();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "-".to_string());

    match classify(request.headers()) {
        Dispatch::WebSocket => upgrade_websocket(state, guard, request).await,
        Dispatch::UnsupportedUpgrade(protocol) => {
            tracing::warn!(relay_id = %guard.id(), peer = %peer, protocol = %protocol, "Rejecting unsupported upgrade");
            guard.transition(RelayPhase::Errored);
            RelayError::UnsupportedUpgrade(protocol).into_response()
        }
        Dispatch::Http => {
            guard.transition(RelayPhase::ProxiedHttp);
            let method = request.method().clone();
            let uri = request.uri().clone();

            match relay_http(&state, request, started).await {
                Ok(response) => {
                    let status = response.status();
                    tracing::info!(
                        relay_id = %guard.id(),
                        peer = %peer,
                        method = %method,
                        upstream_url = %upstream_display(&state.upstream, &uri),
                        status = status.as_u16(),
                        upstream_ms = started.elapsed().as_millis() as u64,
                        "Relayed HTTP request"
                    );
                    metrics::record_request(method.as_str(), status.as_u16(), started.elapsed());
                    response
                }
                Err(e) => {
                    tracing::warn!(
                        relay_id = %guard.id(),
                        peer = %peer,
                        method = %method,
                        upstream_url = %upstream_display(&state.upstream, &uri),
                        error = %e,
                        "Relay error"
                    );
                    guard.transition(RelayPhase::Errored);
                    if matches!(e, RelayError::Upstream(_) | RelayError::TooManyRedirects(_)) {
                        metrics::record_upstream_error("http");
                    }
                    metrics::record_request(method.as_str(), e.status().as_u16(), started.elapsed());
                    e.into_response()
                }
            }
        }
    }
}

fn upstream_display(upstream: &UpstreamTarget, uri: &Uri) -> String {
    format!("{}{}", upstream.origin(), path_and_query(uri))
}

/// Accept the client upgrade and hand the socket to a WebSocket relay.
async fn upgrade_websocket(state: AppState, mut guard: RelayGuard, request: Request<Body>) -> Response {
    let (mut parts, _body) = request.into_parts();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!(relay_id = %guard.id(), error = %rejection, "WebSocket upgrade rejected");
            guard.transition(RelayPhase::Errored);
            return rejection.into_response();
        }
    };

    let request = match upstream_request(&state.upstream, path_and_query(&parts.uri), &parts.headers) {
        Ok(request) => request,
        Err(e) => {
            guard.transition(RelayPhase::Errored);
            return RelayError::InvalidRequest(e.to_string()).into_response();
        }
    };

    let relay_id = guard.id();
    let relay = WebSocketRelay {
        guard,
        request,
        connect_timeout: state.connect_timeout,
        shutdown: state.shutdown.subscribe(),
    };

    upgrade
        .protocols(offered_protocols(&parts.headers))
        .on_failed_upgrade(move |e| {
            tracing::warn!(relay_id = %relay_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| relay.run(socket))
}

/// Relay one plain HTTP exchange. The response body streams lazily.
async fn relay_http(state: &AppState, request: Request<Body>, started: Instant) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let outbound = build_upstream_request(parts.method, &parts.uri, &parts.headers, body, &state.upstream)?;
    let response = send_upstream(state, outbound).await?;
    let response_at = Instant::now();

    let (mut head, incoming) = response.into_parts();
    transform_response_headers(&mut head.headers);
    rewrite_location(&mut head.headers, &state.upstream);

    let body = Body::new(incoming);
    let body = if state.accounting.should_meter(content_type(&head.headers)) {
        let meter = state.accounting.begin(&path, started, response_at);
        Body::new(MeteredBody::new(body, meter))
    } else {
        body
    };

    Ok(Response::from_parts(head, body))
}

/// Send `request` upstream, following redirects for bodiless methods.
async fn send_upstream(state: &AppState, request: Request<Body>) -> Result<Response<Incoming>, RelayError> {
    if !state.follow_redirects || forwards_body(request.method()) {
        return Ok(state.client.request(request).await?);
    }

    let (parts, _) = request.into_parts();
    let mut uri = parts.uri;
    let mut headers = parts.headers;

    for _ in 0..=MAX_REDIRECTS {
        let mut outbound = Request::new(Body::empty());
        *outbound.method_mut() = parts.method.clone();
        *outbound.uri_mut() = uri.clone();
        *outbound.headers_mut() = headers.clone();

        let response = state.client.request(outbound).await?;
        let Some(next) = redirect_target(&uri, &response) else {
            return Ok(response);
        };

        tracing::debug!(from = %uri, to = %next, status = response.status().as_u16(), "Following upstream redirect");
        if next.authority().map(|a| a.as_str()) != Some(state.upstream.authority()) {
            strip_credentials(&mut headers);
        }
        if let Some(authority) = next.authority() {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                headers.insert(header::HOST, host);
            }
        }
        uri = next;
    }

    Err(RelayError::TooManyRedirects(MAX_REDIRECTS))
}

/// Absolute target of a redirect response, if it is one worth following.
fn redirect_target(current: &Uri, response: &Response<Incoming>) -> Option<Uri> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }

    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    resolve_location(current, location)
}

/// Resolve a `Location` value against the URI that produced it.
fn resolve_location(current: &Uri, location: &str) -> Option<Uri> {
    let base = url::Url::parse(&current.to_string()).ok()?;
    let next = base.join(location).ok()?;
    if !matches!(next.scheme(), "http" | "https") {
        return None;
    }
    next.as_str().parse().ok()
}
