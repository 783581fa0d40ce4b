//! Outbound HTTP(S) client.

use std::time::Duration;

use axum::body::Body;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::TimeoutConfig;

/// Pooled client used for every relayed HTTP request.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Install `ring` as the process-wide rustls provider.
///
/// Both the HTTP client and the WebSocket dialer build their TLS configs from
/// the process default. Installing twice is a no-op.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Build the upstream client: HTTPS or plain HTTP, webpki roots, HTTP/1.1.
pub fn build_client(timeouts: &TimeoutConfig) -> UpstreamClient {
    install_crypto_provider();

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new()).build(https)
}
