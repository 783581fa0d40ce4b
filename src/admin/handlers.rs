use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::accounting::StreamStatSnapshot;
use crate::admin::AdminState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub upstream: String,
    pub uptime_secs: u64,
    pub active_relays: u64,
    pub websocket_relays: u64,
    pub stream_records: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        upstream: state.upstream.origin(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_relays: state.tracker.active_count(),
        websocket_relays: state.tracker.websocket_count(),
        stream_records: state.accounting.len(),
    })
}

/// Live stream records, busiest first.
pub async fn get_streams(State(state): State<AdminState>) -> Json<Vec<StreamStatSnapshot>> {
    Json(state.accounting.snapshot())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, http::StatusCode};
    use tokio::time::Instant;
    use tower::ServiceExt;

    use super::*;
    use crate::accounting::StreamAccounting;
    use crate::admin::setup_admin_router;
    use crate::config::AccountingConfig;
    use crate::http::connection::RelayTracker;
    use crate::upstream::UpstreamTarget;

    fn state() -> AdminState {
        AdminState {
            upstream: Arc::new(UpstreamTarget::parse("https://emby.example.com").unwrap()),
            accounting: StreamAccounting::new(&AccountingConfig::default()),
            tracker: RelayTracker::new(),
            started_at: std::time::Instant::now(),
            api_key: Arc::from("secret"),
        }
    }

    fn get(path: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(path);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn requires_bearer_key() {
        let router = setup_admin_router(state());

        let missing = router.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router.clone().oneshot(get("/admin/status", Some("nope"))).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = router.oneshot(get("/admin/status", Some("secret"))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(ok.into_body(), 64 * 1024).await.unwrap();
        let status: SystemStatus = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status.upstream, "https://emby.example.com");
        assert_eq!(status.active_relays, 0);
    }

    #[tokio::test]
    async fn lists_stream_records() {
        let state = state();
        let mut meter = state.accounting.begin("/Videos/7/stream.mp4", Instant::now(), Instant::now());
        meter.on_chunk(4096);
        meter.finish_ok();

        let response = setup_admin_router(state)
            .oneshot(get("/admin/streams", Some("secret")))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let streams: Vec<StreamStatSnapshot> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].path, "/Videos/7/stream.mp4");
        assert_eq!(streams[0].bytes, 4096);
    }
}
