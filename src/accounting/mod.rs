//! Media stream accounting.
//!
//! # Data Flow
//! ```text
//! upstream response (content-type video/* or audio/*)
//!     → StreamAccounting::begin (create/refresh the per-path record)
//!     → meter.rs MeteredBody (count each frame on its way to the client)
//!         → shared record updated per chunk
//!         → throughput logged at most once per log interval
//!         → final summary on end, error or client disconnect
//!     → sweeper evicts records idle longer than the TTL
//! ```
//!
//! # Design Decisions
//! - One service object built at startup, shared by handle (cheap clone)
//! - Non-media responses are never wrapped
//! - Records are keyed by path; the query string is ignored

pub mod meter;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::AccountingConfig;
use crate::observability::metrics;

pub use meter::{MeteredBody, StreamMeter};
pub use stats::{format_rate, StreamStat, StreamStatSnapshot};

/// `true` for `video/*` and `audio/*` content types.
pub fn is_media_type(content_type: &str) -> bool {
    let essence = content_type.trim_start().as_bytes();
    let starts_with = |prefix: &[u8]| {
        essence.len() >= prefix.len() && essence[..prefix.len()].eq_ignore_ascii_case(prefix)
    };
    starts_with(b"video/") || starts_with(b"audio/")
}

/// Shared table of per-path stream statistics.
#[derive(Debug, Clone)]
pub struct StreamAccounting {
    records: Arc<DashMap<String, StreamStat>>,
    enabled: bool,
    idle_ttl: Duration,
    sweep_interval: Duration,
    log_interval: Duration,
}

impl StreamAccounting {
    pub fn new(config: &AccountingConfig) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            enabled: config.enabled,
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            log_interval: Duration::from_millis(config.log_interval_ms),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a response with this content type gets metered.
    pub fn should_meter(&self, content_type: Option<&str>) -> bool {
        self.enabled && content_type.map(is_media_type).unwrap_or(false)
    }

    /// Start metering a media response for `path`.
    ///
    /// `request_started` is when the inbound request arrived and
    /// `response_at` when the upstream response headers came back.
    pub fn begin(&self, path: &str, request_started: Instant, response_at: Instant) -> StreamMeter {
        let upstream_latency = response_at.saturating_duration_since(request_started);

        {
            let mut record = self
                .records
                .entry(path.to_string())
                .or_insert_with(|| StreamStat::new(response_at));
            record.requests += 1;
            record.upstream_latency_total += upstream_latency;
            record.last_updated = response_at;
        }
        metrics::set_stream_records(self.records.len());

        tracing::debug!(
            path = %path,
            upstream_latency_ms = upstream_latency.as_millis() as u64,
            "Media stream started"
        );

        StreamMeter::new(self.clone(), path.to_string(), request_started, response_at, self.log_interval)
    }

    /// Add one delivered chunk to the record for `path`.
    pub(crate) fn record_chunk(&self, path: &str, len: usize, now: Instant) {
        let mut record = self
            .records
            .entry(path.to_string())
            .or_insert_with(|| StreamStat::new(now));
        record.bytes += len as u64;
        record.chunks += 1;
        record.last_updated = now;
    }

    /// Record the latency between upstream response and first client byte.
    pub(crate) fn record_first_byte(&self, path: &str, latency: Duration) {
        if let Some(mut record) = self.records.get_mut(path) {
            record.client_latency_total += latency;
            record.client_latency_samples += 1;
        }
    }

    /// Mark `path` as touched at `now` without adding bytes.
    pub(crate) fn touch(&self, path: &str, now: Instant) {
        if let Some(mut record) = self.records.get_mut(path) {
            record.last_updated = now;
        }
    }

    /// Remove records idle for longer than the TTL. Returns how many went.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let before = self.records.len();
        let ttl = self.idle_ttl;
        self.records.retain(|path, stat| {
            let keep = stat.idle_for(now) <= ttl;
            if !keep {
                tracing::debug!(path = %path, bytes = stat.bytes, chunks = stat.chunks, "Evicting idle stream record");
            }
            keep
        });
        let removed = before.saturating_sub(self.records.len());
        metrics::set_stream_records(self.records.len());
        removed
    }

    /// Copy of the record for `path`.
    pub fn get(&self, path: &str) -> Option<StreamStat> {
        self.records.get(path).map(|r| r.value().clone())
    }

    /// Snapshots of every record, busiest first.
    pub fn snapshot(&self) -> Vec<StreamStatSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<_> = self
            .records
            .iter()
            .map(|r| r.value().snapshot(r.key(), now))
            .collect();
        snapshots.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Periodically evict idle records until shutdown.
    pub async fn run_sweeper(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.enabled {
            tracing::info!("Stream accounting disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.sweep_interval.as_secs(),
            idle_ttl_secs = self.idle_ttl.as_secs(),
            "Stream record sweeper starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep_idle(Instant::now());
                    if removed > 0 {
                        tracing::info!(removed, remaining = self.len(), "Swept idle stream records");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Stream record sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
