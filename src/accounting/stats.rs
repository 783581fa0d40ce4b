//! Per-path stream statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Accumulated counters for one media path.
#[derive(Debug, Clone)]
pub struct StreamStat {
    /// Bytes delivered to clients across all responses for this path.
    pub bytes: u64,
    /// Data frames delivered.
    pub chunks: u64,
    /// Media responses seen for this path.
    pub requests: u64,
    pub first_seen: Instant,
    pub last_updated: Instant,
    /// Sum of request-start → upstream-response-headers latencies.
    pub upstream_latency_total: Duration,
    /// Sum of upstream-response → first-byte-to-client latencies.
    pub client_latency_total: Duration,
    pub client_latency_samples: u64,
}

impl StreamStat {
    pub fn new(now: Instant) -> Self {
        Self {
            bytes: 0,
            chunks: 0,
            requests: 0,
            first_seen: now,
            last_updated: now,
            upstream_latency_total: Duration::ZERO,
            client_latency_total: Duration::ZERO,
            client_latency_samples: 0,
        }
    }

    /// Mean time until the upstream answered.
    pub fn avg_upstream_latency(&self) -> Duration {
        average(self.upstream_latency_total, self.requests)
    }

    /// Mean time from upstream response to the first byte reaching the client.
    pub fn avg_client_latency(&self) -> Option<Duration> {
        (self.client_latency_samples > 0)
            .then(|| average(self.client_latency_total, self.client_latency_samples))
    }

    /// Time since the last update.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_updated)
    }

    /// Serializable view of this record.
    pub fn snapshot(&self, path: &str, now: Instant) -> StreamStatSnapshot {
        StreamStatSnapshot {
            path: path.to_string(),
            bytes: self.bytes,
            chunks: self.chunks,
            requests: self.requests,
            age_secs: now.saturating_duration_since(self.first_seen).as_secs_f64(),
            idle_secs: self.idle_for(now).as_secs_f64(),
            avg_upstream_latency_ms: millis(self.avg_upstream_latency()),
            avg_client_latency_ms: self.avg_client_latency().map(millis),
        }
    }
}

/// Point-in-time view of a [`StreamStat`], as served by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStatSnapshot {
    pub path: String,
    pub bytes: u64,
    pub chunks: u64,
    pub requests: u64,
    pub age_secs: f64,
    pub idle_secs: f64,
    pub avg_upstream_latency_ms: f64,
    pub avg_client_latency_ms: Option<f64>,
}

fn average(total: Duration, samples: u64) -> Duration {
    match u32::try_from(samples) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / samples as f64),
    }
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Bytes per second over `elapsed`; zero when no time has passed.
pub fn rate(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

/// Human-readable transfer rate, e.g. `1.50 MB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
