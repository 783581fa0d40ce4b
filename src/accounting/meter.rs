//! Per-response metering.
//!
//! `MeteredBody` wraps a response body and reports every data frame to a
//! [`StreamMeter`] before handing it on. The body itself is never altered.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use tokio::time::Instant;

use crate::accounting::stats::{format_rate, rate};
use crate::accounting::StreamAccounting;
use crate::observability::metrics;

/// How a metered response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    /// The body was dropped before the end, usually a client disconnect.
    Aborted,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Aborted => "aborted",
        }
    }
}

/// Byte and timing counters for one media response.
#[derive(Debug)]
pub struct StreamMeter {
    accounting: StreamAccounting,
    path: String,
    request_started: Instant,
    response_at: Instant,
    log_interval: Duration,
    last_log: Instant,
    bytes: u64,
    chunks: u64,
    first_byte_seen: bool,
    finished: bool,
}

impl StreamMeter {
    pub(crate) fn new(
        accounting: StreamAccounting,
        path: String,
        request_started: Instant,
        response_at: Instant,
        log_interval: Duration,
    ) -> Self {
        Self {
            accounting,
            path,
            request_started,
            response_at,
            log_interval,
            last_log: response_at,
            bytes: 0,
            chunks: 0,
            first_byte_seen: false,
            finished: false,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Count a chunk of `len` bytes handed to the client.
    pub fn on_chunk(&mut self, len: usize) {
        let now = Instant::now();

        if !self.first_byte_seen {
            self.first_byte_seen = true;
            self.accounting
                .record_first_byte(&self.path, now.saturating_duration_since(self.response_at));
        }

        self.bytes += len as u64;
        self.chunks += 1;
        self.accounting.record_chunk(&self.path, len, now);
        metrics::record_media_bytes(len as u64);

        if now.saturating_duration_since(self.last_log) >= self.log_interval {
            self.last_log = now;
            let (upload, download) = self.rates(now);
            tracing::info!(
                path = %self.path,
                bytes = self.bytes,
                chunks = self.chunks,
                upload_rate = %format_rate(upload),
                download_rate = %format_rate(download),
                "Media stream throughput"
            );
        }
    }

    /// The response body ended normally.
    pub fn finish_ok(&mut self) {
        self.finish(Outcome::Completed);
    }

    /// The upstream body failed mid-stream.
    pub fn finish_err(&mut self, error: &dyn std::fmt::Display) {
        tracing::warn!(path = %self.path, bytes = self.bytes, error = %error, "Media stream aborted by upstream error");
        self.finish(Outcome::Failed);
    }

    /// Client-facing rate since the upstream responded, and end-to-end rate
    /// since the request arrived.
    fn rates(&self, now: Instant) -> (f64, f64) {
        let upload = rate(self.bytes, now.saturating_duration_since(self.response_at));
        let download = rate(self.bytes, now.saturating_duration_since(self.request_started));
        (upload, download)
    }

    fn finish(&mut self, outcome: Outcome) {
        if self.finished {
            return;
        }
        self.finished = true;

        let now = Instant::now();
        self.accounting.touch(&self.path, now);

        let (upload, download) = self.rates(now);
        tracing::info!(
            path = %self.path,
            outcome = outcome.as_str(),
            bytes = self.bytes,
            chunks = self.chunks,
            duration_ms = now.saturating_duration_since(self.request_started).as_millis() as u64,
            upload_rate = %format_rate(upload),
            download_rate = %format_rate(download),
            "Media stream finished"
        );
    }
}

impl Drop for StreamMeter {
    fn drop(&mut self) {
        self.finish(Outcome::Aborted);
    }
}

/// Response body decorator that meters data frames.
#[derive(Debug)]
pub struct MeteredBody {
    inner: Body,
    meter: StreamMeter,
}

impl MeteredBody {
    pub fn new(inner: Body, meter: StreamMeter) -> Self {
        Self { inner, meter }
    }
}

impl http_body::Body for MeteredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.meter.on_chunk(data.len());
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.meter.finish_err(&e);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.meter.finish_ok();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountingConfig;
    use futures_util::stream;

    #[tokio::test]
    async fn metered_body_passes_bytes_through() {
        let accounting = StreamAccounting::new(&AccountingConfig::default());
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"ftyp")),
            Ok(Bytes::from(vec![7u8; 4096])),
            Ok(Bytes::from_static(b"moov")),
        ];
        let inner = Body::from_stream(stream::iter(chunks));

        let meter = accounting.begin("/Videos/9/stream.mp4", Instant::now(), Instant::now());
        let body = Body::new(MeteredBody::new(inner, meter));

        let collected = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(collected.len(), 4 + 4096 + 4);
        assert_eq!(&collected[..4], b"ftyp");
        assert_eq!(&collected[collected.len() - 4..], b"moov");

        let record = accounting.get("/Videos/9/stream.mp4").unwrap();
        assert_eq!(record.bytes, 4104);
        assert_eq!(record.chunks, 3);
    }

    #[tokio::test]
    async fn dropped_body_still_keeps_partial_totals() {
        let accounting = StreamAccounting::new(&AccountingConfig::default());
        let mut meter = accounting.begin("/Audio/4/universal", Instant::now(), Instant::now());
        meter.on_chunk(2048);
        assert_eq!(meter.bytes(), 2048);
        assert_eq!(meter.chunks(), 1);
        drop(meter);

        assert_eq!(accounting.get("/Audio/4/universal").unwrap().bytes, 2048);
    }
}
