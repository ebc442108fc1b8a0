//! Backfill requests.
//!
//! After a reconnect the client asks an external collaborator to re-fetch the
//! window it may have missed. Requests are fire-and-forget; the client never
//! waits for data.

use serde::Serialize;
use shadow_core::TimestampMs;
use tokio::sync::mpsc;
use tracing::warn;

/// Window of historical trades to re-fetch, `[start_ts_ms, end_ts_ms]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillRequest {
    pub exchange: String,
    pub symbols: Vec<String>,
    pub start_ts_ms: TimestampMs,
    pub end_ts_ms: TimestampMs,
}

/// Receiver of backfill requests. Must not block.
pub trait BackfillSink: Send + Sync {
    fn request_backfill(&self, request: BackfillRequest);
}

/// Drops every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackfill;

impl BackfillSink for NoopBackfill {
    fn request_backfill(&self, _request: BackfillRequest) {}
}

impl BackfillSink for mpsc::UnboundedSender<BackfillRequest> {
    fn request_backfill(&self, request: BackfillRequest) {
        if let Err(e) = self.send(request) {
            warn!(exchange = %e.0.exchange, "backfill receiver dropped; request discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BackfillRequest {
        BackfillRequest {
            exchange: "kraken".to_string(),
            symbols: vec!["XBT/USD".to_string()],
            start_ts_ms: 1_000,
            end_ts_ms: 2_000,
        }
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.request_backfill(request());
        assert_eq!(rx.try_recv().unwrap(), request());
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel::<BackfillRequest>();
        drop(rx);
        tx.request_backfill(request());
    }
}
