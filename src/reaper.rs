use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{now_ms, Engine};

/// Background task that persists the expiry of lapsed booking requests.
/// Reads already treat lapsed requests as expired; the reaper makes the
/// transition durable and frees their staged beds.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = now_ms();
        let expired = engine.collect_expired_requests(now);
        for request_id in expired {
            match engine.expire_request(request_id, now).await {
                Ok(()) => {
                    metrics::counter!(crate::observability::REQUESTS_EXPIRED_TOTAL).increment(1);
                    info!("expired lapsed request {request_id}");
                }
                Err(e) => {
                    // May have been decided in the meantime
                    tracing::debug!("reaper skip {request_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
