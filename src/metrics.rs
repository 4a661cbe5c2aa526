// Best-effort metrics (spec.md §3 ambient concern, §6 `engine_metrics`
// table): in-process atomic counters exposed over the Admin Surface,
// persisted to the store opportunistically. Losing a sample is never an
// error — `StoreGateway::record_metric` already swallows failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::StoreGateway;

#[derive(Default)]
pub struct Counters {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub wal_entries_recorded: AtomicU64,
    pub wal_entries_synced: AtomicU64,
    pub wal_entries_failed: AtomicU64,
    pub transactions_recovered: AtomicU64,
    pub transactions_abandoned: AtomicU64,
    pub queue_rejections: AtomicU64,
}

pub struct Metrics {
    counters: Arc<Counters>,
    store: Arc<StoreGateway>,
}

impl Metrics {
    pub fn new(store: Arc<StoreGateway>) -> Self {
        Self { counters: Arc::new(Counters::default()), store }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.counters.requests_total.load(Ordering::Relaxed),
            requests_failed: self.counters.requests_failed.load(Ordering::Relaxed),
            wal_entries_recorded: self.counters.wal_entries_recorded.load(Ordering::Relaxed),
            wal_entries_synced: self.counters.wal_entries_synced.load(Ordering::Relaxed),
            wal_entries_failed: self.counters.wal_entries_failed.load(Ordering::Relaxed),
            transactions_recovered: self.counters.transactions_recovered.load(Ordering::Relaxed),
            transactions_abandoned: self.counters.transactions_abandoned.load(Ordering::Relaxed),
            queue_rejections: self.counters.queue_rejections.load(Ordering::Relaxed),
        }
    }

    /// Flushes the current snapshot to the store (spec.md §6
    /// `engine_metrics`). Called from the reconciliation worker's
    /// rollup tick, not on every request.
    pub async fn flush(&self) {
        let snapshot = self.snapshot();
        self.store.record_metric("requests_total", snapshot.requests_total as f64).await;
        self.store.record_metric("requests_failed", snapshot.requests_failed as f64).await;
        self.store.record_metric("wal_entries_recorded", snapshot.wal_entries_recorded as f64).await;
        self.store.record_metric("wal_entries_synced", snapshot.wal_entries_synced as f64).await;
        self.store.record_metric("wal_entries_failed", snapshot.wal_entries_failed as f64).await;
        self.store
            .record_metric("transactions_recovered", snapshot.transactions_recovered as f64)
            .await;
        self.store
            .record_metric("transactions_abandoned", snapshot.transactions_abandoned as f64)
            .await;
        self.store.record_metric("queue_rejections", snapshot.queue_rejections as f64).await;
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub wal_entries_recorded: u64,
    pub wal_entries_synced: u64,
    pub wal_entries_failed: u64,
    pub transactions_recovered: u64,
    pub transactions_abandoned: u64,
    pub queue_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_is_independent_per_counter() {
        let counters = Counters::default();
        counters.requests_total.fetch_add(1, Ordering::Relaxed);
        counters.requests_total.fetch_add(1, Ordering::Relaxed);
        counters.requests_failed.fetch_add(1, Ordering::Relaxed);

        assert_eq!(counters.requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(counters.requests_failed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.wal_entries_recorded.load(Ordering::Relaxed), 0);
    }
}
