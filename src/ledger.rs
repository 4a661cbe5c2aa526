// Transaction Safety Ledger (spec.md §4.E): a durable record of "a write
// was about to be dispatched" opened before the dispatch and closed
// immediately after, so a crash mid-dispatch is recoverable instead of
// silently lost.
//
// Lifecycle: ATTEMPTING -> COMPLETED (normal path) or, if the process
// dies before closing the row, ATTEMPTING sits until the recovery sweep
// finds it past `ledger.stuck_threshold` and moves it to
// PENDING_RECOVERY -> RECOVERED (the write turns out to have landed) or
// ABANDONED (it didn't, and retrying now would be unsafe/too late).
//
// Grounded on the teacher's `transaction/wal_manager.rs` /
// `transaction/recovery.rs` pair: a pre-image ledger plus a periodic
// sweep, the same shape used here with rows instead of log segments.

use crate::config::LedgerConfig;
use crate::error::Result;
use crate::store::{AttemptStatus, StoreGateway, TransactionAttempt};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TransactionLedger {
    store: Arc<StoreGateway>,
    config: LedgerConfig,
}

impl TransactionLedger {
    pub fn new(store: Arc<StoreGateway>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Opens an ATTEMPTING row before the Router dispatches a write.
    /// Returns the `transaction_id` the caller must pass to `complete`.
    pub async fn begin(
        &self,
        method: &str,
        path: &str,
        data: &[u8],
        headers: serde_json::Value,
        client_session: Option<String>,
    ) -> Result<String> {
        let transaction_id = Uuid::new_v4().to_string();
        let attempt = TransactionAttempt {
            transaction_id: transaction_id.clone(),
            method: method.to_string(),
            path: path.to_string(),
            data: data.to_vec(),
            headers,
            status: AttemptStatus::Attempting,
            created_at: Utc::now(),
            completed_at: None,
            retry_count: 0,
            client_session,
            failure_reason: None,
        };
        self.store.open_attempt(&attempt).await?;
        Ok(transaction_id)
    }

    pub async fn complete(&self, transaction_id: &str) -> Result<()> {
        self.store.close_attempt(transaction_id, AttemptStatus::Completed, None).await
    }

    pub async fn fail(&self, transaction_id: &str, reason: &str) -> Result<()> {
        self.store.close_attempt(transaction_id, AttemptStatus::Failed, Some(reason)).await
    }

    /// Recovery sweep (spec.md §4.E, cadence `ledger.recovery_interval`):
    /// attempts stuck in ATTEMPTING past `stuck_threshold` are presumed
    /// crashed mid-dispatch and moved to PENDING_RECOVERY; attempts
    /// already in PENDING_RECOVERY are resolved by checking whether the
    /// write is now visible on the instance it targeted via `verify`.
    pub async fn sweep<F, Fut>(&self, verify: F) -> Result<SweepReport>
    where
        F: Fn(TransactionAttempt) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let stuck_before = Utc::now() - chrono::Duration::from_std(self.config.stuck_threshold).unwrap();
        let stuck = self.store.stuck_attempts(stuck_before).await?;
        let mut report = SweepReport::default();

        for attempt in stuck {
            warn!(transaction_id = %attempt.transaction_id, "transaction attempt stuck past threshold, marking for recovery");
            self.store
                .mark_attempt_status(&attempt.transaction_id, AttemptStatus::PendingRecovery)
                .await?;
            report.flagged += 1;
        }

        let pending = self.store.pending_recovery_attempts().await?;
        for attempt in pending {
            if attempt.retry_count >= self.config.max_recovery_attempts {
                self.store
                    .close_attempt(
                        &attempt.transaction_id,
                        AttemptStatus::Abandoned,
                        Some("exceeded max recovery attempts"),
                    )
                    .await?;
                warn!(transaction_id = %attempt.transaction_id, "abandoning transaction attempt after exhausting recovery attempts");
                report.abandoned += 1;
                continue;
            }

            let transaction_id = attempt.transaction_id.clone();
            if verify(attempt).await {
                self.store
                    .close_attempt(&transaction_id, AttemptStatus::Recovered, None)
                    .await?;
                info!(transaction_id, "transaction attempt recovered");
                report.recovered += 1;
            } else {
                self.store.mark_attempt_status(&transaction_id, AttemptStatus::PendingRecovery).await?;
                report.still_pending += 1;
            }
        }

        Ok(report)
    }

    pub async fn prune_resolved(&self, older_than: chrono::DateTime<Utc>) -> Result<u64> {
        self.store.prune_completed_attempts(older_than).await
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub flagged: u64,
    pub recovered: u64,
    pub abandoned: u64,
    pub still_pending: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_report_defaults_to_all_zero() {
        let report = SweepReport::default();
        assert_eq!(report.flagged, 0);
        assert_eq!(report.recovered, 0);
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.still_pending, 0);
    }
}
