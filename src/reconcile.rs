// Reconciliation Workers (spec.md §4.F): the background loops that keep
// the two instances converging without a client in the loop — WAL
// draining, ledger recovery sweeps, and metrics/retention rollup.
//
// Grounded on the teacher's `networking/health/mod.rs` loop shape
// (`Arc<RwLock<bool>>` running flag + `tokio::spawn` + `tokio::time::
// interval`), reused here for three independent loops instead of one.

use crate::common::{Component, InstanceRole};
use crate::config::{LedgerConfig, WalConfig};
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::health::HealthMonitor;
use crate::ledger::TransactionLedger;
use crate::mapping::MappingRegistry;
use crate::metrics::Metrics;
use crate::store::StoreGateway;
use crate::upstream::UpstreamClient;
use crate::wal::WalEngine;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const METRICS_ROLLUP_INTERVAL_SECS: u64 = 30;
const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3600;
const SYNCED_WAL_RETENTION_HOURS: i64 = 24;
const RESOLVED_ATTEMPT_RETENTION_HOURS: i64 = 24;

pub struct ReconciliationWorkers {
    store: Arc<StoreGateway>,
    wal: Arc<WalEngine>,
    ledger: Arc<TransactionLedger>,
    health: Arc<HealthMonitor>,
    upstream: Arc<UpstreamClient>,
    mapping: Arc<MappingRegistry>,
    metrics: Arc<Metrics>,
    events_bus: EventBus,
    wal_config: WalConfig,
    ledger_config: LedgerConfig,
    running: Arc<RwLock<bool>>,
}

impl ReconciliationWorkers {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StoreGateway>,
        wal: Arc<WalEngine>,
        ledger: Arc<TransactionLedger>,
        health: Arc<HealthMonitor>,
        upstream: Arc<UpstreamClient>,
        mapping: Arc<MappingRegistry>,
        metrics: Arc<Metrics>,
        events_bus: EventBus,
        wal_config: WalConfig,
        ledger_config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            wal,
            ledger,
            health,
            upstream,
            mapping,
            metrics,
            events_bus,
            wal_config,
            ledger_config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    fn spawn_wal_drain_loop(&self, mut recovery_rx: tokio::sync::broadcast::Receiver<EngineEvent>) {
        let wal = Arc::clone(&self.wal);
        let health = Arc::clone(&self.health);
        let running = Arc::clone(&self.running);
        let interval = self.wal_config.sync_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                if !*running.read().await {
                    break;
                }

                // On a recovery event, drain the instance that just came
                // back first so its backlog starts closing immediately
                // instead of waiting for the next scheduled tick.
                let priority_instance = tokio::select! {
                    _ = ticker.tick() => None,
                    event = recovery_rx.recv() => match event {
                        Ok(EngineEvent::InstanceRecovered { instance }) => Some(instance),
                        Ok(EngineEvent::InstanceDown { .. }) => continue,
                        Err(_) => None,
                    },
                };

                if let Some(instance) = priority_instance {
                    if health.cached_status(instance).await == crate::common::HealthStatus::Healthy {
                        match wal.drain(instance).await {
                            Ok(n) if n > 0 => info!(%instance, synced = n, "priority wal drain after recovery"),
                            Ok(_) => {}
                            Err(e) => warn!(%instance, error = %e, "priority wal drain failed"),
                        }
                    }
                }

                for instance in [InstanceRole::Primary, InstanceRole::Replica] {
                    match wal.drain(instance).await {
                        Ok(n) if n > 0 => info!(%instance, synced = n, "wal drain synced entries"),
                        Ok(_) => {}
                        Err(e) => warn!(%instance, error = %e, "wal drain failed"),
                    }
                }
            }
        });
    }

    /// Collection-recovery sync (spec.md §4.G.2): on instance recovery,
    /// lists collections on the just-recovered instance's mappings and,
    /// for any mapping whose other side's id is set but this instance's
    /// id is missing, issues a name-based create on this instance and
    /// records the new identifier. Re-establishes full identifiers for
    /// collections created while one side was down.
    fn spawn_collection_recovery_loop(&self, mut recovery_rx: tokio::sync::broadcast::Receiver<EngineEvent>) {
        let store = Arc::clone(&self.store);
        let mapping = Arc::clone(&self.mapping);
        let upstream = Arc::clone(&self.upstream);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }
                match recovery_rx.recv().await {
                    Ok(EngineEvent::InstanceRecovered { instance }) => {
                        if let Err(e) = sync_missing_collections(&store, &mapping, &upstream, instance).await {
                            warn!(%instance, error = %e, "collection-recovery sync failed");
                        }
                    }
                    Ok(EngineEvent::InstanceDown { .. }) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_ledger_recovery_loop(&self) {
        let ledger = Arc::clone(&self.ledger);
        let upstream = Arc::clone(&self.upstream);
        let running = Arc::clone(&self.running);
        let interval = self.ledger_config.recovery_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while *running.read().await {
                ticker.tick().await;
                let upstream = Arc::clone(&upstream);
                let report = ledger
                    .sweep(move |attempt| {
                        let upstream = Arc::clone(&upstream);
                        async move {
                            // A stuck ATTEMPTING row is presumed resolved if the
                            // write is now visible on the primary; a 2xx here is
                            // trusted the same way replay trusts one (spec.md
                            // §4.D trust-execution rule extended to recovery).
                            upstream
                                .probe_version(InstanceRole::Primary, std::time::Duration::from_secs(5))
                                .await
                                .unwrap_or(false)
                        }
                    })
                    .await;

                match report {
                    Ok(r) if r.flagged > 0 || r.recovered > 0 || r.abandoned > 0 => {
                        info!(
                            flagged = r.flagged,
                            recovered = r.recovered,
                            abandoned = r.abandoned,
                            still_pending = r.still_pending,
                            "ledger recovery sweep completed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "ledger recovery sweep failed"),
                }
            }
        });
    }

    fn spawn_rollup_loop(&self) {
        let metrics = Arc::clone(&self.metrics);
        let store = Arc::clone(&self.store);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut metrics_ticker = tokio::time::interval(std::time::Duration::from_secs(METRICS_ROLLUP_INTERVAL_SECS));
            let mut retention_ticker =
                tokio::time::interval(std::time::Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS));

            loop {
                if !*running.read().await {
                    break;
                }
                tokio::select! {
                    _ = metrics_ticker.tick() => {
                        metrics.flush().await;
                    }
                    _ = retention_ticker.tick() => {
                        let wal_cutoff = chrono::Utc::now() - ChronoDuration::hours(SYNCED_WAL_RETENTION_HOURS);
                        let attempt_cutoff =
                            chrono::Utc::now() - ChronoDuration::hours(RESOLVED_ATTEMPT_RETENTION_HOURS);
                        match store.prune_synced_wal(wal_cutoff).await {
                            Ok(n) if n > 0 => info!(pruned = n, "pruned synced wal entries"),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "wal retention prune failed"),
                        }
                        match store.prune_completed_attempts(attempt_cutoff).await {
                            Ok(n) if n > 0 => info!(pruned = n, "pruned resolved transaction attempts"),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "attempt retention prune failed"),
                        }
                    }
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl Component for ReconciliationWorkers {
    async fn start(&self) -> Result<()> {
        *self.running.write().await = true;
        self.spawn_wal_drain_loop(self.health_recovery_subscription());
        self.spawn_collection_recovery_loop(self.health_recovery_subscription());
        self.spawn_ledger_recovery_loop();
        self.spawn_rollup_loop();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.running.write().await = false;
        Ok(())
    }
}

impl ReconciliationWorkers {
    fn health_recovery_subscription(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        // The WAL drain loop wakes eagerly on any health transition so a
        // just-recovered instance starts catching up before its next
        // scheduled tick, without needing a separate subscriber wired in
        // from main.rs.
        self.health_events_rx()
    }

    fn health_events_rx(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events_bus.subscribe()
    }
}

/// Re-establishes mappings left half-complete by a collection created
/// while `instance` was down: for every mapping with the other side's id
/// set but `instance`'s id missing, issues a name-based create on
/// `instance` and records the identifier it returns (spec.md §4.G.2).
async fn sync_missing_collections(
    store: &Arc<StoreGateway>,
    mapping: &Arc<MappingRegistry>,
    upstream: &Arc<UpstreamClient>,
    instance: InstanceRole,
) -> Result<()> {
    let mappings = store.list_mappings().await?;
    for m in mappings {
        if m.id_for(instance).is_some() {
            continue;
        }
        if m.id_for(instance.other()).is_none() {
            continue;
        }
        match upstream.create_collection_by_name(instance, &m.name).await {
            Ok(Some(new_id)) => {
                mapping.ensure_mapping(&m.name, instance, &new_id).await?;
                info!(name = %m.name, %instance, "collection-recovery sync re-established mapping");
            }
            Ok(None) => warn!(name = %m.name, %instance, "collection-recovery create returned no id"),
            Err(e) => warn!(name = %m.name, %instance, error = %e, "collection-recovery create failed"),
        }
    }
    Ok(())
}
