// WAL Engine (spec.md §4.D): records every write the Router accepts and
// replays it against whichever instance(s) have not yet acknowledged it.
//
// Two invariants drive the replay logic and are enforced here rather
// than in the Router:
//   - identifier rewrite scope: only document-path operations carry a
//     per-instance identifier; collection-path operations address a
//     collection by its stable name on every instance.
//   - trust-execution: a 2xx response during replay is final. This
//     engine never re-probes an instance to double-check a write it has
//     already marked synced for that instance.
//
// Grounded on the teacher's `replication/wal.rs` for the append/batch/
// mark-synced shape (there: LSN-keyed segments; here: `write_id`-keyed
// rows through `StoreGateway`) and `pool/connection_pool.rs` for the
// backoff-eligibility idiom reused in `store::gateway::next_batch`.

use crate::common::{InstanceRole, TargetInstance};
use crate::config::{MemoryConfig, WalConfig};
use crate::error::Result;
use crate::mapping::MappingRegistry;
use crate::pathaddr;
use crate::store::{StoreGateway, WalEntry, WalStatus};
use crate::upstream::UpstreamClient;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Method;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct WalEngine {
    store: Arc<StoreGateway>,
    upstream: Arc<UpstreamClient>,
    mapping: Arc<MappingRegistry>,
    config: WalConfig,
    memory: MemoryConfig,
}

impl WalEngine {
    pub fn new(
        store: Arc<StoreGateway>,
        upstream: Arc<UpstreamClient>,
        mapping: Arc<MappingRegistry>,
        config: WalConfig,
        memory: MemoryConfig,
    ) -> Self {
        Self { store, upstream, mapping, config, memory }
    }

    /// Appends a write that has already executed successfully against
    /// `executed_on`, still owed to the instances named by
    /// `target_instance` that have not yet replayed it.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        method: Method,
        path: String,
        data: Bytes,
        headers: serde_json::Value,
        executed_on: InstanceRole,
        target_instance: TargetInstance,
        priority: i32,
    ) -> Result<()> {
        let mut synced = std::collections::HashSet::new();
        synced.insert(executed_on);

        let entry = WalEntry {
            write_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            method: method.to_string(),
            path,
            data: data.to_vec(),
            headers,
            executed_on,
            target_instance,
            status: WalStatus::Executed,
            synced_instances: synced,
            retry_count: 0,
            last_error: None,
            priority,
            updated_at: Utc::now(),
        };
        self.store.insert_wal_entry(&entry).await
    }

    /// Adaptive batch size (spec.md §4.D / §6 `WAL_BATCH_DEFAULT` /
    /// `WAL_BATCH_MAX`): shrinks toward nothing as resident memory
    /// approaches the configured ceiling, grows toward the max when
    /// there is headroom.
    fn batch_size(&self) -> usize {
        let Some(rss_mb) = current_rss_mb() else {
            return self.config.batch_default;
        };
        let ceiling = self.memory.max_memory_mb as f64;
        let pressure_pct = (rss_mb as f64 / ceiling) * 100.0;

        if pressure_pct >= self.memory.pressure_threshold_pct {
            (self.config.batch_default / 4).max(1)
        } else if pressure_pct < self.memory.pressure_threshold_pct / 2.0 {
            self.config.batch_max
        } else {
            self.config.batch_default
        }
    }

    /// Drains as much of `instance`'s outstanding backlog as the current
    /// batch size allows, replaying each entry in chronological order.
    /// Returns the number of entries that ended up synced this pass.
    pub async fn drain(&self, instance: InstanceRole) -> Result<usize> {
        let batch = self
            .store
            .next_batch(instance, self.batch_size(), self.config.retry_attempts, &self.config.retry_backoff_secs)
            .await?;

        let mut synced = 0;
        for entry in &batch {
            if self.replay(entry, instance).await {
                synced += 1;
            }
        }
        Ok(synced)
    }

    /// Replays a single WAL entry against `instance`. Returns `true` if
    /// the entry is now synced for this instance.
    async fn replay(&self, entry: &WalEntry, instance: InstanceRole) -> bool {
        let path = match self.rewrite_path(&entry.path, instance).await {
            Ok(p) => p,
            Err(e) => {
                warn!(write_id = %entry.write_id, error = %e, "could not resolve identifier for replay, leaving entry pending");
                return false;
            }
        };

        let method = Method::from_str(&entry.method).unwrap_or(Method::POST);
        let headers = headers_from_json(&entry.headers);
        let body = Bytes::from(entry.data.clone());

        let outcome = self.upstream.forward(instance, &method, &path, body, headers, None).await;

        let success = match outcome {
            Ok(resp) if resp.is_success() => true,
            // A 404 on DELETE during replay means the effect is already
            // in place on this instance; treat it as success rather than
            // retrying forever (spec.md §4.D DELETE-404 idempotence).
            Ok(resp) if method == Method::DELETE && resp.status == reqwest::StatusCode::NOT_FOUND => true,
            Ok(resp) => {
                let msg = format!("replay returned {}", resp.status);
                let _ = self.store.mark_failed(&entry.write_id, &msg).await;
                debug!(write_id = %entry.write_id, %instance, status = %resp.status, "replay failed");
                false
            }
            Err(e) => {
                let _ = self.store.mark_failed(&entry.write_id, &e.to_string()).await;
                debug!(write_id = %entry.write_id, %instance, error = %e, "replay errored");
                false
            }
        };

        if success {
            // Trust-execution: this 2xx (or idempotent 404) is final.
            // The entry is never re-probed for this instance again.
            if let Err(e) = self.store.mark_synced(&entry.write_id, instance).await {
                warn!(write_id = %entry.write_id, error = %e, "failed to persist sync state after successful replay");
                return false;
            }
        }
        success
    }

    /// Rewrites the collection-name segment of a document-scoped path to
    /// `instance`'s local identifier. Collection-scoped paths (create,
    /// delete-by-name, list) are left untouched — every instance
    /// addresses a collection by its stable name.
    async fn rewrite_path(&self, path: &str, instance: InstanceRole) -> Result<String> {
        pathaddr::rewrite_for_instance(&self.mapping, path, instance).await
    }
}

fn headers_from_json(v: &serde_json::Value) -> reqwest::header::HeaderMap {
    let mut map = reqwest::header::HeaderMap::new();
    if let Some(obj) = v.as_object() {
        for (k, val) in obj {
            if let (Ok(name), Some(val_str)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                val.as_str(),
            ) {
                if let Ok(value) = reqwest::header::HeaderValue::from_str(val_str) {
                    map.insert(name, value);
                }
            }
        }
    }
    map
}

/// Reads this process's resident set size from `/proc/self/status`.
/// Returns `None` on platforms without procfs, in which case batch
/// sizing falls back to the configured default.
fn current_rss_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb / 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_rss_mb_reads_a_plausible_value_on_linux() {
        // Every Linux CI runner has /proc/self/status; this just checks
        // the parser doesn't panic and returns something sane.
        if let Some(mb) = current_rss_mb() {
            assert!(mb > 0 && mb < 1_000_000);
        }
    }
}
