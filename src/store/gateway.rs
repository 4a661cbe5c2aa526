// Metadata Store Gateway (spec.md §4.A): typed, pool-aware access to the
// relational store. Every operation is idempotent with respect to its
// unique key (`name`, `write_id`, `transaction_id`). Transient errors are
// retried with exponential backoff up to a configured attempt count;
// persistent errors surface as `EngineError::StoreFailure`.
//
// Grounded on the teacher's `pool/connection_pool.rs` (pool-vs-fresh-
// connection distinction, retry/backoff idiom) and `replication/wal.rs`
// (typed row structs, per-module error handling).

use crate::common::{InstanceRole, TargetInstance};
use crate::config::StoreConfig;
use crate::error::{EngineError, Result};
use crate::store::types::{
    AttemptStatus, CollectionMapping, MappingStatus, TransactionAttempt, WalEntry, WalStatus,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_TRANSIENT_RETRIES: u32 = 5;

pub struct StoreGateway {
    pool: PgPool,
    /// Mirrors spec.md §4.A: "when an optional connection pool is
    /// enabled, operations acquire from the pool; otherwise a fresh
    /// connection is opened and released." With `sqlx` both paths go
    /// through `PgPool`; the distinction becomes the pool's sizing.
    pool_enabled: bool,
}

impl StoreGateway {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let max_connections = if config.use_pool { config.max_connections } else { 1 };
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool, pool_enabled: config.use_pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        for stmt in crate::store::schema::MIGRATIONS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool_enabled(&self) -> bool {
        self.pool_enabled
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `op` with exponential backoff on transient failures. Persistent
    /// errors (anything that is not a connection/timeout failure) surface
    /// immediately.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if is_transient(&e) && attempt < MAX_TRANSIENT_RETRIES => {
                    attempt += 1;
                    let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                    warn!(op = op_name, attempt, ?delay, error = %e, "retrying transient store error");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(EngineError::StoreFailure(format!("{op_name}: {e}"))),
            }
        }
    }

    // ---- Mapping Registry backing operations (§4.B) ----------------

    /// Atomic upsert keyed on `name`: sets the identifier for the given
    /// instance, leaving the other instance's id untouched. Two concurrent
    /// writers racing to establish the same missing mapping both succeed
    /// (one inserts, the other updates) because Postgres serializes the
    /// `ON CONFLICT` path per row.
    pub async fn upsert_mapping(
        &self,
        name: &str,
        instance: InstanceRole,
        id: &str,
    ) -> Result<CollectionMapping> {
        let (col, other_col) = match instance {
            InstanceRole::Primary => ("primary_id", "replica_id"),
            InstanceRole::Replica => ("replica_id", "primary_id"),
        };

        let query = format!(
            r#"
            INSERT INTO collection_mappings (name, {col}, status, created_at, updated_at)
            VALUES ($1, $2, 'partial', now(), now())
            ON CONFLICT (name) DO UPDATE
                SET {col} = EXCLUDED.{col}, updated_at = now()
            RETURNING name, primary_id, replica_id, status, created_at, updated_at
            "#
        );

        let row = self
            .with_retry("upsert_mapping", || {
                sqlx::query(&query).bind(name).bind(id).fetch_one(&self.pool)
            })
            .await?;

        let mapping = row_to_mapping(&row)?;
        // Promote to `complete` once both sides are populated.
        if mapping.primary_id.is_some() && mapping.replica_id.is_some() {
            let _ = other_col; // both columns now populated; nothing else to branch on
            self.mark_mapping_complete(name).await?;
            return self.fetch_mapping_by_name(name).await?.ok_or_else(|| {
                EngineError::Internal("mapping vanished immediately after upsert".into())
            });
        }
        Ok(mapping)
    }

    async fn mark_mapping_complete(&self, name: &str) -> Result<()> {
        self.with_retry("mark_mapping_complete", || {
            sqlx::query(
                "UPDATE collection_mappings SET status = 'complete', updated_at = now() \
                 WHERE name = $1 AND primary_id IS NOT NULL AND replica_id IS NOT NULL",
            )
            .bind(name)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn fetch_mapping_by_name(&self, name: &str) -> Result<Option<CollectionMapping>> {
        let row = self
            .with_retry("fetch_mapping_by_name", || {
                sqlx::query(
                    "SELECT name, primary_id, replica_id, status, created_at, updated_at \
                     FROM collection_mappings WHERE name = $1",
                )
                .bind(name)
                .fetch_optional(&self.pool)
            })
            .await?;
        row.as_ref().map(row_to_mapping).transpose()
    }

    pub async fn fetch_mapping_by_id(
        &self,
        instance: InstanceRole,
        id: &str,
    ) -> Result<Option<CollectionMapping>> {
        let col = match instance {
            InstanceRole::Primary => "primary_id",
            InstanceRole::Replica => "replica_id",
        };
        let query = format!(
            "SELECT name, primary_id, replica_id, status, created_at, updated_at \
             FROM collection_mappings WHERE {col} = $1"
        );
        let row = self
            .with_retry("fetch_mapping_by_id", || {
                sqlx::query(&query).bind(id).fetch_optional(&self.pool)
            })
            .await?;
        row.as_ref().map(row_to_mapping).transpose()
    }

    pub async fn list_mappings(&self) -> Result<Vec<CollectionMapping>> {
        let rows = self
            .with_retry("list_mappings", || {
                sqlx::query(
                    "SELECT name, primary_id, replica_id, status, created_at, updated_at \
                     FROM collection_mappings ORDER BY name",
                )
                .fetch_all(&self.pool)
            })
            .await?;
        rows.iter().map(row_to_mapping).collect()
    }

    // ---- WAL Engine backing operations (§4.D) -----------------------

    pub async fn insert_wal_entry(&self, entry: &WalEntry) -> Result<()> {
        let synced: Vec<&str> = entry.synced_instances.iter().map(|r| r.as_str()).collect();
        self.with_retry("insert_wal_entry", || {
            sqlx::query(
                r#"
                INSERT INTO wal_writes
                    (write_id, "timestamp", method, path, data, headers, executed_on,
                     target_instance, status, synced_instances, retry_count, last_error,
                     priority, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
                ON CONFLICT (write_id) DO NOTHING
                "#,
            )
            .bind(&entry.write_id)
            .bind(entry.timestamp)
            .bind(&entry.method)
            .bind(&entry.path)
            .bind(&entry.data)
            .bind(&entry.headers)
            .bind(entry.executed_on.as_str())
            .bind(entry.target_instance.as_str())
            .bind(entry.status.as_str())
            .bind(serde_json::to_value(&synced).unwrap())
            .bind(entry.retry_count as i32)
            .bind(&entry.last_error)
            .bind(entry.priority)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    /// `next_batch(limit, instance)` — ordered by `timestamp` ascending,
    /// then `priority` descending (spec.md §4.D). Eligibility: the
    /// instance still needs the row, status is `executed` or `failed`,
    /// and for `failed` rows the exponential backoff window has elapsed
    /// and `retry_count` has not exhausted `max_retries`.
    pub async fn next_batch(
        &self,
        instance: InstanceRole,
        limit: usize,
        max_retries: u32,
        backoff_secs: &[u64],
    ) -> Result<Vec<WalEntry>> {
        let col = match instance {
            InstanceRole::Primary => "primary",
            InstanceRole::Replica => "replica",
        };
        let rows = self
            .with_retry("next_batch", || {
                sqlx::query(
                    r#"
                    SELECT write_id, "timestamp", method, path, data, headers, executed_on,
                           target_instance, status, synced_instances, retry_count, last_error,
                           priority, updated_at
                    FROM wal_writes
                    WHERE status IN ('executed', 'failed')
                      AND (target_instance = $1 OR target_instance = 'both')
                      AND NOT (synced_instances @> to_jsonb($1::text))
                      AND retry_count < $2
                    ORDER BY "timestamp" ASC, priority DESC
                    LIMIT $3
                    "#,
                )
                .bind(col)
                .bind(max_retries as i32)
                .bind(limit as i64)
                .fetch_all(&self.pool)
            })
            .await?;

        let mut entries: Vec<WalEntry> = rows.iter().map(row_to_wal_entry).collect::<Result<_>>()?;

        // Backoff filter happens in Rust: the exact wait window depends on
        // `retry_count`, which SQL could express but this keeps the
        // policy (§6 "WAL retry backoff") in one place with `wal::replay`.
        let now = Utc::now();
        entries.retain(|e| {
            if e.status == WalStatus::Executed {
                return true;
            }
            let base = backoff_secs
                .get(e.retry_count as usize)
                .copied()
                .unwrap_or_else(|| backoff_secs.last().copied().unwrap_or(240));
            (now - e.updated_at).num_seconds() >= base as i64
        });

        Ok(entries)
    }

    /// Marks `instance` as having successfully replayed `write_id`. For a
    /// `both`-targeted row this only flips `status=synced` once the other
    /// instance has also acknowledged (invariant ii, spec.md §3).
    pub async fn mark_synced(&self, write_id: &str, instance: InstanceRole) -> Result<()> {
        let row = self
            .with_retry("mark_synced_fetch", || {
                sqlx::query(
                    r#"SELECT target_instance, synced_instances FROM wal_writes WHERE write_id = $1"#,
                )
                .bind(write_id)
                .fetch_one(&self.pool)
            })
            .await?;

        let target: String = row.try_get("target_instance")?;
        let target: TargetInstance = target.parse()?;
        let synced_json: serde_json::Value = row.try_get("synced_instances")?;
        let mut synced = json_to_roles(&synced_json)?;
        synced.insert(instance);

        let fully_synced = match target {
            TargetInstance::Both => {
                synced.contains(&InstanceRole::Primary) && synced.contains(&InstanceRole::Replica)
            }
            TargetInstance::Primary => synced.contains(&InstanceRole::Primary),
            TargetInstance::Replica => synced.contains(&InstanceRole::Replica),
        };

        let new_status = if fully_synced { WalStatus::Synced } else { WalStatus::Executed };
        let synced_vec: Vec<&str> = synced.iter().map(|r| r.as_str()).collect();

        self.with_retry("mark_synced_update", || {
            sqlx::query(
                "UPDATE wal_writes SET synced_instances = $1, status = $2, updated_at = now() \
                 WHERE write_id = $3",
            )
            .bind(serde_json::to_value(&synced_vec).unwrap())
            .bind(new_status.as_str())
            .bind(write_id)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, write_id: &str, error: &str) -> Result<()> {
        self.with_retry("mark_failed", || {
            sqlx::query(
                "UPDATE wal_writes SET status = 'failed', retry_count = retry_count + 1, \
                 last_error = $1, updated_at = now() WHERE write_id = $2",
            )
            .bind(error)
            .bind(write_id)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn wal_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = self
            .with_retry("wal_status_counts", || {
                sqlx::query("SELECT status, count(*) as n FROM wal_writes GROUP BY status")
                    .fetch_all(&self.pool)
            })
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get::<String, _>("status")?, r.try_get::<i64, _>("n")?)))
            .collect()
    }

    pub async fn prune_synced_wal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = self
            .with_retry("prune_synced_wal", || {
                sqlx::query("DELETE FROM wal_writes WHERE status = 'synced' AND updated_at < $1")
                    .bind(older_than)
                    .execute(&self.pool)
            })
            .await?;
        Ok(result.rows_affected())
    }

    // ---- Transaction Safety Ledger backing operations (§4.E) --------

    pub async fn open_attempt(&self, attempt: &TransactionAttempt) -> Result<()> {
        self.with_retry("open_attempt", || {
            sqlx::query(
                r#"
                INSERT INTO transaction_attempts
                    (transaction_id, method, path, data, headers, status, created_at,
                     retry_count, client_session)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (transaction_id) DO NOTHING
                "#,
            )
            .bind(&attempt.transaction_id)
            .bind(&attempt.method)
            .bind(&attempt.path)
            .bind(&attempt.data)
            .bind(&attempt.headers)
            .bind(attempt.status.as_str())
            .bind(attempt.created_at)
            .bind(attempt.retry_count as i32)
            .bind(&attempt.client_session)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn close_attempt(
        &self,
        transaction_id: &str,
        status: AttemptStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        self.with_retry("close_attempt", || {
            sqlx::query(
                "UPDATE transaction_attempts SET status = $1, completed_at = now(), \
                 failure_reason = $2 WHERE transaction_id = $3",
            )
            .bind(status.as_str())
            .bind(failure_reason)
            .bind(transaction_id)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn stuck_attempts(
        &self,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<TransactionAttempt>> {
        let rows = self
            .with_retry("stuck_attempts", || {
                sqlx::query(
                    "SELECT transaction_id, method, path, data, headers, status, created_at, \
                     completed_at, retry_count, client_session, failure_reason \
                     FROM transaction_attempts WHERE status = 'ATTEMPTING' AND created_at < $1",
                )
                .bind(stuck_before)
                .fetch_all(&self.pool)
            })
            .await?;
        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn pending_recovery_attempts(&self) -> Result<Vec<TransactionAttempt>> {
        let rows = self
            .with_retry("pending_recovery_attempts", || {
                sqlx::query(
                    "SELECT transaction_id, method, path, data, headers, status, created_at, \
                     completed_at, retry_count, client_session, failure_reason \
                     FROM transaction_attempts WHERE status = 'PENDING_RECOVERY'",
                )
                .fetch_all(&self.pool)
            })
            .await?;
        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn mark_attempt_status(
        &self,
        transaction_id: &str,
        status: AttemptStatus,
    ) -> Result<()> {
        self.with_retry("mark_attempt_status", || {
            sqlx::query(
                "UPDATE transaction_attempts SET status = $1, retry_count = retry_count + 1 \
                 WHERE transaction_id = $2",
            )
            .bind(status.as_str())
            .bind(transaction_id)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn prune_completed_attempts(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = self
            .with_retry("prune_completed_attempts", || {
                sqlx::query(
                    "DELETE FROM transaction_attempts WHERE status IN ('COMPLETED', 'ABANDONED') \
                     AND completed_at < $1",
                )
                .bind(older_than)
                .execute(&self.pool)
            })
            .await?;
        Ok(result.rows_affected())
    }

    // ---- Metrics (best-effort, §3) ----------------------------------

    pub async fn record_metric(&self, name: &str, value: f64) {
        // Best-effort: metrics loss is never surfaced to the caller.
        if let Err(e) = sqlx::query(
            "INSERT INTO engine_metrics (metric_name, metric_value) VALUES ($1, $2)",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        {
            debug!(metric = name, error = %e, "metric write failed, dropping");
        }
    }

    pub async fn prune_metrics(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = self
            .with_retry("prune_metrics", || {
                sqlx::query("DELETE FROM engine_metrics WHERE recorded_at < $1")
                    .bind(older_than)
                    .execute(&self.pool)
            })
            .await?;
        Ok(result.rows_affected())
    }
}

fn is_transient(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed)
}

fn row_to_mapping(row: &sqlx::postgres::PgRow) -> Result<CollectionMapping> {
    let status: String = row.try_get("status")?;
    Ok(CollectionMapping {
        name: row.try_get("name")?,
        primary_id: row.try_get("primary_id")?,
        replica_id: row.try_get("replica_id")?,
        status: status.parse::<MappingStatus>()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_wal_entry(row: &sqlx::postgres::PgRow) -> Result<WalEntry> {
    let executed_on: String = row.try_get("executed_on")?;
    let target_instance: String = row.try_get("target_instance")?;
    let status: String = row.try_get("status")?;
    let synced_json: serde_json::Value = row.try_get("synced_instances")?;

    Ok(WalEntry {
        write_id: row.try_get("write_id")?,
        timestamp: row.try_get("timestamp")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        data: row.try_get("data")?,
        headers: row.try_get("headers")?,
        executed_on: executed_on.parse()?,
        target_instance: target_instance.parse()?,
        status: status.parse::<WalStatus>()?,
        synced_instances: json_to_roles(&synced_json)?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        last_error: row.try_get("last_error")?,
        priority: row.try_get("priority")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_attempt(row: &sqlx::postgres::PgRow) -> Result<TransactionAttempt> {
    let status: String = row.try_get("status")?;
    Ok(TransactionAttempt {
        transaction_id: row.try_get("transaction_id")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        data: row.try_get("data")?,
        headers: row.try_get("headers")?,
        status: status.parse::<AttemptStatus>()?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        client_session: row.try_get("client_session")?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

fn json_to_roles(v: &serde_json::Value) -> Result<HashSet<InstanceRole>> {
    let arr = v.as_array().ok_or_else(|| {
        EngineError::Internal("synced_instances column was not a JSON array".into())
    })?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| EngineError::Internal("synced_instances entry not a string".into()))
                .and_then(|s| s.parse::<InstanceRole>())
        })
        .collect()
}
