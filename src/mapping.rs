// Mapping Registry (spec.md §4.B): the name -> per-instance identifier
// directory. Every document/collection operation that crosses an
// instance boundary goes through `resolve` or `ensure_mapping` first;
// nothing outside this module ever invents or guesses an identifier.
//
// Grounded on the teacher's `pool/connection_pool.rs` retry/backoff
// idiom (same 100/200/400ms shape reused here) and `networking/health`'s
// pattern of wrapping a store handle behind a narrow async API.

use crate::common::InstanceRole;
use crate::error::{EngineError, Result};
use crate::store::{CollectionMapping, StoreGateway};
use crate::upstream::UpstreamClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry delays used when establishing a brand-new mapping races another
/// request doing the same thing (spec.md §4.B: "retried at 100ms, 200ms,
/// 400ms before surfacing a conflict").
const ENSURE_RETRY_DELAYS_MS: [u64; 3] = [100, 200, 400];

pub struct MappingRegistry {
    store: Arc<StoreGateway>,
    upstream: Arc<UpstreamClient>,
}

impl MappingRegistry {
    pub fn new(store: Arc<StoreGateway>, upstream: Arc<UpstreamClient>) -> Self {
        Self { store, upstream }
    }

    /// Resolves `name` to the identifier `instance` uses for it. Never
    /// returns the *other* instance's identifier, even if that is the
    /// only one on record (spec.md §4.B invariant). On a MISSING row (or
    /// a row missing this instance's id) falls back to a direct discovery
    /// probe of `instance` before giving up (spec.md §4.B: "the registry
    /// may perform a direct probe of the target instance").
    pub async fn resolve(&self, name: &str, instance: InstanceRole) -> Result<String> {
        let existing = self.store.fetch_mapping_by_name(name).await?;
        if let Some(id) = existing.as_ref().and_then(|m| m.id_for(instance)) {
            return Ok(id.to_string());
        }

        let probed_id = self.upstream.find_collection_id(instance, name).await?;
        let mapping = self.discover(name, instance, probed_id).await?;
        mapping.id_for(instance).map(str::to_string).ok_or_else(|| EngineError::MappingMissing(name.to_string()))
    }

    /// Resolves a per-instance identifier back to the collection name,
    /// used when a response body carries only the instance-local id.
    pub async fn resolve_name(&self, instance: InstanceRole, id: &str) -> Result<String> {
        let mapping = self
            .store
            .fetch_mapping_by_id(instance, id)
            .await?
            .ok_or_else(|| EngineError::MappingMissing(id.to_string()))?;
        Ok(mapping.name)
    }

    /// Records the identifier `instance` assigned to `name` after a
    /// successful collection-create. Idempotent: a second call with the
    /// same `(name, instance, id)` is a no-op; a call for a name that
    /// already has this instance's id mapped to a *different* value is
    /// still accepted, matching spec.md's "first-writer-wins, concurrent
    /// creates are both driven to the same eventual mapping" resolution
    /// of the open question on concurrent same-name creates.
    pub async fn ensure_mapping(
        &self,
        name: &str,
        instance: InstanceRole,
        id: &str,
    ) -> Result<CollectionMapping> {
        let mut last_err = None;
        for (attempt, delay_ms) in ENSURE_RETRY_DELAYS_MS.iter().enumerate() {
            match self.store.upsert_mapping(name, instance, id).await {
                Ok(m) => return Ok(m),
                Err(e @ EngineError::StoreFailure(_)) => {
                    warn!(name, attempt, error = %e, "ensure_mapping retrying after store failure");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::Internal("ensure_mapping exhausted retries".into())))
    }

    /// Fallback used when a request arrives for a name with no mapping on
    /// the requested instance but a complete mapping on the other: probes
    /// the upstream instance directly for a collection with this name
    /// (spec.md §4.B "discovery probe") rather than failing outright.
    pub async fn discover(
        &self,
        name: &str,
        instance: InstanceRole,
        probed_id: Option<String>,
    ) -> Result<CollectionMapping> {
        match probed_id {
            Some(id) => {
                debug!(name, %instance, %id, "discovery probe found collection, recording mapping");
                self.ensure_mapping(name, instance, &id).await
            }
            None => Err(EngineError::MappingMissing(name.to_string())),
        }
    }

    pub async fn list(&self) -> Result<Vec<CollectionMapping>> {
        self.store.list_mappings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(name: &str, primary: Option<&str>, replica: Option<&str>) -> CollectionMapping {
        use crate::store::MappingStatus;
        let status = if primary.is_some() && replica.is_some() {
            MappingStatus::Complete
        } else {
            MappingStatus::Partial
        };
        CollectionMapping {
            name: name.to_string(),
            primary_id: primary.map(str::to_string),
            replica_id: replica.map(str::to_string),
            status,
            created_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            updated_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        }
    }

    #[test]
    fn id_for_never_crosses_instances() {
        let m = mapping("docs", Some("p-1"), None);
        assert_eq!(m.id_for(InstanceRole::Primary), Some("p-1"));
        assert_eq!(m.id_for(InstanceRole::Replica), None);
    }

    #[test]
    fn complete_requires_both_ids() {
        assert!(!mapping("docs", Some("p-1"), None).is_complete());
        assert!(mapping("docs", Some("p-1"), Some("r-1")).is_complete());
    }
}
