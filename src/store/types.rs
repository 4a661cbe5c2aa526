// Row types for the metadata store (spec.md §3, §6).
//
// These mirror the SQL schema in `store::schema` one-to-one; the gateway
// never hands out an untyped row.

use crate::common::{InstanceRole, TargetInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingStatus {
    Partial,
    Complete,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Partial => "partial",
            MappingStatus::Complete => "complete",
        }
    }
}

impl std::str::FromStr for MappingStatus {
    type Err = crate::error::EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(MappingStatus::Partial),
            "complete" => Ok(MappingStatus::Complete),
            other => Err(crate::error::EngineError::Internal(format!(
                "unknown mapping status {other:?}"
            ))),
        }
    }
}

/// `collection_mappings` row: `name ↔ (primary_id, replica_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMapping {
    pub name: String,
    pub primary_id: Option<String>,
    pub replica_id: Option<String>,
    pub status: MappingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionMapping {
    pub fn id_for(&self, role: InstanceRole) -> Option<&str> {
        match role {
            InstanceRole::Primary => self.primary_id.as_deref(),
            InstanceRole::Replica => self.replica_id.as_deref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == MappingStatus::Complete
            && self.primary_id.is_some()
            && self.replica_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalStatus {
    Executed,
    Failed,
    Synced,
}

impl WalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WalStatus::Executed => "executed",
            WalStatus::Failed => "failed",
            WalStatus::Synced => "synced",
        }
    }
}

impl std::str::FromStr for WalStatus {
    type Err = crate::error::EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(WalStatus::Executed),
            "failed" => Ok(WalStatus::Failed),
            "synced" => Ok(WalStatus::Synced),
            other => Err(crate::error::EngineError::Internal(format!(
                "unknown wal status {other:?}"
            ))),
        }
    }
}

/// `wal_writes` row — an append-only record of a mutation that still
/// needs reconciliation on at least one instance (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub write_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub data: Vec<u8>,
    pub headers: serde_json::Value,
    pub executed_on: InstanceRole,
    pub target_instance: TargetInstance,
    pub status: WalStatus,
    pub synced_instances: HashSet<InstanceRole>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub priority: i32,
    pub updated_at: DateTime<Utc>,
}

impl WalEntry {
    /// Invariant (ii): a `both`-targeted entry is fully synced only once
    /// both instances have acknowledged it.
    pub fn fully_synced(&self) -> bool {
        match self.target_instance {
            TargetInstance::Both => {
                self.synced_instances.contains(&InstanceRole::Primary)
                    && self.synced_instances.contains(&InstanceRole::Replica)
            }
            TargetInstance::Primary => self.synced_instances.contains(&InstanceRole::Primary),
            TargetInstance::Replica => self.synced_instances.contains(&InstanceRole::Replica),
        }
    }

    /// Whether `instance` still needs this entry replayed.
    pub fn needs(&self, instance: InstanceRole) -> bool {
        self.target_instance.includes(instance) && !self.synced_instances.contains(&instance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    Attempting,
    Completed,
    Failed,
    PendingRecovery,
    Recovered,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Attempting => "ATTEMPTING",
            AttemptStatus::Completed => "COMPLETED",
            AttemptStatus::Failed => "FAILED",
            AttemptStatus::PendingRecovery => "PENDING_RECOVERY",
            AttemptStatus::Recovered => "RECOVERED",
            AttemptStatus::Abandoned => "ABANDONED",
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = crate::error::EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATTEMPTING" => Ok(AttemptStatus::Attempting),
            "COMPLETED" => Ok(AttemptStatus::Completed),
            "FAILED" => Ok(AttemptStatus::Failed),
            "PENDING_RECOVERY" => Ok(AttemptStatus::PendingRecovery),
            "RECOVERED" => Ok(AttemptStatus::Recovered),
            "ABANDONED" => Ok(AttemptStatus::Abandoned),
            other => Err(crate::error::EngineError::Internal(format!(
                "unknown attempt status {other:?}"
            ))),
        }
    }
}

/// `transaction_attempts` row, written before a write is dispatched
/// (spec.md §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAttempt {
    pub transaction_id: String,
    pub method: String,
    pub path: String,
    pub data: Vec<u8>,
    pub headers: serde_json::Value,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub client_session: Option<String>,
    pub failure_reason: Option<String>,
}
