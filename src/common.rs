// Shared types used across module boundaries, trimmed from the teacher's
// `common::Component`/`HealthStatus` to this domain (no SQL `Value` type
// belongs here — this engine never interprets document bodies).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two upstream vector-database servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceRole {
    Primary,
    Replica,
}

impl InstanceRole {
    pub fn other(self) -> InstanceRole {
        match self {
            InstanceRole::Primary => InstanceRole::Replica,
            InstanceRole::Replica => InstanceRole::Primary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceRole::Primary => "primary",
            InstanceRole::Replica => "replica",
        }
    }
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceRole {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(InstanceRole::Primary),
            "replica" => Ok(InstanceRole::Replica),
            other => Err(crate::error::EngineError::Internal(format!(
                "unknown instance role {other:?}"
            ))),
        }
    }
}

/// A WAL entry's target: one specific instance, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetInstance {
    Primary,
    Replica,
    Both,
}

impl TargetInstance {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetInstance::Primary => "primary",
            TargetInstance::Replica => "replica",
            TargetInstance::Both => "both",
        }
    }

    pub fn includes(self, role: InstanceRole) -> bool {
        match (self, role) {
            (TargetInstance::Both, _) => true,
            (TargetInstance::Primary, InstanceRole::Primary) => true,
            (TargetInstance::Replica, InstanceRole::Replica) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for TargetInstance {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(TargetInstance::Primary),
            "replica" => Ok(TargetInstance::Replica),
            "both" => Ok(TargetInstance::Both),
            other => Err(crate::error::EngineError::Internal(format!(
                "unknown target instance {other:?}"
            ))),
        }
    }
}

/// Health view used by the Health Monitor (cached) and Router (real-time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Lifecycle contract for long-running subsystems (health monitor, WAL
/// engine, reconciliation workers), mirroring the teacher's `Component`
/// trait so every background subsystem exposes the same start/stop shape.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    async fn start(&self) -> crate::error::Result<()>;
    async fn stop(&self) -> crate::error::Result<()>;
}
