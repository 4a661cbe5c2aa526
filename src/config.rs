// Configuration surface (spec.md §6), layered with `figment` the way
// `golemcloud-golem`'s service crates do: a TOML file merged with
// `VECTORGATE__`-prefixed env vars, each nested table separated by `__`.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesConfig {
    pub primary_url: String,
    pub replica_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "humantime_secs")]
    pub check_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub realtime_timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: secs(2),
            realtime_timeout: secs(5),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    #[serde(with = "humantime_secs")]
    pub sync_interval: Duration,
    pub batch_default: usize,
    pub batch_max: usize,
    pub retry_attempts: u32,
    /// Backoff base durations per retry_count (1m/2m/4m by default).
    pub retry_backoff_secs: Vec<u64>,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_interval: secs(10),
            batch_default: 50,
            batch_max: 200,
            retry_attempts: 3,
            retry_backoff_secs: vec![60, 120, 240],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    #[serde(with = "humantime_secs")]
    pub recovery_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub stuck_threshold: Duration,
    pub max_recovery_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            recovery_interval: secs(60),
            stuck_threshold: secs(600),
            max_recovery_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_requests: usize,
    pub request_queue_size: usize,
    #[serde(with = "humantime_secs")]
    pub queue_wait_timeout: Duration,
    pub max_workers: usize,
    pub granular_locks: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 30,
            request_queue_size: 100,
            queue_wait_timeout: secs(15),
            max_workers: 3,
            granular_locks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_memory_mb: u64,
    pub pressure_threshold_pct: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 400,
            pressure_threshold_pct: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    #[serde(with = "humantime_secs")]
    pub request_timeout: Duration,
    pub read_preference_ratio: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_timeout: secs(15),
            read_preference_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub use_pool: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/vectorgate".to_string(),
            max_connections: 10,
            use_pool: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_address: String,
    pub instances: InstancesConfig,
    pub health: HealthConfig,
    pub wal: WalConfig,
    pub ledger: LedgerConfig,
    pub concurrency: ConcurrencyConfig,
    pub memory: MemoryConfig,
    pub routing: RoutingConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8088".to_string(),
            instances: InstancesConfig {
                primary_url: "http://127.0.0.1:9001".to_string(),
                replica_url: "http://127.0.0.1:9002".to_string(),
            },
            health: HealthConfig::default(),
            wal: WalConfig::default(),
            ledger: LedgerConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            memory: MemoryConfig::default(),
            routing: RoutingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `vectorgate.toml` (if present) merged
    /// with `VECTORGATE__`-prefixed environment variables, falling back
    /// to `Config::default()` for anything unset.
    pub fn load() -> crate::error::Result<Self> {
        Figment::from(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file("vectorgate.toml"))
            .merge(Env::prefixed("VECTORGATE__").split("__"))
            .extract()
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }
}

/// `serde(with = ...)` helper for `Duration <-> seconds` so config files
/// stay plain integers instead of humantime strings.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.health.check_interval, secs(2));
        assert_eq!(cfg.health.realtime_timeout, secs(5));
        assert_eq!(cfg.health.failure_threshold, 3);
        assert_eq!(cfg.wal.sync_interval, secs(10));
        assert_eq!(cfg.wal.batch_default, 50);
        assert_eq!(cfg.wal.batch_max, 200);
        assert_eq!(cfg.wal.retry_attempts, 3);
        assert_eq!(cfg.concurrency.max_concurrent_requests, 30);
        assert_eq!(cfg.concurrency.request_queue_size, 100);
        assert_eq!(cfg.routing.request_timeout, secs(15));
        assert_eq!(cfg.memory.max_memory_mb, 400);
        assert_eq!(cfg.routing.read_preference_ratio, 0.8);
    }
}
