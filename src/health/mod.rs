// Health Monitor (spec.md §4.C): a cached health view refreshed on an
// interval, plus a real-time bypass for callers that cannot tolerate a
// stale answer (the Router consults this before failing a request over).
//
// Grounded on the teacher's `networking/health/mod.rs` — the
// `Arc<RwLock<bool>>` running flag gating a `tokio::spawn` loop, and the
// event-emission-on-transition pattern — simplified from phi-accrual
// failure detection down to a consecutive-failure threshold, which is
// all spec.md §4.C calls for.

use crate::common::{Component, HealthStatus, InstanceRole};
use crate::config::HealthConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::upstream::UpstreamClient;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

struct InstanceHealth {
    status: RwLock<HealthStatus>,
    consecutive_failures: AtomicU32,
}

impl InstanceHealth {
    fn new() -> Self {
        Self { status: RwLock::new(HealthStatus::Unknown), consecutive_failures: AtomicU32::new(0) }
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    upstream: Arc<UpstreamClient>,
    events: EventBus,
    primary: Arc<InstanceHealth>,
    replica: Arc<InstanceHealth>,
    running: Arc<RwLock<bool>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, upstream: Arc<UpstreamClient>, events: EventBus) -> Self {
        Self {
            config,
            upstream,
            events,
            primary: Arc::new(InstanceHealth::new()),
            replica: Arc::new(InstanceHealth::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    fn state(&self, instance: InstanceRole) -> &Arc<InstanceHealth> {
        match instance {
            InstanceRole::Primary => &self.primary,
            InstanceRole::Replica => &self.replica,
        }
    }

    /// Cached status, refreshed at `health.check_interval` (spec.md §6).
    pub async fn cached_status(&self, instance: InstanceRole) -> HealthStatus {
        *self.state(instance).status.read().await
    }

    /// Bypasses the cache with a direct probe bounded by
    /// `health.realtime_timeout`. Used by the Router before it commits to
    /// routing a write to an instance the cache still calls healthy.
    pub async fn real_time_check(&self, instance: InstanceRole) -> HealthStatus {
        match self.upstream.probe_version(instance, self.config.realtime_timeout).await {
            Ok(true) => HealthStatus::Healthy,
            Ok(false) => HealthStatus::Unhealthy,
            Err(e) => {
                warn!(%instance, error = %e, "real-time health probe errored");
                HealthStatus::Unknown
            }
        }
    }

    fn spawn_poll_loop(&self, instance: InstanceRole) {
        let interval = self.config.check_interval;
        let running = Arc::clone(&self.running);
        let monitor = HealthMonitorHandle {
            upstream: Arc::clone(&self.upstream),
            events: self.events.clone(),
            config: self.config.clone(),
            state: Arc::clone(self.state(instance)),
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while *running.read().await {
                ticker.tick().await;
                monitor.poll_once(instance).await;
            }
        });
    }
}

/// Owned pieces needed inside the spawned loop, split out so the loop
/// doesn't have to hold a borrow of `HealthMonitor` across `.await`.
struct HealthMonitorHandle {
    upstream: Arc<UpstreamClient>,
    events: EventBus,
    config: HealthConfig,
    state: Arc<InstanceHealth>,
}

impl HealthMonitorHandle {
    async fn poll_once(&self, instance: InstanceRole) {
        let healthy =
            self.upstream.probe_version(instance, self.config.realtime_timeout).await.unwrap_or(false);
        let previous = *self.state.status.read().await;

        if healthy {
            self.state.consecutive_failures.store(0, Ordering::SeqCst);
            let mut status = self.state.status.write().await;
            if *status != HealthStatus::Healthy {
                *status = HealthStatus::Healthy;
                if previous == HealthStatus::Unhealthy {
                    info!(%instance, "instance recovered");
                    self.events.publish(EngineEvent::InstanceRecovered { instance });
                }
            }
        } else {
            let failures = self.state.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.config.failure_threshold {
                let mut status = self.state.status.write().await;
                if *status != HealthStatus::Unhealthy {
                    *status = HealthStatus::Unhealthy;
                    warn!(%instance, failures, "instance crossed failure threshold");
                    self.events.publish(EngineEvent::InstanceDown {
                        instance,
                        reason: format!("{failures} consecutive failed probes"),
                    });
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Component for HealthMonitor {
    async fn start(&self) -> Result<()> {
        *self.running.write().await = true;
        self.spawn_poll_loop(InstanceRole::Primary);
        self.spawn_poll_loop(InstanceRole::Replica);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.running.write().await = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_millis(10),
            realtime_timeout: Duration::from_millis(50),
            failure_threshold: 2,
        }
    }

    #[tokio::test]
    async fn starts_unknown_until_first_poll() {
        let upstream =
            Arc::new(UpstreamClient::new("http://127.0.0.1:1".into(), "http://127.0.0.1:2".into(), Duration::from_millis(50)).unwrap());
        let monitor = HealthMonitor::new(config(), upstream, EventBus::new());
        assert_eq!(monitor.cached_status(InstanceRole::Primary).await, HealthStatus::Unknown);
    }
}
