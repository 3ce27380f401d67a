use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::watcher::SchedulerState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub engine: EngineHealth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineHealth {
    pub scheduler_state: SchedulerState,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub accounts: usize,
    pub jobs_enqueued: u64,
    pub jobs_delivered: u64,
    pub delivery_failures: u64,
    pub jobs_discarded: u64,
}

#[derive(Clone)]
pub struct HealthChecker {
    start_time: std::time::Instant,
    status: Arc<RwLock<EngineHealth>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            status: Arc::new(RwLock::new(EngineHealth::default())),
        }
    }

    pub async fn get_status(&self) -> HealthStatus {
        let engine = self.status.read().await.clone();

        let status = match engine.scheduler_state {
            SchedulerState::CoolingDown => "degraded",
            SchedulerState::ShuttingDown | SchedulerState::Stopped => "stopping",
            _ if engine.consecutive_errors > 0 => "degraded",
            _ => "healthy",
        };

        HealthStatus {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            engine,
        }
    }

    pub async fn snapshot(&self) -> EngineHealth {
        self.status.read().await.clone()
    }

    pub async fn set_state(&self, state: SchedulerState) {
        self.status.write().await.scheduler_state = state;
    }

    pub async fn record_cycle(&self, accounts: usize, consecutive_errors: u32) {
        let mut status = self.status.write().await;
        status.cycles_completed += 1;
        status.last_cycle_at = Some(Utc::now());
        status.accounts = accounts;
        status.consecutive_errors = consecutive_errors;
    }

    pub async fn set_consecutive_errors(&self, consecutive_errors: u32) {
        self.status.write().await.consecutive_errors = consecutive_errors;
    }

    pub async fn record_enqueued(&self, count: u64) {
        self.status.write().await.jobs_enqueued += count;
    }

    pub async fn record_delivery(&self, delivered: bool) {
        let mut status = self.status.write().await;
        if delivered {
            status.jobs_delivered += 1;
        } else {
            status.delivery_failures += 1;
        }
    }

    pub async fn record_discarded(&self, count: u64) {
        self.status.write().await.jobs_discarded += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_reflects_cooldown() {
        let health = HealthChecker::new();
        assert_eq!(health.get_status().await.status, "healthy");

        health.set_state(SchedulerState::CoolingDown).await;
        assert_eq!(health.get_status().await.status, "degraded");
    }

    #[tokio::test]
    async fn test_delivery_counters() {
        let health = HealthChecker::new();
        health.record_enqueued(3).await;
        health.record_delivery(true).await;
        health.record_delivery(false).await;
        health.record_discarded(1).await;

        let engine = health.snapshot().await;
        assert_eq!(engine.jobs_enqueued, 3);
        assert_eq!(engine.jobs_delivered, 1);
        assert_eq!(engine.delivery_failures, 1);
        assert_eq!(engine.jobs_discarded, 1);
    }
}
