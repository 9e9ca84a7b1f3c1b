//! Health probe.
//!
//! Runs one minimal bounded read against the row store and reports whether
//! it succeeded within the configured latency budget. Never writes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::RowStore;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Ok,
    Slow,
    Unreachable,
}

/// JSON body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_s: u64,
    /// Wall-clock time of the probe read itself.
    pub response_ms: u64,
    pub database: DatabaseStatus,
    pub version: &'static str,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Clone)]
pub struct HealthProbe {
    store: Arc<dyn RowStore>,
    started_at: Instant,
    degraded_after: Duration,
}

impl HealthProbe {
    pub fn new(store: Arc<dyn RowStore>, degraded_after: Duration) -> Self {
        Self {
            store,
            started_at: Instant::now(),
            degraded_after,
        }
    }

    pub async fn check(&self) -> HealthReport {
        // ---
        let start = Instant::now();
        let outcome = self.store.ping().await;
        let elapsed = start.elapsed();

        let database = match outcome {
            Err(e) => {
                tracing::warn!("Health probe could not reach the store: {}", e);
                DatabaseStatus::Unreachable
            }
            Ok(()) if elapsed > self.degraded_after => {
                tracing::warn!("Health probe read took {} ms", elapsed.as_millis());
                DatabaseStatus::Slow
            }
            Ok(()) => DatabaseStatus::Ok,
        };

        HealthReport {
            status: if database == DatabaseStatus::Ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            timestamp: Utc::now(),
            uptime_s: self.started_at.elapsed().as_secs(),
            response_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            database,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
