//! Row store gateway.
//!
//! `RowStore` is the only seam between the services and the external
//! datastore. It owns no business rules: it inserts rows, runs
//! filtered/ordered/ranged selects over the three tables, and performs the
//! single permitted update (acknowledging an anomaly). Implementations:
//! - [`PgStore`]: PostgreSQL through an `sqlx` pool
//! - [`MemoryStore`]: in-process tables, used by tests and `STORE_BACKEND=memory`
//!
//! Gateway (EMBP): siblings are private; this module re-exports what the rest
//! of the crate needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Anomaly, NewAnomaly, NewSensorReading, NewStabilityScore, SensorReading, SensorType, Severity,
    Source, StabilityScore,
};
use crate::StoreError;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Sort direction on an entity's timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Select over `sensor_readings`, always ordered by `recorded_at` descending.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingFilter {
    pub sensor_type: Option<SensorType>,
    pub source: Option<Source>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Select over `anomalies`, always ordered by `detected_at` descending.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyFilter {
    pub sensor_type: Option<SensorType>,
    pub severity: Option<Severity>,
    pub acknowledged: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Select over `stability_scores`, ordered by `computed_at` in `order`.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityFilter {
    pub sensor_type: Option<SensorType>,
    pub drift_only: bool,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: Order,
    pub limit: i64,
    pub offset: i64,
}

impl ReadingFilter {
    /// Most recent reading of one category.
    pub fn latest(sensor_type: SensorType) -> Self {
        Self {
            sensor_type: Some(sensor_type),
            source: None,
            from: None,
            to: None,
            limit: 1,
            offset: 0,
        }
    }
}

impl StabilityFilter {
    /// Most recent stability score of one category.
    pub fn latest(sensor_type: SensorType) -> Self {
        Self {
            sensor_type: Some(sensor_type),
            drift_only: false,
            from: None,
            to: None,
            order: Order::Descending,
            limit: 1,
            offset: 0,
        }
    }
}

/// Thin interface to the external relational datastore.
///
/// Identifiers are generated by the store on insert. Inserts return the
/// stored rows so callers can echo them and count what was applied.
#[async_trait]
pub trait RowStore: Send + Sync {
    // ---
    /// Bulk insert. Returns the rows actually written, in input order.
    async fn insert_readings(
        &self,
        rows: Vec<NewSensorReading>,
    ) -> Result<Vec<SensorReading>, StoreError>;

    async fn select_readings(&self, filter: &ReadingFilter)
        -> Result<Vec<SensorReading>, StoreError>;

    async fn insert_anomaly(&self, row: NewAnomaly) -> Result<Anomaly, StoreError>;

    async fn select_anomalies(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, StoreError>;

    /// Number of anomalies per severity, over all time. Severities with no
    /// rows may be omitted.
    async fn count_anomalies_by_severity(&self) -> Result<Vec<(Severity, u64)>, StoreError>;

    /// Set `acknowledged = true` and `acknowledged_at = at`. `None` if no
    /// anomaly has this id.
    async fn acknowledge_anomaly(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Anomaly>, StoreError>;

    async fn insert_stability(&self, row: NewStabilityScore)
        -> Result<StabilityScore, StoreError>;

    async fn select_stability(
        &self,
        filter: &StabilityFilter,
    ) -> Result<Vec<StabilityScore>, StoreError>;

    /// Minimal bounded read (at most one reading row) used by the health probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
