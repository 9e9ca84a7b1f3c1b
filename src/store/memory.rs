//! In-process row store.
//!
//! Keeps the three tables as vectors behind one `RwLock` and applies the same
//! filter, order and range semantics the Postgres gateway pushes into SQL.

use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AnomalyFilter, Order, ReadingFilter, RowStore, StabilityFilter};
use crate::models::{
    Anomaly, NewAnomaly, NewSensorReading, NewStabilityScore, SensorReading, Severity,
    StabilityScore,
};
use crate::StoreError;

// ---

#[derive(Debug, Default)]
struct Tables {
    readings: Vec<SensorReading>,
    anomalies: Vec<Anomaly>,
    stability: Vec<StabilityScore>,
}

/// Row store held entirely in memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_range(t: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map_or(true, |f| t >= f) && to.map_or(true, |u| t <= u)
}

/// Sort newest first. Rows sharing a timestamp come back last-written first.
fn newest_first<T>(mut rows: Vec<T>, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.reverse();
    rows.sort_by_key(|r| Reverse(key(r)));
    rows
}

/// Apply `OFFSET`/`LIMIT` to an already ordered row set.
fn page<T>(rows: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl RowStore for MemoryStore {
    // ---
    async fn insert_readings(
        &self,
        rows: Vec<NewSensorReading>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        // ---
        let stored: Vec<SensorReading> = rows
            .into_iter()
            .map(|r| r.into_row(Uuid::new_v4()))
            .collect();
        self.tables.write().await.readings.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn select_readings(
        &self,
        filter: &ReadingFilter,
    ) -> Result<Vec<SensorReading>, StoreError> {
        // ---
        let tables = self.tables.read().await;
        let rows: Vec<SensorReading> = tables
            .readings
            .iter()
            .filter(|r| filter.sensor_type.map_or(true, |t| r.sensor_type == t))
            .filter(|r| filter.source.map_or(true, |s| r.source == s))
            .filter(|r| in_range(r.recorded_at, filter.from, filter.to))
            .cloned()
            .collect();
        let rows = newest_first(rows, |r| r.recorded_at);
        Ok(page(rows, filter.offset, filter.limit))
    }

    async fn insert_anomaly(&self, row: NewAnomaly) -> Result<Anomaly, StoreError> {
        // ---
        let stored = row.into_row(Uuid::new_v4());
        self.tables.write().await.anomalies.push(stored.clone());
        Ok(stored)
    }

    async fn select_anomalies(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, StoreError> {
        // ---
        let tables = self.tables.read().await;
        let rows: Vec<Anomaly> = tables
            .anomalies
            .iter()
            .filter(|a| filter.sensor_type.map_or(true, |t| a.sensor_type == t))
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .filter(|a| filter.acknowledged.map_or(true, |ack| a.acknowledged == ack))
            .filter(|a| in_range(a.detected_at, filter.from, filter.to))
            .cloned()
            .collect();
        let rows = newest_first(rows, |a| a.detected_at);
        Ok(page(rows, filter.offset, filter.limit))
    }

    async fn count_anomalies_by_severity(&self) -> Result<Vec<(Severity, u64)>, StoreError> {
        // ---
        let tables = self.tables.read().await;
        Ok(Severity::ALL
            .into_iter()
            .map(|s| {
                let n = tables.anomalies.iter().filter(|a| a.severity == s).count();
                (s, n as u64)
            })
            .filter(|(_, n)| *n > 0)
            .collect())
    }

    async fn acknowledge_anomaly(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Anomaly>, StoreError> {
        // ---
        let mut tables = self.tables.write().await;
        Ok(tables.anomalies.iter_mut().find(|a| a.id == id).map(|a| {
            a.acknowledged = true;
            a.acknowledged_at = Some(at);
            a.clone()
        }))
    }

    async fn insert_stability(
        &self,
        row: NewStabilityScore,
    ) -> Result<StabilityScore, StoreError> {
        // ---
        let stored = row.into_row(Uuid::new_v4());
        self.tables.write().await.stability.push(stored.clone());
        Ok(stored)
    }

    async fn select_stability(
        &self,
        filter: &StabilityFilter,
    ) -> Result<Vec<StabilityScore>, StoreError> {
        // ---
        let tables = self.tables.read().await;
        let mut rows: Vec<StabilityScore> = tables
            .stability
            .iter()
            .filter(|s| filter.sensor_type.map_or(true, |t| s.sensor_type == t))
            .filter(|s| !filter.drift_only || s.drift_detected)
            .filter(|s| in_range(s.computed_at, filter.from, filter.to))
            .cloned()
            .collect();
        let rows = match filter.order {
            Order::Ascending => {
                rows.sort_by_key(|s| s.computed_at);
                rows
            }
            Order::Descending => newest_first(rows, |s| s.computed_at),
        };
        Ok(page(rows, filter.offset, filter.limit))
    }

    /// The memory store is always reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{SensorType, Source};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, minute, 0).unwrap()
    }

    fn new_reading(sensor_type: SensorType, recorded_at: DateTime<Utc>) -> NewSensorReading {
        NewSensorReading {
            sensor_type,
            value: 1.0,
            unit: "hPa".into(),
            source: Source::Simulator,
            metadata: json!({}),
            recorded_at,
        }
    }

    fn all_readings() -> ReadingFilter {
        ReadingFilter {
            sensor_type: None,
            source: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_distinct_ids() {
        // ---
        let store = MemoryStore::new();
        let rows = store
            .insert_readings(vec![
                new_reading(SensorType::Weather, at(0)),
                new_reading(SensorType::Weather, at(1)),
            ])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].id, rows[1].id);
    }

    #[tokio::test]
    async fn test_select_orders_newest_first_and_pages() {
        // ---
        let store = MemoryStore::new();
        let rows = (0..5)
            .map(|m| new_reading(SensorType::Weather, at(m)))
            .collect();
        store.insert_readings(rows).await.unwrap();

        let filter = ReadingFilter {
            limit: 2,
            offset: 1,
            ..all_readings()
        };
        let page = store.select_readings(&filter).await.unwrap();
        let times: Vec<_> = page.iter().map(|r| r.recorded_at).collect();
        assert_eq!(times, vec![at(3), at(2)]);
    }

    #[tokio::test]
    async fn test_latest_of_a_batch_is_the_last_row_written() {
        // ---
        let store = MemoryStore::new();
        let rows = (0..3)
            .map(|i| NewSensorReading {
                value: f64::from(i),
                ..new_reading(SensorType::Weather, at(7))
            })
            .collect();
        store.insert_readings(rows).await.unwrap();

        let latest = store
            .select_readings(&ReadingFilter::latest(SensorType::Weather))
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, 2.0);

        let all = store.select_readings(&all_readings()).await.unwrap();
        let values: Vec<_> = all.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive() {
        // ---
        let store = MemoryStore::new();
        let rows = (0..5)
            .map(|m| new_reading(SensorType::Radiation, at(m)))
            .collect();
        store.insert_readings(rows).await.unwrap();

        let filter = ReadingFilter {
            from: Some(at(1)),
            to: Some(at(3)),
            ..all_readings()
        };
        assert_eq!(store.select_readings(&filter).await.unwrap().len(), 3);

        let filter = ReadingFilter {
            from: Some(at(4) + Duration::seconds(1)),
            ..all_readings()
        };
        assert!(store.select_readings(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_id_is_none() {
        // ---
        let store = MemoryStore::new();
        let acked = store.acknowledge_anomaly(Uuid::new_v4(), at(0)).await.unwrap();
        assert!(acked.is_none());
    }

    #[tokio::test]
    async fn test_ping_on_empty_store() {
        // ---
        tokio_test::assert_ok!(MemoryStore::new().ping().await);
    }
}
