//! Query service: the read path.
//!
//! Filtered, paginated lists plus three derived views. The per-category
//! "latest" views fan out one lookup per sensor category, run them
//! concurrently and merge the outcomes; a failed or empty category becomes
//! `None` without affecting its siblings.

use std::future::Future;
use std::sync::Arc;
use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer};
use tracing::warn;

use crate::models::{
    Anomaly, LatestByCategory, SensorReading, SensorType, Severity, SeveritySummary, Source,
    StabilityScore,
};
use crate::store::{AnomalyFilter, Order, ReadingFilter, RowStore, StabilityFilter};
use crate::{ApiError, StoreError};

pub const DEFAULT_READINGS_LIMIT: u32 = 100;
pub const DEFAULT_ANOMALIES_LIMIT: u32 = 50;
pub const DEFAULT_DRIFT_LIMIT: u32 = 50;

/// Hard ceiling on stability history, whatever the caller asks for.
pub const MAX_HISTORY_LIMIT: u32 = 200;

// ---

/// Query parameters of `GET /sensor`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ReadingQuery {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub sensor_type: Option<SensorType>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub source: Option<Source>,
    #[serde(default, deserialize_with = "time_bound")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "time_bound")]
    pub to: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<u32>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub offset: Option<u32>,
}

/// Query parameters of `GET /anomaly`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AnomalyQuery {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub sensor_type: Option<SensorType>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub acknowledged: Option<bool>,
    #[serde(default, deserialize_with = "time_bound")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "time_bound")]
    pub to: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<u32>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub offset: Option<u32>,
}

/// Query parameters of `GET /stability/history`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub sensor_type: Option<SensorType>,
    #[serde(default, deserialize_with = "time_bound")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "time_bound")]
    pub to: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<u32>,
}

/// Query parameters of `GET /stability/drift`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DriftQuery {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub sensor_type: Option<SensorType>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<u32>,
}

/// Reads an empty query value (`?severity=`) as an absent filter.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Range bound: RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
fn time_bound<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_time_bound(raw).map(Some).map_err(de::Error::custom),
    }
}

fn parse_time_bound(raw: &str) -> Result<DateTime<Utc>, String> {
    // ---
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| format!("invalid time bound '{raw}', expected RFC 3339 or YYYY-MM-DD"))
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn RowStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Readings, most recent first.
    ///
    /// `limit` has a default but no ceiling here, unlike
    /// [`stability_history`](Self::stability_history).
    pub async fn list_readings(&self, q: ReadingQuery) -> Result<Vec<SensorReading>, ApiError> {
        // ---
        let filter = ReadingFilter {
            sensor_type: q.sensor_type,
            source: q.source,
            from: q.from,
            to: q.to,
            limit: q.limit.unwrap_or(DEFAULT_READINGS_LIMIT).into(),
            offset: q.offset.unwrap_or(0).into(),
        };
        Ok(self.store.select_readings(&filter).await?)
    }

    /// Anomalies, most recent first.
    pub async fn list_anomalies(&self, q: AnomalyQuery) -> Result<Vec<Anomaly>, ApiError> {
        // ---
        let filter = AnomalyFilter {
            sensor_type: q.sensor_type,
            severity: q.severity,
            acknowledged: q.acknowledged,
            from: q.from,
            to: q.to,
            limit: q.limit.unwrap_or(DEFAULT_ANOMALIES_LIMIT).into(),
            offset: q.offset.unwrap_or(0).into(),
        };
        Ok(self.store.select_anomalies(&filter).await?)
    }

    /// Most recent reading per sensor category.
    pub async fn latest_readings(&self) -> LatestByCategory<SensorReading> {
        latest_per_category(|t| self.latest_reading(t)).await
    }

    /// Most recent stability score per sensor category.
    pub async fn latest_stability(&self) -> LatestByCategory<StabilityScore> {
        latest_per_category(|t| self.latest_score(t)).await
    }

    /// Anomaly counts per severity over all time, all four buckets present.
    pub async fn anomaly_summary(&self) -> Result<SeveritySummary, ApiError> {
        // ---
        let counts = self.store.count_anomalies_by_severity().await?;
        Ok(counts
            .into_iter()
            .fold(SeveritySummary::default(), |mut acc, (severity, n)| {
                acc.add(severity, n);
                acc
            }))
    }

    /// Stability scores in chronological order, for trend charts. The limit
    /// is clamped to [`MAX_HISTORY_LIMIT`].
    pub async fn stability_history(
        &self,
        q: HistoryQuery,
    ) -> Result<Vec<StabilityScore>, ApiError> {
        // ---
        let limit = q.limit.unwrap_or(MAX_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
        let filter = StabilityFilter {
            sensor_type: q.sensor_type,
            drift_only: false,
            from: q.from,
            to: q.to,
            order: Order::Ascending,
            limit: limit.into(),
            offset: 0,
        };
        Ok(self.store.select_stability(&filter).await?)
    }

    /// Stability scores flagged with drift, most recent first.
    pub async fn drift_events(&self, q: DriftQuery) -> Result<Vec<StabilityScore>, ApiError> {
        // ---
        let filter = StabilityFilter {
            sensor_type: q.sensor_type,
            drift_only: true,
            from: None,
            to: None,
            order: Order::Descending,
            limit: q.limit.unwrap_or(DEFAULT_DRIFT_LIMIT).into(),
            offset: 0,
        };
        Ok(self.store.select_stability(&filter).await?)
    }

    async fn latest_reading(&self, t: SensorType) -> Result<Option<SensorReading>, StoreError> {
        let rows = self.store.select_readings(&ReadingFilter::latest(t)).await?;
        Ok(rows.into_iter().next())
    }

    async fn latest_score(&self, t: SensorType) -> Result<Option<StabilityScore>, StoreError> {
        let rows = self.store.select_stability(&StabilityFilter::latest(t)).await?;
        Ok(rows.into_iter().next())
    }
}

/// Run one lookup per sensor category concurrently and merge by category.
///
/// This is a wait-for-all join: every lookup runs to completion, and a
/// failing lookup only blanks its own category.
async fn latest_per_category<T, F, Fut>(fetch: F) -> LatestByCategory<T>
where
    F: Fn(SensorType) -> Fut,
    Fut: Future<Output = Result<Option<T>, StoreError>>,
{
    // ---
    let (weather, solar_wind, radiation) = tokio::join!(
        fetch(SensorType::Weather),
        fetch(SensorType::SolarWind),
        fetch(SensorType::Radiation),
    );

    LatestByCategory {
        weather: settle(SensorType::Weather, weather),
        solar_wind: settle(SensorType::SolarWind, solar_wind),
        radiation: settle(SensorType::Radiation, radiation),
    }
}

fn settle<T>(sensor_type: SensorType, outcome: Result<Option<T>, StoreError>) -> Option<T> {
    match outcome {
        Ok(row) => row,
        Err(e) => {
            warn!("Latest lookup for {} failed, reporting none: {}", sensor_type, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{NewAnomaly, NewSensorReading, NewStabilityScore};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::time::Duration as StdDuration;
    use tokio::sync::Barrier;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn reading(sensor_type: SensorType, minute: i64) -> NewSensorReading {
        NewSensorReading {
            sensor_type,
            value: minute as f64,
            unit: "u".into(),
            source: Source::Simulator,
            metadata: json!({}),
            recorded_at: at(minute),
        }
    }

    fn anomaly(severity: Severity, minute: i64) -> NewAnomaly {
        NewAnomaly {
            sensor_type: SensorType::Radiation,
            reading_id: None,
            value: 2.8,
            threshold: Some(1.0),
            severity,
            model_version: "1.0.0".into(),
            description: None,
            metadata: json!({}),
            detected_at: at(minute),
        }
    }

    fn score(sensor_type: SensorType, minute: i64, drift: bool) -> NewStabilityScore {
        NewStabilityScore {
            sensor_type,
            score: 0.5,
            window_hours: 24,
            model_version: "1.0.0".into(),
            drift_detected: drift,
            drift_magnitude: drift.then_some(0.3),
            metadata: json!({}),
            computed_at: at(minute),
        }
    }

    /// Store whose reading lookups fail for one category and delegate otherwise.
    /// With a `gate`, each reading lookup first waits for its siblings.
    struct FlakyStore {
        inner: MemoryStore,
        broken: Option<SensorType>,
        gate: Option<Barrier>,
    }

    impl FlakyStore {
        fn broken(sensor_type: SensorType) -> Self {
            Self {
                inner: MemoryStore::new(),
                broken: Some(sensor_type),
                gate: None,
            }
        }

        fn gated(lookups: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                broken: None,
                gate: Some(Barrier::new(lookups)),
            }
        }
    }

    #[async_trait]
    impl RowStore for FlakyStore {
        async fn insert_readings(
            &self,
            rows: Vec<NewSensorReading>,
        ) -> Result<Vec<SensorReading>, StoreError> {
            self.inner.insert_readings(rows).await
        }

        async fn select_readings(
            &self,
            filter: &ReadingFilter,
        ) -> Result<Vec<SensorReading>, StoreError> {
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }
            if self.broken.is_some() && filter.sensor_type == self.broken {
                return Err(StoreError::new("connection reset"));
            }
            self.inner.select_readings(filter).await
        }

        async fn insert_anomaly(&self, row: NewAnomaly) -> Result<Anomaly, StoreError> {
            self.inner.insert_anomaly(row).await
        }

        async fn select_anomalies(
            &self,
            filter: &AnomalyFilter,
        ) -> Result<Vec<Anomaly>, StoreError> {
            self.inner.select_anomalies(filter).await
        }

        async fn count_anomalies_by_severity(&self) -> Result<Vec<(Severity, u64)>, StoreError> {
            Err(StoreError {
                message: "permission denied".into(),
                code: Some("42501".into()),
            })
        }

        async fn acknowledge_anomaly(
            &self,
            id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<Option<Anomaly>, StoreError> {
            self.inner.acknowledge_anomaly(id, at).await
        }

        async fn insert_stability(
            &self,
            row: NewStabilityScore,
        ) -> Result<StabilityScore, StoreError> {
            self.inner.insert_stability(row).await
        }

        async fn select_stability(
            &self,
            filter: &StabilityFilter,
        ) -> Result<Vec<StabilityScore>, StoreError> {
            self.inner.select_stability(filter).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[test]
    fn test_time_bound_accepts_rfc3339_and_bare_dates() {
        // ---
        assert_eq!(parse_time_bound("2025-03-26").unwrap(), at(-720));
        assert_eq!(parse_time_bound("2025-03-26T12:05:00Z").unwrap(), at(5));
        assert_eq!(parse_time_bound("2025-03-26T14:00:00+02:00").unwrap(), at(0));
        assert!(parse_time_bound("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_list_readings_is_newest_first_with_default_limit() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let rows = (0..120).map(|m| reading(SensorType::Weather, m)).collect();
        store.insert_readings(rows).await.unwrap();

        let svc = QueryService::new(store);
        let page = svc.list_readings(ReadingQuery::default()).await.unwrap();
        assert_eq!(page.len(), 100);
        assert!(page.windows(2).all(|w| w[0].recorded_at >= w[1].recorded_at));
        assert_eq!(page[0].recorded_at, at(119));
    }

    #[tokio::test]
    async fn test_list_readings_filters_by_source_and_range() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let mut rows: Vec<_> = (0..10).map(|m| reading(SensorType::Weather, m)).collect();
        rows[3].source = Source::Arduino;
        rows[7].source = Source::Arduino;
        store.insert_readings(rows).await.unwrap();

        let svc = QueryService::new(store);
        let q = ReadingQuery {
            source: Some(Source::Arduino),
            from: Some(at(5)),
            ..Default::default()
        };
        let page = svc.list_readings(q).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].recorded_at, at(7));
    }

    #[tokio::test]
    async fn test_list_anomalies_default_limit_and_order() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for m in 0..60 {
            store.insert_anomaly(anomaly(Severity::Low, m)).await.unwrap();
        }

        let svc = QueryService::new(store);
        let page = svc.list_anomalies(AnomalyQuery::default()).await.unwrap();
        assert_eq!(page.len(), 50);
        assert!(page.windows(2).all(|w| w[0].detected_at >= w[1].detected_at));

        let q = AnomalyQuery {
            offset: Some(55),
            ..Default::default()
        };
        assert_eq!(svc.list_anomalies(q).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_latest_with_only_radiation_rows() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store
            .insert_readings(vec![
                reading(SensorType::Radiation, 1),
                reading(SensorType::Radiation, 9),
                reading(SensorType::Radiation, 4),
            ])
            .await
            .unwrap();

        let latest = QueryService::new(store).latest_readings().await;
        assert!(latest.weather.is_none());
        assert!(latest.solar_wind.is_none());
        assert_eq!(latest.radiation.unwrap().recorded_at, at(9));
    }

    #[tokio::test]
    async fn test_latest_serializes_missing_categories_as_null() {
        // ---
        let latest = QueryService::new(Arc::new(MemoryStore::new()))
            .latest_stability()
            .await;
        assert_eq!(
            serde_json::to_value(latest).unwrap(),
            json!({"weather": null, "solar_wind": null, "radiation": null})
        );
    }

    #[tokio::test]
    async fn test_latest_failure_blanks_only_that_category() {
        // ---
        let store = Arc::new(FlakyStore::broken(SensorType::Weather));
        store
            .insert_readings(vec![
                reading(SensorType::Weather, 1),
                reading(SensorType::SolarWind, 2),
                reading(SensorType::Radiation, 3),
            ])
            .await
            .unwrap();

        let latest = QueryService::new(store).latest_readings().await;
        assert!(latest.weather.is_none());
        assert_eq!(latest.solar_wind.unwrap().recorded_at, at(2));
        assert_eq!(latest.radiation.unwrap().recorded_at, at(3));
    }

    #[tokio::test]
    async fn test_latest_lookups_run_concurrently() {
        // ---
        // Each lookup blocks until all three are in flight, so awaiting them
        // one after another would never finish.
        let store = Arc::new(FlakyStore::gated(SensorType::ALL.len()));
        store
            .insert_readings(vec![
                reading(SensorType::Weather, 1),
                reading(SensorType::Radiation, 3),
            ])
            .await
            .unwrap();

        let svc = QueryService::new(store);
        let latest = timeout(StdDuration::from_secs(5), svc.latest_readings())
            .await
            .expect("category lookups did not overlap");
        assert_eq!(latest.weather.unwrap().recorded_at, at(1));
        assert!(latest.solar_wind.is_none());
        assert_eq!(latest.radiation.unwrap().recorded_at, at(3));
    }

    #[tokio::test]
    async fn test_summary_on_empty_set_has_all_buckets() {
        // ---
        let svc = QueryService::new(Arc::new(MemoryStore::new()));
        assert_eq!(svc.anomaly_summary().await.unwrap(), SeveritySummary::default());
    }

    #[tokio::test]
    async fn test_summary_counts_per_severity() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for (i, s) in [Severity::High, Severity::High, Severity::Critical]
            .into_iter()
            .enumerate()
        {
            store.insert_anomaly(anomaly(s, i as i64)).await.unwrap();
        }

        let summary = QueryService::new(store).anomaly_summary().await.unwrap();
        assert_eq!(
            summary,
            SeveritySummary {
                low: 0,
                medium: 0,
                high: 2,
                critical: 1
            }
        );
    }

    #[tokio::test]
    async fn test_summary_propagates_coded_store_error() {
        // ---
        let store = Arc::new(FlakyStore::broken(SensorType::Weather));
        let err = QueryService::new(store).anomaly_summary().await.unwrap_err();
        assert!(matches!(err, ApiError::Store(ref e) if e.code.as_deref() == Some("42501")));
    }

    #[tokio::test]
    async fn test_history_is_chronological_and_capped() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for m in (0..250).rev() {
            store
                .insert_stability(score(SensorType::Weather, m, false))
                .await
                .unwrap();
        }

        let svc = QueryService::new(store);
        let q = HistoryQuery {
            limit: Some(1000),
            ..Default::default()
        };
        let series = svc.stability_history(q).await.unwrap();
        assert_eq!(series.len(), 200);
        assert!(series.windows(2).all(|w| w[0].computed_at <= w[1].computed_at));
        assert_eq!(series[0].computed_at, at(0));

        let q = HistoryQuery {
            limit: Some(5),
            ..Default::default()
        };
        assert_eq!(svc.stability_history(q).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_drift_events_only_flagged_rows_newest_first() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_stability(score(SensorType::Weather, 1, true)).await.unwrap();
        store.insert_stability(score(SensorType::Weather, 2, false)).await.unwrap();
        store.insert_stability(score(SensorType::Radiation, 3, true)).await.unwrap();
        store.insert_stability(score(SensorType::Weather, 4, true)).await.unwrap();

        let svc = QueryService::new(store);
        let events = svc.drift_events(DriftQuery::default()).await.unwrap();
        let times: Vec<_> = events.iter().map(|s| s.computed_at).collect();
        assert_eq!(times, vec![at(4), at(3), at(1)]);

        let q = DriftQuery {
            sensor_type: Some(SensorType::Weather),
            limit: Some(1),
        };
        let events = svc.drift_events(q).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].computed_at, at(4));
    }
}
