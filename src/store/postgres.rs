//! PostgreSQL row store.
//!
//! Filters are composed with `sqlx::QueryBuilder` so that every caller value
//! is a bound parameter. Enumerations are stored as `TEXT` and parsed back on
//! read; a row holding an unknown value surfaces as a `StoreError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{AnomalyFilter, Order, ReadingFilter, RowStore, StabilityFilter};
use crate::models::{
    Anomaly, NewAnomaly, NewSensorReading, NewStabilityScore, SensorReading, Severity,
    StabilityScore,
};
use crate::StoreError;

const READING_COLUMNS: &str = "id, sensor_type, value, unit, source, metadata, recorded_at";

const ANOMALY_COLUMNS: &str = "id, sensor_type, reading_id, value, threshold, severity, \
     model_version, description, metadata, detected_at, acknowledged, acknowledged_at";

const STABILITY_COLUMNS: &str = "id, sensor_type, score, window_hours, model_version, \
     drift_detected, drift_magnitude, metadata, computed_at";

// ---

/// Row store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// --- raw rows as they come off the wire

#[derive(sqlx::FromRow)]
struct ReadingRow {
    id: Uuid,
    sensor_type: String,
    value: f64,
    unit: String,
    source: String,
    metadata: Value,
    recorded_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AnomalyRow {
    id: Uuid,
    sensor_type: String,
    reading_id: Option<Uuid>,
    value: f64,
    threshold: Option<f64>,
    severity: String,
    model_version: String,
    description: Option<String>,
    metadata: Value,
    detected_at: DateTime<Utc>,
    acknowledged: bool,
    acknowledged_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct StabilityRow {
    id: Uuid,
    sensor_type: String,
    score: f64,
    window_hours: i32,
    model_version: String,
    drift_detected: bool,
    drift_magnitude: Option<f64>,
    metadata: Value,
    computed_at: DateTime<Utc>,
}

fn parse_column<T: std::str::FromStr>(column: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::new(format!("unexpected {column} '{raw}' in stored row")))
}

impl TryFrom<ReadingRow> for SensorReading {
    type Error = StoreError;

    fn try_from(r: ReadingRow) -> Result<Self, Self::Error> {
        Ok(SensorReading {
            id: r.id,
            sensor_type: parse_column("sensor_type", &r.sensor_type)?,
            value: r.value,
            unit: r.unit,
            source: parse_column("source", &r.source)?,
            metadata: r.metadata,
            recorded_at: r.recorded_at,
        })
    }
}

impl TryFrom<AnomalyRow> for Anomaly {
    type Error = StoreError;

    fn try_from(r: AnomalyRow) -> Result<Self, Self::Error> {
        Ok(Anomaly {
            id: r.id,
            sensor_type: parse_column("sensor_type", &r.sensor_type)?,
            reading_id: r.reading_id,
            value: r.value,
            threshold: r.threshold,
            severity: parse_column("severity", &r.severity)?,
            model_version: r.model_version,
            description: r.description,
            metadata: r.metadata,
            detected_at: r.detected_at,
            acknowledged: r.acknowledged,
            acknowledged_at: r.acknowledged_at,
        })
    }
}

impl TryFrom<StabilityRow> for StabilityScore {
    type Error = StoreError;

    fn try_from(r: StabilityRow) -> Result<Self, Self::Error> {
        Ok(StabilityScore {
            id: r.id,
            sensor_type: parse_column("sensor_type", &r.sensor_type)?,
            score: r.score,
            window_hours: r.window_hours,
            model_version: r.model_version,
            drift_detected: r.drift_detected,
            drift_magnitude: r.drift_magnitude,
            metadata: r.metadata,
            computed_at: r.computed_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Append `AND <column> >= from AND <column> <= to` for whichever bounds are set.
fn push_time_range(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) {
    if let Some(from) = from {
        qb.push(format!(" AND {column} >= ")).push_bind(from);
    }
    if let Some(to) = to {
        qb.push(format!(" AND {column} <= ")).push_bind(to);
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, limit: i64, offset: i64) {
    qb.push(" LIMIT ").push_bind(limit);
    qb.push(" OFFSET ").push_bind(offset);
}

#[async_trait]
impl RowStore for PgStore {
    // ---
    async fn insert_readings(
        &self,
        rows: Vec<NewSensorReading>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        // ---
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO sensor_readings ({READING_COLUMNS}) "
        ));
        qb.push_values(rows, |mut b, r| {
            b.push_bind(Uuid::new_v4())
                .push_bind(r.sensor_type.as_str())
                .push_bind(r.value)
                .push_bind(r.unit)
                .push_bind(r.source.as_str())
                .push_bind(r.metadata)
                .push_bind(r.recorded_at);
        });
        qb.push(format!(" RETURNING {READING_COLUMNS}"));

        let rows: Vec<ReadingRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        tracing::debug!("Inserted {} sensor_readings rows", rows.len());
        convert_all(rows)
    }

    async fn select_readings(
        &self,
        filter: &ReadingFilter,
    ) -> Result<Vec<SensorReading>, StoreError> {
        // ---
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings WHERE TRUE"
        ));
        if let Some(t) = filter.sensor_type {
            qb.push(" AND sensor_type = ").push_bind(t.as_str());
        }
        if let Some(s) = filter.source {
            qb.push(" AND source = ").push_bind(s.as_str());
        }
        push_time_range(&mut qb, "recorded_at", filter.from, filter.to);
        qb.push(" ORDER BY recorded_at DESC");
        push_page(&mut qb, filter.limit, filter.offset);

        let rows: Vec<ReadingRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn insert_anomaly(&self, row: NewAnomaly) -> Result<Anomaly, StoreError> {
        // ---
        let stored: AnomalyRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO anomalies (
                id, sensor_type, reading_id, value, threshold, severity,
                model_version, description, metadata, detected_at, acknowledged
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
            RETURNING {ANOMALY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(row.sensor_type.as_str())
        .bind(row.reading_id)
        .bind(row.value)
        .bind(row.threshold)
        .bind(row.severity.as_str())
        .bind(&row.model_version)
        .bind(&row.description)
        .bind(&row.metadata)
        .bind(row.detected_at)
        .fetch_one(&self.pool)
        .await?;

        stored.try_into()
    }

    async fn select_anomalies(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, StoreError> {
        // ---
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ANOMALY_COLUMNS} FROM anomalies WHERE TRUE"
        ));
        if let Some(t) = filter.sensor_type {
            qb.push(" AND sensor_type = ").push_bind(t.as_str());
        }
        if let Some(s) = filter.severity {
            qb.push(" AND severity = ").push_bind(s.as_str());
        }
        if let Some(ack) = filter.acknowledged {
            qb.push(" AND acknowledged = ").push_bind(ack);
        }
        push_time_range(&mut qb, "detected_at", filter.from, filter.to);
        qb.push(" ORDER BY detected_at DESC");
        push_page(&mut qb, filter.limit, filter.offset);

        let rows: Vec<AnomalyRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn count_anomalies_by_severity(&self) -> Result<Vec<(Severity, u64)>, StoreError> {
        // ---
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT severity, COUNT(*) FROM anomalies GROUP BY severity")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for (severity, n) in rows {
            match severity.parse::<Severity>() {
                Ok(s) => counts.push((s, n.max(0) as u64)),
                Err(e) => tracing::warn!("Skipping {} anomalies with {}", n, e),
            }
        }
        Ok(counts)
    }

    async fn acknowledge_anomaly(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Anomaly>, StoreError> {
        // ---
        let row: Option<AnomalyRow> = sqlx::query_as(&format!(
            r#"
            UPDATE anomalies
               SET acknowledged = TRUE, acknowledged_at = $1
             WHERE id = $2
            RETURNING {ANOMALY_COLUMNS}
            "#
        ))
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Anomaly::try_from).transpose()
    }

    async fn insert_stability(
        &self,
        row: NewStabilityScore,
    ) -> Result<StabilityScore, StoreError> {
        // ---
        let stored: StabilityRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO stability_scores ({STABILITY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {STABILITY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(row.sensor_type.as_str())
        .bind(row.score)
        .bind(row.window_hours)
        .bind(&row.model_version)
        .bind(row.drift_detected)
        .bind(row.drift_magnitude)
        .bind(&row.metadata)
        .bind(row.computed_at)
        .fetch_one(&self.pool)
        .await?;

        stored.try_into()
    }

    async fn select_stability(
        &self,
        filter: &StabilityFilter,
    ) -> Result<Vec<StabilityScore>, StoreError> {
        // ---
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {STABILITY_COLUMNS} FROM stability_scores WHERE TRUE"
        ));
        if let Some(t) = filter.sensor_type {
            qb.push(" AND sensor_type = ").push_bind(t.as_str());
        }
        if filter.drift_only {
            qb.push(" AND drift_detected = TRUE");
        }
        push_time_range(&mut qb, "computed_at", filter.from, filter.to);
        qb.push(match filter.order {
            Order::Ascending => " ORDER BY computed_at ASC",
            Order::Descending => " ORDER BY computed_at DESC",
        });
        push_page(&mut qb, filter.limit, filter.offset);

        let rows: Vec<StabilityRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        // ---
        sqlx::query("SELECT id FROM sensor_readings LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }
}
