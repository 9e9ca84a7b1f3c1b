//! Ingestion service: the write path.
//!
//! Every write runs the validator first, then applies defaults, stamps the
//! server-side timestamp and hands the row to the injected `RowStore`.
//! Nothing reaches the store if validation fails.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Anomaly, NewAnomaly, NewSensorReading, NewStabilityScore, RawAnomaly, RawSensorReading,
    RawStabilityScore, SensorReading, Source, StabilityScore,
};
use crate::store::RowStore;
use crate::{validate, ApiError, StoreError, ValidationError};

/// Maximum number of readings accepted by one batch write.
pub const MAX_BATCH_SIZE: usize = 500;

pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

pub const DEFAULT_WINDOW_HOURS: i32 = 24;

// ---

#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn RowStore>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl IngestionService {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Validate and store one reading. `recorded_at` is always the server's
    /// clock on this path; a caller-supplied value is ignored.
    pub async fn record_reading(&self, raw: RawSensorReading) -> Result<SensorReading, ApiError> {
        // ---
        let checked = validate::sensor_reading(&raw)?;
        let row = NewSensorReading {
            sensor_type: checked.sensor_type,
            value: checked.value,
            unit: checked.unit,
            source: checked.source.unwrap_or(Source::Esp32),
            metadata: checked.metadata.unwrap_or_else(empty_object),
            recorded_at: Utc::now(),
        };

        let stored = self
            .store
            .insert_readings(vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::new("insert returned no row"))?;

        debug!("Recorded {} reading {}", stored.sensor_type, stored.id);
        Ok(stored)
    }

    /// Validate every element, then insert them as one bulk operation.
    ///
    /// Rejects an empty list or one longer than [`MAX_BATCH_SIZE`]. Elements
    /// default to `source = batch` and keep a caller-supplied `recorded_at`.
    /// Returns the number of rows the store reports as inserted.
    pub async fn record_batch(&self, raw: Vec<RawSensorReading>) -> Result<usize, ApiError> {
        // ---
        if raw.is_empty() {
            return Err(ValidationError::new("readings", "readings must be a non-empty array").into());
        }
        if raw.len() > MAX_BATCH_SIZE {
            return Err(ValidationError::new(
                "readings",
                format!("batch limit exceeded: at most {MAX_BATCH_SIZE} readings per batch"),
            )
            .into());
        }

        let now = Utc::now();
        let rows = raw
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let checked = validate::sensor_reading(r).map_err(|e| e.in_batch(i))?;
                let recorded_at = validate::optional_timestamp("recorded_at", r.recorded_at.as_ref())
                    .map_err(|e| e.in_batch(i))?;
                Ok(NewSensorReading {
                    sensor_type: checked.sensor_type,
                    value: checked.value,
                    unit: checked.unit,
                    source: checked.source.unwrap_or(Source::Batch),
                    metadata: checked.metadata.unwrap_or_else(empty_object),
                    recorded_at: recorded_at.unwrap_or(now),
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let requested = rows.len();
        let inserted = self.store.insert_readings(rows).await?.len();
        if inserted == requested {
            info!("Batch ingest stored {} readings", inserted);
        } else {
            tracing::warn!(
                "Batch ingest partially applied: {} of {} readings stored",
                inserted,
                requested
            );
        }
        Ok(inserted)
    }

    /// Validate and store one anomaly report, unacknowledged.
    pub async fn record_anomaly(&self, raw: RawAnomaly) -> Result<Anomaly, ApiError> {
        // ---
        let checked = validate::anomaly(&raw)?;
        let row = NewAnomaly {
            sensor_type: checked.sensor_type,
            reading_id: checked.reading_id,
            value: checked.value,
            threshold: checked.threshold,
            severity: checked.severity,
            model_version: checked
                .model_version
                .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
            description: checked.description,
            metadata: checked.metadata.unwrap_or_else(empty_object),
            detected_at: Utc::now(),
        };

        let stored = self.store.insert_anomaly(row).await?;
        info!(
            "Recorded {} anomaly {} on {}",
            stored.severity, stored.id, stored.sensor_type
        );
        Ok(stored)
    }

    /// Validate and store one stability score.
    pub async fn record_stability(
        &self,
        raw: RawStabilityScore,
    ) -> Result<StabilityScore, ApiError> {
        // ---
        let checked = validate::stability_score(&raw)?;
        let row = NewStabilityScore {
            sensor_type: checked.sensor_type,
            score: checked.score,
            window_hours: checked.window_hours.unwrap_or(DEFAULT_WINDOW_HOURS),
            model_version: checked
                .model_version
                .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
            drift_detected: checked.drift_detected.unwrap_or(false),
            drift_magnitude: checked.drift_magnitude,
            metadata: checked.metadata.unwrap_or_else(empty_object),
            computed_at: Utc::now(),
        };

        let stored = self.store.insert_stability(row).await?;
        if stored.drift_detected {
            info!("Drift detected on {} (score {})", stored.sensor_type, stored.score);
        }
        Ok(stored)
    }

    /// Mark an anomaly as acknowledged. Repeating the call succeeds and moves
    /// `acknowledged_at` forward.
    pub async fn acknowledge_anomaly(&self, id: Uuid) -> Result<Anomaly, ApiError> {
        // ---
        self.store
            .acknowledge_anomaly(id, Utc::now())
            .await?
            .ok_or_else(|| ApiError::NotFound("Anomaly not found".to_string()))
    }
}
