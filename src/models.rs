//! Data models for the telemetry service.
//!
//! Three families of types live here:
//! - closed vocabularies (`SensorType`, `Source`, `Severity`)
//! - raw inbound payloads (`Raw*`), deserialized loosely so the validator can
//!   name the offending field instead of failing inside serde
//! - stored rows (`SensorReading`, `Anomaly`, `StabilityScore`) and the
//!   insert shapes (`New*`) the ingestion service hands to the row store

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ---

/// Sensor category: the fixed partition key for "latest" and "history" views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Weather,
    SolarWind,
    Radiation,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [Self::Weather, Self::SolarWind, Self::Radiation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::SolarWind => "solar_wind",
            Self::Radiation => "radiation",
        }
    }
}

/// Producer that emitted a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Esp32,
    Arduino,
    Simulator,
    PythonModel,
    Batch,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Self::Esp32,
        Self::Arduino,
        Self::Simulator,
        Self::PythonModel,
        Self::Batch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Esp32 => "esp32",
            Self::Arduino => "arduino",
            Self::Simulator => "simulator",
            Self::PythonModel => "python_model",
            Self::Batch => "batch",
        }
    }
}

/// Anomaly urgency tier. Used for grouping and counting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Error returned when a string does not name a member of a closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(pub String);

/// Implements `FromStr`, `Display` and a comma-joined `expected()` listing for
/// the vocabularies above, all driven by their `ALL` table and `as_str`.
macro_rules! vocabulary {
    ($ty:ty) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| UnknownVariant(s.to_string()))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $ty {
            /// Comma separated list of accepted values, for error messages.
            pub fn expected() -> String {
                <$ty>::ALL.map(|v| v.as_str()).join(", ")
            }
        }
    };
}

vocabulary!(SensorType);
vocabulary!(Source);
vocabulary!(Severity);

// --- Raw inbound payloads

/// Sensor reading as posted by a producer, before validation.
///
/// Every field is an untyped JSON value so that a wrong type surfaces as a
/// `ValidationError` naming the field. JSON `null` reads as absent.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawSensorReading {
    // ---
    pub sensor_type: Option<Value>,
    pub value: Option<Value>,
    pub unit: Option<Value>,
    pub source: Option<Value>,
    pub metadata: Option<Value>,
    /// Honored only by batch ingestion.
    pub recorded_at: Option<Value>,
}

/// Body of `POST /sensor/batch`.
#[derive(Debug, Default, Deserialize)]
pub struct RawSensorBatch {
    pub readings: Option<Vec<RawSensorReading>>,
}

/// Anomaly report as posted by the detection model, before validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawAnomaly {
    // ---
    pub sensor_type: Option<Value>,
    pub reading_id: Option<Value>,
    pub value: Option<Value>,
    pub threshold: Option<Value>,
    pub severity: Option<Value>,
    pub model_version: Option<Value>,
    pub description: Option<Value>,
    pub metadata: Option<Value>,
}

/// Stability score as posted by the model, before validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawStabilityScore {
    // ---
    pub sensor_type: Option<Value>,
    pub score: Option<Value>,
    pub window_hours: Option<Value>,
    pub model_version: Option<Value>,
    pub drift_detected: Option<Value>,
    pub drift_magnitude: Option<Value>,
    pub metadata: Option<Value>,
}

// --- Validated payloads (defaults not yet applied)

#[derive(Debug, Clone, PartialEq)]
pub struct SensorPayload {
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub source: Option<Source>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyPayload {
    pub sensor_type: SensorType,
    pub reading_id: Option<Uuid>,
    pub value: f64,
    pub threshold: Option<f64>,
    pub severity: Severity,
    pub model_version: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilityPayload {
    pub sensor_type: SensorType,
    pub score: f64,
    pub window_hours: Option<i32>,
    pub model_version: Option<String>,
    pub drift_detected: Option<bool>,
    pub drift_magnitude: Option<f64>,
    pub metadata: Option<Value>,
}

// --- Insert shapes handed to the row store

#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub source: Source,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAnomaly {
    pub sensor_type: SensorType,
    pub reading_id: Option<Uuid>,
    pub value: f64,
    pub threshold: Option<f64>,
    pub severity: Severity,
    pub model_version: String,
    pub description: Option<String>,
    pub metadata: Value,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStabilityScore {
    pub sensor_type: SensorType,
    pub score: f64,
    pub window_hours: i32,
    pub model_version: String,
    pub drift_detected: bool,
    pub drift_magnitude: Option<f64>,
    pub metadata: Value,
    pub computed_at: DateTime<Utc>,
}

// --- Stored rows

/// A persisted sensor reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    // ---
    pub id: Uuid,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub source: Source,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
}

/// A persisted anomaly. `acknowledged` is the only field that ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    // ---
    pub id: Uuid,
    pub sensor_type: SensorType,
    pub reading_id: Option<Uuid>,
    pub value: f64,
    pub threshold: Option<f64>,
    pub severity: Severity,
    pub model_version: String,
    pub description: Option<String>,
    pub metadata: Value,
    pub detected_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// A persisted stability score. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityScore {
    // ---
    pub id: Uuid,
    pub sensor_type: SensorType,
    pub score: f64,
    pub window_hours: i32,
    pub model_version: String,
    pub drift_detected: bool,
    pub drift_magnitude: Option<f64>,
    pub metadata: Value,
    pub computed_at: DateTime<Utc>,
}

impl NewSensorReading {
    pub fn into_row(self, id: Uuid) -> SensorReading {
        SensorReading {
            id,
            sensor_type: self.sensor_type,
            value: self.value,
            unit: self.unit,
            source: self.source,
            metadata: self.metadata,
            recorded_at: self.recorded_at,
        }
    }
}

impl NewAnomaly {
    pub fn into_row(self, id: Uuid) -> Anomaly {
        Anomaly {
            id,
            sensor_type: self.sensor_type,
            reading_id: self.reading_id,
            value: self.value,
            threshold: self.threshold,
            severity: self.severity,
            model_version: self.model_version,
            description: self.description,
            metadata: self.metadata,
            detected_at: self.detected_at,
            acknowledged: false,
            acknowledged_at: None,
        }
    }
}

impl NewStabilityScore {
    pub fn into_row(self, id: Uuid) -> StabilityScore {
        StabilityScore {
            id,
            sensor_type: self.sensor_type,
            score: self.score,
            window_hours: self.window_hours,
            model_version: self.model_version,
            drift_detected: self.drift_detected,
            drift_magnitude: self.drift_magnitude,
            metadata: self.metadata,
            computed_at: self.computed_at,
        }
    }
}

// --- Derived views

/// Most recent row per sensor category. A category with no row is `None`
/// and serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestByCategory<T> {
    pub weather: Option<T>,
    pub solar_wind: Option<T>,
    pub radiation: Option<T>,
}

/// Anomaly counts per severity. All four buckets are always present.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeveritySummary {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl SeveritySummary {
    pub fn add(&mut self, severity: Severity, count: u64) {
        let bucket = match severity {
            Severity::Low => &mut self.low,
            Severity::Medium => &mut self.medium,
            Severity::High => &mut self.high,
            Severity::Critical => &mut self.critical,
        };
        *bucket += count;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_vocabulary_round_trips_through_str() {
        // ---
        for t in SensorType::ALL {
            assert_eq!(t.as_str().parse::<SensorType>(), Ok(t));
        }
        for s in Source::ALL {
            assert_eq!(s.as_str().parse::<Source>(), Ok(s));
        }
        for s in Severity::ALL {
            assert_eq!(s.as_str().parse::<Severity>(), Ok(s));
        }
        assert!("Weather".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_unknown_variant_names_the_input() {
        // ---
        let err = "plasma".parse::<SensorType>().unwrap_err();
        assert_eq!(err, UnknownVariant("plasma".into()));
        assert_eq!(err.to_string(), "unknown variant 'plasma'");
    }

    #[test]
    fn test_serde_names_match_wire_format() {
        // ---
        assert_eq!(
            serde_json::to_value(SensorType::SolarWind).unwrap(),
            Value::from("solar_wind")
        );
        assert_eq!(
            serde_json::to_value(Source::PythonModel).unwrap(),
            Value::from("python_model")
        );
        assert_eq!(
            serde_json::from_value::<Severity>(Value::from("critical")).unwrap(),
            Severity::Critical
        );
    }

    #[test]
    fn test_expected_lists_every_member() {
        // ---
        assert_eq!(SensorType::expected(), "weather, solar_wind, radiation");
        assert_eq!(Severity::expected(), "low, medium, high, critical");
    }

    #[test]
    fn test_severity_is_ordinal() {
        // ---
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_summary_starts_with_all_buckets_zero() {
        // ---
        let summary = SeveritySummary::default();
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"low": 0, "medium": 0, "high": 0, "critical": 0})
        );
    }

    #[test]
    fn test_summary_add_targets_one_bucket() {
        // ---
        let mut summary = SeveritySummary::default();
        summary.add(Severity::High, 2);
        summary.add(Severity::High, 1);
        summary.add(Severity::Low, 4);
        assert_eq!(summary.high, 3);
        assert_eq!(summary.low, 4);
        assert_eq!(summary.medium, 0);
        assert_eq!(summary.critical, 0);
    }

    #[test]
    fn test_new_anomaly_row_starts_unacknowledged() {
        // ---
        let row = NewAnomaly {
            sensor_type: SensorType::Radiation,
            reading_id: None,
            value: 2.8,
            threshold: Some(1.0),
            severity: Severity::High,
            model_version: "1.0.0".to_string(),
            description: None,
            metadata: serde_json::json!({}),
            detected_at: Utc::now(),
        }
        .into_row(Uuid::new_v4());

        assert!(!row.acknowledged);
        assert!(row.acknowledged_at.is_none());
    }

    #[test]
    fn test_raw_reading_treats_null_as_absent() {
        // ---
        let raw: RawSensorReading =
            serde_json::from_str(r#"{"sensor_type":"weather","value":null}"#).unwrap();
        assert!(raw.sensor_type.is_some());
        assert!(raw.value.is_none());
        assert!(raw.unit.is_none());
    }
}
