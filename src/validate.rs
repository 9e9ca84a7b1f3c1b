//! Inbound payload validation.
//!
//! Pure functions: each takes a raw payload and either returns a typed,
//! checked payload or a `ValidationError` naming the first offending field.
//! Defaults are not applied here; that is the ingestion service's job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    AnomalyPayload, RawAnomaly, RawSensorReading, RawStabilityScore, SensorPayload, SensorType,
    Severity, Source, StabilityPayload,
};
use crate::ValidationError;

type Result<T> = std::result::Result<T, ValidationError>;

// ---

/// Check a sensor reading: `sensor_type`, `value`, `unit` required; `source`
/// optional but must be a known producer.
pub fn sensor_reading(raw: &RawSensorReading) -> Result<SensorPayload> {
    // ---
    Ok(SensorPayload {
        sensor_type: sensor_type(raw.sensor_type.as_ref())?,
        value: required_number("value", raw.value.as_ref())?,
        unit: unit(raw.unit.as_ref())?,
        source: optional_source(raw.source.as_ref())?,
        metadata: optional_object("metadata", raw.metadata.as_ref())?,
    })
}

/// Check an anomaly report: `sensor_type`, `value`, `severity` required.
pub fn anomaly(raw: &RawAnomaly) -> Result<AnomalyPayload> {
    // ---
    Ok(AnomalyPayload {
        sensor_type: sensor_type(raw.sensor_type.as_ref())?,
        value: required_number("value", raw.value.as_ref())?,
        severity: severity(raw.severity.as_ref())?,
        reading_id: optional_uuid("reading_id", raw.reading_id.as_ref())?,
        threshold: optional_number("threshold", raw.threshold.as_ref())?,
        model_version: optional_string("model_version", raw.model_version.as_ref())?,
        description: optional_string("description", raw.description.as_ref())?,
        metadata: optional_object("metadata", raw.metadata.as_ref())?,
    })
}

/// Check a stability score: `sensor_type` and `score` required, with the
/// score inside the closed interval [0, 1].
pub fn stability_score(raw: &RawStabilityScore) -> Result<StabilityPayload> {
    // ---
    let sensor_type = sensor_type(raw.sensor_type.as_ref())?;
    let score = required_number("score", raw.score.as_ref())?;
    if !(0.0..=1.0).contains(&score) {
        return Err(ValidationError::new(
            "score",
            "score must be between 0.0 and 1.0",
        ));
    }

    Ok(StabilityPayload {
        sensor_type,
        score,
        window_hours: optional_window_hours(raw.window_hours.as_ref())?,
        model_version: optional_string("model_version", raw.model_version.as_ref())?,
        drift_detected: optional_bool("drift_detected", raw.drift_detected.as_ref())?,
        drift_magnitude: optional_number("drift_magnitude", raw.drift_magnitude.as_ref())?,
        metadata: optional_object("metadata", raw.metadata.as_ref())?,
    })
}

/// Parse an optional RFC 3339 timestamp such as a caller-supplied
/// `recorded_at`.
pub fn optional_timestamp(field: &str, raw: Option<&Value>) -> Result<Option<DateTime<Utc>>> {
    // ---
    let Some(v) = raw else { return Ok(None) };
    let s = v
        .as_str()
        .ok_or_else(|| ValidationError::new(field, format!("{field} must be an RFC 3339 string")))?;
    DateTime::parse_from_rfc3339(s)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| ValidationError::new(field, format!("{field} is not a valid timestamp: {e}")))
}

// --- field checks

fn sensor_type(raw: Option<&Value>) -> Result<SensorType> {
    enum_member("sensor_type", raw, SensorType::expected)
}

fn severity(raw: Option<&Value>) -> Result<Severity> {
    enum_member("severity", raw, Severity::expected)
}

fn optional_source(raw: Option<&Value>) -> Result<Option<Source>> {
    raw.map(|v| enum_member("source", Some(v), Source::expected))
        .transpose()
}

fn enum_member<T: std::str::FromStr>(
    field: &str,
    raw: Option<&Value>,
    expected: fn() -> String,
) -> Result<T> {
    // ---
    let v = raw.ok_or_else(|| ValidationError::missing(field))?;
    v.as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ValidationError::new(field, format!("{field} must be one of: {}", expected())))
}

fn required_number(field: &str, raw: Option<&Value>) -> Result<f64> {
    // ---
    let v = raw.ok_or_else(|| ValidationError::missing(field))?;
    number(field, v)
}

fn optional_number(field: &str, raw: Option<&Value>) -> Result<Option<f64>> {
    raw.map(|v| number(field, v)).transpose()
}

/// JSON cannot carry NaN, but a string such as `"NaN"` must not sneak in
/// either: only real JSON numbers are accepted.
fn number(field: &str, v: &Value) -> Result<f64> {
    v.as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ValidationError::new(field, format!("{field} must be a number")))
}

fn unit(raw: Option<&Value>) -> Result<String> {
    // ---
    match raw.and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ValidationError::new(
            "unit",
            "unit is required (e.g. hPa, km/s, Sv)",
        )),
    }
}

fn optional_string(field: &str, raw: Option<&Value>) -> Result<Option<String>> {
    raw.map(|v| {
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| ValidationError::new(field, format!("{field} must be a string")))
    })
    .transpose()
}

fn optional_bool(field: &str, raw: Option<&Value>) -> Result<Option<bool>> {
    raw.map(|v| {
        v.as_bool()
            .ok_or_else(|| ValidationError::new(field, format!("{field} must be a boolean")))
    })
    .transpose()
}

fn optional_object(field: &str, raw: Option<&Value>) -> Result<Option<Value>> {
    // ---
    match raw {
        None => Ok(None),
        Some(v @ Value::Object(_)) => Ok(Some(v.clone())),
        Some(_) => Err(ValidationError::new(
            field,
            format!("{field} must be a JSON object"),
        )),
    }
}

fn optional_uuid(field: &str, raw: Option<&Value>) -> Result<Option<Uuid>> {
    raw.map(|v| {
        v.as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| ValidationError::new(field, format!("{field} must be a UUID")))
    })
    .transpose()
}

fn optional_window_hours(raw: Option<&Value>) -> Result<Option<i32>> {
    // ---
    raw.map(|v| {
        v.as_i64()
            .filter(|h| *h > 0)
            .and_then(|h| i32::try_from(h).ok())
            .ok_or_else(|| {
                ValidationError::new("window_hours", "window_hours must be a positive integer")
            })
    })
    .transpose()
}
