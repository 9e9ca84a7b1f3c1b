//! Database schema management for the telemetry service.
//!
//! Ensures the three telemetry tables and their indexes exist before serving
//! requests. Applied once on startup from `main.rs` (EMBP: single gateway
//! call), and only when the Postgres backend is selected.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sensor_readings`, `anomalies` and `stability_scores`. Enumerated
/// columns are plain `TEXT`; their vocabularies are enforced by the
/// validator at the HTTP boundary, not by the database. `anomalies.reading_id`
/// is deliberately not a foreign key.
///
/// Safe to call on every startup; no-op if objects already exist. Errors are
/// propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id           UUID             PRIMARY KEY,
            sensor_type  TEXT             NOT NULL,
            value        DOUBLE PRECISION NOT NULL,
            unit         TEXT             NOT NULL,
            source       TEXT             NOT NULL,
            metadata     JSONB            NOT NULL DEFAULT '{}'::jsonb,
            recorded_at  TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anomalies (
            id               UUID             PRIMARY KEY,
            sensor_type      TEXT             NOT NULL,
            reading_id       UUID,
            value            DOUBLE PRECISION NOT NULL,
            threshold        DOUBLE PRECISION,
            severity         TEXT             NOT NULL,
            model_version    TEXT             NOT NULL,
            description      TEXT,
            metadata         JSONB            NOT NULL DEFAULT '{}'::jsonb,
            detected_at      TIMESTAMPTZ      NOT NULL,
            acknowledged     BOOLEAN          NOT NULL DEFAULT FALSE,
            acknowledged_at  TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stability_scores (
            id               UUID             PRIMARY KEY,
            sensor_type      TEXT             NOT NULL,
            score            DOUBLE PRECISION NOT NULL,
            window_hours     INTEGER          NOT NULL,
            model_version    TEXT             NOT NULL,
            drift_detected   BOOLEAN          NOT NULL DEFAULT FALSE,
            drift_magnitude  DOUBLE PRECISION,
            metadata         JSONB            NOT NULL DEFAULT '{}'::jsonb,
            computed_at      TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Indexes backing the per-category "latest" and time-range queries
    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_sensor_readings_type_time
            ON sensor_readings (sensor_type, recorded_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_anomalies_type_time
            ON anomalies (sensor_type, detected_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_anomalies_severity
            ON anomalies (severity)",
        "CREATE INDEX IF NOT EXISTS idx_stability_scores_type_time
            ON stability_scores (sensor_type, computed_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_stability_scores_drift
            ON stability_scores (computed_at DESC) WHERE drift_detected",
    ] {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!("Database schema is up to date");
    Ok(())
}
