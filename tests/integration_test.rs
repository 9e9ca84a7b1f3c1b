//! End-to-end checks against a running server.
//!
//! Set `BASE_URL` (e.g. `http://localhost:8080`) to run them; without it each
//! test returns early so `cargo test` stays self-contained.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Anomaly {
    id: String,
    severity: String,
    acknowledged: bool,
    acknowledged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Reading {
    sensor_type: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    success: bool,
    count: usize,
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    low: u64,
    medium: u64,
    high: u64,
    critical: u64,
}

fn base_url() -> Option<String> {
    // ---
    match std::env::var("BASE_URL") {
        Ok(base) => Some(format!("{}/api", base.trim_end_matches('/'))),
        Err(_) => {
            eprintln!("BASE_URL not set, skipping live-server test");
            None
        }
    }
}

#[tokio::test]
async fn anomaly_lifecycle() -> Result<()> {
    // ---
    let Some(base) = base_url() else { return Ok(()) };
    let client = Client::new();

    let before: Envelope<Summary> = client
        .get(format!("{base}/anomaly/summary"))
        .send()
        .await?
        .json()
        .await?;

    let response = client
        .post(format!("{base}/anomaly"))
        .json(&json!({
            "sensor_type": "radiation",
            "value": 2.8,
            "threshold": 1.0,
            "severity": "high"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Envelope<Anomaly> = response.json().await?;
    assert!(created.success);
    assert_eq!(created.data.severity, "high");
    assert!(!created.data.acknowledged);

    let after: Envelope<Summary> = client
        .get(format!("{base}/anomaly/summary"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(after.data.high, before.data.high + 1);
    assert_eq!(after.data.low, before.data.low);
    assert_eq!(after.data.medium, before.data.medium);
    assert_eq!(after.data.critical, before.data.critical);

    let url = format!("{base}/anomaly/{}/acknowledge", created.data.id);
    let acked: Envelope<Anomaly> = client.patch(&url).send().await?.json().await?;
    assert!(acked.data.acknowledged);
    assert!(acked.data.acknowledged_at.is_some());

    // Acknowledging twice is not an error
    let again = client.patch(&url).send().await?;
    assert_eq!(again.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn readings_are_newest_first() -> Result<()> {
    // ---
    let Some(base) = base_url() else { return Ok(()) };
    let client = Client::new();

    let response = client
        .post(format!("{base}/sensor"))
        .json(&json!({"sensor_type": "weather", "value": 1013.2, "unit": "hPa"}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let url = format!("{base}/sensor?sensor_type=weather&limit=10");
    let page: ListEnvelope<Reading> = client.get(&url).send().await?.json().await?;

    assert!(page.success);
    assert!(page.count >= 1 && page.count <= 10, "Limit filter failed");
    assert_eq!(page.count, page.data.len());
    for r in &page.data {
        assert_eq!(r.sensor_type, "weather", "Sensor type filter failed");
    }
    assert!(page
        .data
        .windows(2)
        .all(|w| w[0].recorded_at >= w[1].recorded_at));

    Ok(())
}

#[tokio::test]
async fn oversized_batch_is_rejected() -> Result<()> {
    // ---
    let Some(base) = base_url() else { return Ok(()) };
    let one = json!({"sensor_type": "solar_wind", "value": 420.0, "unit": "km/s"});

    let response = Client::new()
        .post(format!("{base}/sensor/batch"))
        .json(&json!({ "readings": vec![one; 501] }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}
