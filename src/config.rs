//! Configuration loader for the telemetry service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
use std::{env, time::Duration};

use anyhow::{anyhow, bail, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Which row store implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// In-process tables; contents are lost on restart.
    Memory,
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string. Present whenever the backend is Postgres.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// TCP port the HTTP server listens on.
    pub port: u16,

    /// Single allowed CORS origin; `None` allows any origin.
    pub cors_origin: Option<String>,

    /// Maximum accepted request body size, in bytes.
    pub max_body_bytes: usize,

    /// Probe reads slower than this report the service as degraded.
    pub health_degraded_after: Duration,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string (Postgres backend only)
///
/// Optional:
/// - `STORE_BACKEND` – `postgres` or `memory` (default: postgres)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `PORT` – listen port (default: 8080)
/// - `CORS_ORIGIN` – allowed origin (default: any)
/// - `MAX_BODY_BYTES` – JSON body limit (default: 10 MiB)
/// - `HEALTH_DEGRADED_MS` – probe latency budget (default: 1000)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let store_backend = match env::var("STORE_BACKEND").as_deref() {
        Err(_) | Ok("postgres") => StoreBackend::Postgres,
        Ok("memory") => StoreBackend::Memory,
        Ok(other) => bail!("Invalid STORE_BACKEND: '{other}' (expected postgres or memory)"),
    };

    let db_url = match store_backend {
        StoreBackend::Postgres => Some(require_env!("DATABASE_URL")),
        StoreBackend::Memory => env::var("DATABASE_URL").ok(),
    };

    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let port = u16::try_from(parse_env_u32!("PORT", 8080))
        .map_err(|_| anyhow!("Invalid PORT: must fit in 16 bits"))?;
    let max_body_bytes = parse_env_u32!("MAX_BODY_BYTES", 10 * 1024 * 1024) as usize;
    let health_degraded_ms = parse_env_u32!("HEALTH_DEGRADED_MS", 1000);
    let cors_origin = env::var("CORS_ORIGIN").ok().filter(|o| !o.is_empty() && o != "*");

    Ok(Config {
        store_backend,
        db_url,
        db_pool_max,
        port,
        cors_origin,
        max_body_bytes,
        health_degraded_after: Duration::from_millis(health_degraded_ms.into()),
    })
}

/// Mask the password component of a connection URL for logging.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // A colon right after "scheme:/" belongs to the scheme, not a password
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

impl Config {
    /// Configuration used by in-process tests: memory backend, defaults elsewhere.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            db_url: None,
            db_pool_max: 1,
            port: 0,
            cors_origin: None,
            max_body_bytes: 10 * 1024 * 1024,
            health_degraded_after: Duration::from_secs(1),
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_db_url = self.db_url.as_deref().map(mask_db_url);

        tracing::info!("Configuration loaded:");
        tracing::info!("  STORE_BACKEND      : {:?}", self.store_backend);
        tracing::info!(
            "  DATABASE_URL       : {}",
            masked_db_url.as_deref().unwrap_or("(unset)")
        );
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  PORT               : {}", self.port);
        tracing::info!(
            "  CORS_ORIGIN        : {}",
            self.cors_origin.as_deref().unwrap_or("*")
        );
        tracing::info!("  MAX_BODY_BYTES     : {}", self.max_body_bytes);
        tracing::info!(
            "  HEALTH_DEGRADED_MS : {}",
            self.health_degraded_after.as_millis()
        );
    }
}
