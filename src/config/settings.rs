//! Process settings from the environment (`.env` honoured via dotenvy).

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Schema document (JSON) describing the entities.
    pub schema_path: PathBuf,
    pub max_connections: u32,
    /// Server-side `statement_timeout` for every pooled connection.
    pub statement_timeout_ms: u64,
    /// Server-side `idle_in_transaction_session_timeout`.
    pub idle_in_transaction_timeout_ms: u64,
    pub application_name: String,
    pub default_per_page: u64,
    /// Batch size for windowed exports.
    pub export_batch_size: u64,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/partnerbase".into(),
            schema_path: PathBuf::from("schema.json"),
            max_connections: 10,
            statement_timeout_ms: 10_000,
            idle_in_transaction_timeout_ms: 60_000,
            application_name: "partnerbase".into(),
            default_per_page: 100,
            export_batch_size: 500,
            bind_addr: "0.0.0.0:3000".into(),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Validation(format!("{}: {}", key, e))),
        _ => Ok(default),
    }
}

impl Settings {
    /// Read settings from the process environment after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let d = Settings::default();
        let settings = Settings {
            database_url: env_or("DATABASE_URL", d.database_url)?,
            schema_path: env_or("SCHEMA_PATH", d.schema_path)?,
            max_connections: env_or("DB_MAX_CONNECTIONS", d.max_connections)?,
            statement_timeout_ms: env_or("DB_STATEMENT_TIMEOUT_MS", d.statement_timeout_ms)?,
            idle_in_transaction_timeout_ms: env_or(
                "DB_IDLE_TX_TIMEOUT_MS",
                d.idle_in_transaction_timeout_ms,
            )?,
            application_name: env_or("APP_NAME", d.application_name)?,
            default_per_page: env_or("DEFAULT_PER_PAGE", d.default_per_page)?,
            export_batch_size: env_or("EXPORT_BATCH_SIZE", d.export_batch_size)?,
            bind_addr: env_or("BIND_ADDR", d.bind_addr)?,
        };
        if settings.export_batch_size == 0 {
            return Err(ConfigError::Validation("EXPORT_BATCH_SIZE must be positive".into()));
        }
        Ok(settings)
    }
}
