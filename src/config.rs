//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup. Sync behaviour (default period,
//! intraday retrieval, zero-value retention) is deployment configuration
//! rather than per-task input.

use std::env;

/// Name of the Cloud Tasks queue that delivers sync tasks.
pub const SYNC_QUEUE_NAME: &str = "fitbit-sync";

/// Periods accepted by the Fitbit time series endpoint.
pub const VALID_PERIODS: &[&str] = &["1d", "7d", "30d", "1w", "1m", "3m", "6m", "1y", "max"];

/// Where credentials, observations and fetch locks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    /// Process-local maps; only suitable for a single instance.
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region hosting the task queue
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    /// Public base URL of this service (Cloud Tasks target)
    pub api_url: String,
    /// Base URL of the Fitbit Web API
    pub fitbit_api_url: String,
    /// Secret path segment for the notification endpoint
    pub webhook_path_uuid: String,
    /// Code Fitbit sends when verifying the subscriber endpoint
    pub verification_code: Option<String>,
    /// Subscriber id registered with Fitbit for push notifications
    pub subscriber_id: Option<String>,
    /// Period fetched when a daily sync has no explicit date (`None` = full history)
    pub default_period: Option<String>,
    /// Whether to fan out to intraday retrieval
    pub get_intraday: bool,
    /// Whether zero-valued intraday samples are stored
    pub save_intraday_zero_values: bool,
    /// Delay added between consecutive intraday dispatches
    pub intraday_stagger_secs: u64,
    /// Optional JSON file overriding the built-in resource catalog
    pub resource_catalog_path: Option<String>,
    pub storage_backend: StorageBackend,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-central1".to_string(),
            port: 8080,
            api_url: "http://localhost:8080".to_string(),
            fitbit_api_url: "https://api.fitbit.com".to_string(),
            webhook_path_uuid: "test-webhook-uuid".to_string(),
            verification_code: Some("test_verification_code".to_string()),
            subscriber_id: Some("1".to_string()),
            default_period: None,
            get_intraday: false,
            save_intraday_zero_values: false,
            intraday_stagger_secs: 2,
            resource_catalog_path: None,
            storage_backend: StorageBackend::Memory,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let default_period = optional("FITBIT_DEFAULT_PERIOD");
        if let Some(period) = &default_period {
            validate_period(period)?;
        }

        Ok(Self {
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-central1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            fitbit_api_url: env::var("FITBIT_API_URL")
                .unwrap_or_else(|_| "https://api.fitbit.com".to_string()),
            webhook_path_uuid: env::var("WEBHOOK_PATH_UUID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_PATH_UUID"))?,
            verification_code: optional("FITBIT_VERIFICATION_CODE"),
            subscriber_id: optional("FITBIT_SUBSCRIBER_ID"),
            default_period,
            get_intraday: flag("FITBIT_GET_INTRADAY")?,
            save_intraday_zero_values: flag("FITBIT_SAVE_INTRADAY_ZERO_VALUES")?,
            intraday_stagger_secs: match optional("INTRADAY_STAGGER_SECS") {
                Some(v) => v
                    .parse()
                    .map_err(|_| ConfigError::Invalid("INTRADAY_STAGGER_SECS", v))?,
                None => 2,
            },
            resource_catalog_path: optional("RESOURCE_CATALOG_PATH"),
            storage_backend: match optional("STORAGE_BACKEND") {
                Some(v) => parse_backend(&v)?,
                None => StorageBackend::Firestore,
            },
        })
    }
}

/// Read a variable, treating empty values as unset.
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag(name: &'static str) -> Result<bool, ConfigError> {
    match optional(name) {
        Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid(name, v)),
        None => Ok(false),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_backend(value: &str) -> Result<StorageBackend, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "firestore" => Ok(StorageBackend::Firestore),
        "memory" => Ok(StorageBackend::Memory),
        _ => Err(ConfigError::Invalid("STORAGE_BACKEND", value.to_string())),
    }
}

fn validate_period(period: &str) -> Result<(), ConfigError> {
    if VALID_PERIODS.contains(&period) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(
            "FITBIT_DEFAULT_PERIOD",
            period.to_string(),
        ))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
