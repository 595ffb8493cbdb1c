//! Configuration module.
//!
//! All configuration is loaded from environment variables with sensible defaults.
//! The backend binary reads the server half; sync clients read the local store
//! path, the remote URL and the sync tuning knobs.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to the backend SQLite database file
    pub db_path: PathBuf,
    /// Path to the on-device SQLite store used while offline
    pub local_db_path: PathBuf,
    /// Base URL of the remote backend
    pub remote_url: String,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Maximum in-flight remote round trips during a harvest
    pub sync_concurrency: usize,
    /// Timeout applied to every remote request
    pub request_timeout: Duration,
    /// Window in which edits to the same record are coalesced
    pub debounce_window: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("FOCUSFLOW_API_PSK")
            .ok()
            .filter(|psk| !psk.is_empty());

        let db_path = env::var("FOCUSFLOW_DB_PATH")
            .unwrap_or_else(|_| "./data/remote.sqlite".to_string())
            .into();

        let local_db_path = env::var("FOCUSFLOW_LOCAL_DB_PATH")
            .unwrap_or_else(|_| "./data/local.sqlite".to_string())
            .into();

        let remote_url = env::var("FOCUSFLOW_REMOTE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let bind_addr = parse_var("FOCUSFLOW_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("FOCUSFLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let sync_concurrency: usize = parse_var("FOCUSFLOW_SYNC_CONCURRENCY", "4")?;
        if sync_concurrency == 0 {
            return Err(AppError::Configuration(
                "FOCUSFLOW_SYNC_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let request_timeout = Duration::from_secs(parse_var("FOCUSFLOW_REQUEST_TIMEOUT_SECS", "15")?);
        let debounce_window = Duration::from_millis(parse_var("FOCUSFLOW_DEBOUNCE_MS", "400")?);

        Ok(Self {
            api_psk,
            db_path,
            local_db_path,
            remote_url,
            bind_addr,
            log_level,
            sync_concurrency,
            request_timeout,
            debounce_window,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| AppError::Configuration(format!("Invalid {} value: {}", name, raw)))
}
