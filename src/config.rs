//! Configuration module.
//!
//! All settings are loaded from a TOML file (e.g. `config/default.toml`)
//! and parsed with serde.
//!
//! # Example TOML
//! ```toml
//! [api]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [database]
//! url = "sqlite://ebr.db?mode=rwc"
//!
//! [auth]
//! session_ttl_hours = 24
//! cookie_name = "ebr_session"
//!
//! [reports]
//! storage_dir = "storage/pdfs"
//!
//! [cors]
//! allowed_origin = "http://localhost:5173"
//! ```

use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub reports: ReportsConfig,
    pub cors: CorsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Session issuance settings. The cookie is HttpOnly and carries only
/// the opaque session token; everything else lives server-side.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    pub cookie_name: String,
}

/// Where rendered batch-record PDFs are written.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig {
    pub storage_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origin: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
impl Config {
    /// Fixed configuration for tests; the database URL is ignored by
    /// suites that build their own in-memory pool.
    pub fn for_tests() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".into(),
            },
            auth: AuthConfig {
                session_ttl_hours: 24,
                cookie_name: "ebr_session".into(),
            },
            reports: ReportsConfig {
                storage_dir: std::env::temp_dir()
                    .join("ebr-test-reports")
                    .to_string_lossy()
                    .into_owned(),
            },
            cors: CorsConfig {
                allowed_origin: "http://localhost:5173".into(),
            },
        }
    }
}
