//! Configuration management

use regex::Regex;
use serde::{Deserialize, Serialize};
use sirene_common::env::{env_list, env_opt, env_or};
use sirene_common::{Result, SireneError};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/sirene";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Sync Configuration Constants
// ============================================================================

/// Default local directory for archives and extracted files.
pub const DEFAULT_DOWNLOAD_PATH: &str = "./downloads";

/// Default publisher index page.
pub const DEFAULT_INDEX_URL: &str = "http://files.data.gouv.fr/sirene/";

/// Default pattern selecting archive links on the index page.
pub const DEFAULT_ARCHIVE_PATTERN: &str = r"(?i)^sirene_\d+_(L_M|E_Q)\.zip$";

/// Default number of download/extract workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default hours between two update cycles.
pub const DEFAULT_EVERY_X_HOURS: u64 = 3;

/// Default per-archive download deadline in seconds (1 hour).
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

// ============================================================================
// Import Configuration Constants
// ============================================================================

pub const DEFAULT_CSV_DELIMITER: &str = ";";

pub const DEFAULT_DATE_COLUMNS: &[&str] = &["DATEMAJ"];

pub const DEFAULT_STOCK_TABLE: &str = "enterprise";

pub const DEFAULT_UPDATE_TABLE: &str = "enterprise_update";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub import: ImportConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Download and scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub download_path: PathBuf,
    pub index_url: String,
    pub archive_pattern: String,
    pub workers: usize,
    pub every_x_hours: u64,
    pub download_timeout_secs: u64,
    pub show_progress: bool,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.every_x_hours.saturating_mul(3600))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn archive_regex(&self) -> Result<Regex> {
        Regex::new(&self.archive_pattern)
            .map_err(|e| SireneError::config(format!("invalid archive pattern {:?}: {e}", self.archive_pattern)))
    }
}

/// How extracted files are loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub delimiter: String,
    pub date_columns: Vec<String>,
    pub stock_table: String,
    pub update_table: String,
    pub update_sql: Option<String>,
}

impl ImportConfig {
    /// Delimiter as a single byte
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(SireneError::config(format!(
                "CSV delimiter must be a single byte, got {:?}",
                self.delimiter
            ))),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL.to_string())?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS)?,
                connect_timeout_secs: env_or("DATABASE_CONNECT_TIMEOUT", DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS)?,
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS)?,
            },
            sync: SyncConfig {
                download_path: env_or("SIRENE_DOWNLOAD_PATH", PathBuf::from(DEFAULT_DOWNLOAD_PATH))?,
                index_url: env_or("SIRENE_INDEX_URL", DEFAULT_INDEX_URL.to_string())?,
                archive_pattern: env_or("SIRENE_ARCHIVE_PATTERN", DEFAULT_ARCHIVE_PATTERN.to_string())?,
                workers: env_or("SIRENE_WORKERS", DEFAULT_WORKERS)?,
                every_x_hours: env_or("SIRENE_EVERY_X_HOURS", DEFAULT_EVERY_X_HOURS)?,
                download_timeout_secs: env_or("SIRENE_DOWNLOAD_TIMEOUT_SECS", DEFAULT_DOWNLOAD_TIMEOUT_SECS)?,
                show_progress: env_or("SIRENE_PROGRESS", false)?,
            },
            import: ImportConfig {
                // Not trimmed: a tab delimiter must survive
                delimiter: std::env::var("SIRENE_CSV_DELIMITER").unwrap_or_else(|_| DEFAULT_CSV_DELIMITER.to_string()),
                date_columns: env_list("SIRENE_DATE_COLUMNS", DEFAULT_DATE_COLUMNS),
                stock_table: env_or("SIRENE_STOCK_TABLE", DEFAULT_STOCK_TABLE.to_string())?,
                update_table: env_or("SIRENE_UPDATE_TABLE", DEFAULT_UPDATE_TABLE.to_string())?,
                update_sql: env_opt("SIRENE_UPDATE_SQL")?,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(SireneError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(SireneError::config("Database max_connections must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(SireneError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.sync.workers == 0 {
            return Err(SireneError::config("SIRENE_WORKERS must be greater than 0"));
        }

        if self.sync.every_x_hours == 0 {
            return Err(SireneError::config("SIRENE_EVERY_X_HOURS must be greater than 0"));
        }

        if self.sync.every_x_hours.checked_mul(3600).is_none() {
            return Err(SireneError::config(format!(
                "SIRENE_EVERY_X_HOURS ({}) is too large",
                self.sync.every_x_hours
            )));
        }

        if self.sync.download_timeout_secs == 0 {
            return Err(SireneError::config("SIRENE_DOWNLOAD_TIMEOUT_SECS must be greater than 0"));
        }

        if self.sync.download_path.as_os_str().is_empty() {
            return Err(SireneError::config("SIRENE_DOWNLOAD_PATH cannot be empty"));
        }

        self.sync.archive_regex()?;
        self.import.delimiter_byte()?;

        if self.import.stock_table.trim().is_empty() || self.import.update_table.trim().is_empty() {
            return Err(SireneError::config("Import table names cannot be empty"));
        }

        if self.import.date_columns.is_empty() {
            tracing::warn!("No date columns configured - every value is loaded as text");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            sync: SyncConfig {
                download_path: PathBuf::from(DEFAULT_DOWNLOAD_PATH),
                index_url: DEFAULT_INDEX_URL.to_string(),
                archive_pattern: DEFAULT_ARCHIVE_PATTERN.to_string(),
                workers: DEFAULT_WORKERS,
                every_x_hours: DEFAULT_EVERY_X_HOURS,
                download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
                show_progress: false,
            },
            import: ImportConfig {
                delimiter: DEFAULT_CSV_DELIMITER.to_string(),
                date_columns: DEFAULT_DATE_COLUMNS.iter().map(|s| s.to_string()).collect(),
                stock_table: DEFAULT_STOCK_TABLE.to_string(),
                update_table: DEFAULT_UPDATE_TABLE.to_string(),
                update_sql: None,
            },
        }
    }
}
