//! Configuration types for the telemetry storage engine.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;

use crate::schema::TableNames;
use crate::TelemetryError;

// ============================================================================
// Default configuration constants
// ============================================================================

/// Default local database file.
pub const DEFAULT_DATABASE_PATH: &str = "./telemetry-data/telemetry.duckdb";

/// Default number of traces returned by a search without an explicit limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Hard cap on span rows read by a single trace search.
pub const SEARCH_ROW_LIMIT: usize = 10_000;

/// Rows returned by the recent-row listings.
pub const RECENT_ROW_LIMIT: usize = 100;

/// Default catalog alias the lake is attached under.
pub const DEFAULT_LAKE_ALIAS: &str = "telemetry_lake";

/// Default PostgreSQL port for the lake catalog.
pub const DEFAULT_CATALOG_PORT: u16 = 5432;

/// Default S3 region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Telemetry engine configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// Table names for every signal.
    pub tables: TableNames,
    /// Query limits.
    pub query: QueryConfig,
}

impl TelemetryConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. Default values
    /// 2. `telemetry.toml` in current directory
    /// 3. Environment variables prefixed with `TELEMETRY_`
    pub fn load() -> Result<Self, TelemetryError> {
        Self::load_from("telemetry.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &str) -> Result<Self, TelemetryError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TELEMETRY_").split("__"))
            .extract()
            .map_err(|e| TelemetryError::Config(e.to_string()))
    }

    /// In-memory configuration, mostly useful for tests.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::Memory,
            ..Self::default()
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Single-file local DuckDB database.
    Local {
        /// Path to the database file. Its parent directory is created on open.
        path: PathBuf,
    },
    /// DuckLake: catalog in PostgreSQL, data files in S3-compatible storage.
    Lake {
        /// Catalog database connection.
        catalog: CatalogConfig,
        /// Object storage credentials.
        s3: S3Config,
        /// Root URL for data files (e.g. `s3://telemetry/`).
        data_path: String,
        /// Name the lake is attached under.
        #[serde(default = "default_lake_alias")]
        alias: String,
    },
    /// In-memory database (for testing).
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

fn default_lake_alias() -> String {
    DEFAULT_LAKE_ALIAS.to_owned()
}

/// PostgreSQL catalog connection for the lake backend.
#[derive(Debug, Deserialize)]
pub struct CatalogConfig {
    pub host: String,
    #[serde(default = "default_catalog_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: SecretString,
}

fn default_catalog_port() -> u16 {
    DEFAULT_CATALOG_PORT
}

/// S3-compatible object storage credentials for the lake backend.
#[derive(Debug, Deserialize)]
pub struct S3Config {
    pub key_id: String,
    pub secret: SecretString,
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// Custom endpoint (host:port) for S3-compatible services.
    pub endpoint: Option<String>,
    /// Use path-style URLs (required for most self-hosted stores).
    #[serde(default = "default_true")]
    pub path_style: bool,
    #[serde(default)]
    pub use_ssl: bool,
}

fn default_s3_region() -> String {
    DEFAULT_S3_REGION.to_owned()
}

const fn default_true() -> bool {
    true
}

/// Limits applied by the read templates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Traces returned by a search that sets no limit.
    pub default_search_limit: usize,
    /// Maximum span rows one search may read.
    pub search_row_limit: usize,
    /// Rows returned by the recent-row listings.
    pub recent_row_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_search_limit: DEFAULT_SEARCH_LIMIT,
            search_row_limit: SEARCH_ROW_LIMIT,
            recent_row_limit: RECENT_ROW_LIMIT,
        }
    }
}
