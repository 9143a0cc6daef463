//! Configuration for the Bloom Store
//!
//! Defines configuration structs for the bloom block store, loadable from
//! TOML, plus schema period resolution for index table names.

use crate::bloomshipper::model::Time;
use crate::bloomshipper::object_store::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of concurrent object store requests per batch
pub const DEFAULT_WORKERS: usize = 16;

// TigerStyle: Explicit limits with _MAX suffix
const WORKERS_MAX: usize = 1024;

/// Error type for configuration
#[derive(Debug)]
pub enum ConfigError {
    /// No schema period covers the timestamp
    PeriodNotFound(Time),
    /// Configuration values are inconsistent
    Invalid(String),
    /// TOML parse error
    Toml(toml::de::Error),
    /// I/O error reading a config file or building a store
    Io(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PeriodNotFound(ts) => write!(f, "can not find period for timestamp {}", ts),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::Toml(e) => write!(f, "TOML error: {}", e),
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Main configuration for the bloom store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomStoreConfig {
    /// Local directory blocks are extracted into
    pub working_directory: PathBuf,
    /// Maximum concurrent object store requests per batch
    pub workers: usize,
    /// Object store type
    pub store_type: ObjectStoreType,
    /// Local filesystem path (for LocalFs store)
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    #[cfg(feature = "s3")]
    pub s3: Option<S3Config>,
    /// Schema periods, oldest first
    pub periods: Vec<PeriodConfig>,
    /// Log output settings
    pub logging: LoggingConfig,
}

impl Default for BloomStoreConfig {
    fn default() -> Self {
        BloomStoreConfig {
            working_directory: std::env::temp_dir().join("bloom-shipper"),
            workers: DEFAULT_WORKERS,
            store_type: ObjectStoreType::InMemory,
            local_path: None,
            #[cfg(feature = "s3")]
            s3: None,
            periods: vec![PeriodConfig::default()],
            logging: LoggingConfig::default(),
        }
    }
}

impl BloomStoreConfig {
    /// Create config for local development
    pub fn local(store_path: PathBuf, working_directory: PathBuf) -> Self {
        BloomStoreConfig {
            working_directory,
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(store_path),
            ..Self::default()
        }
    }

    /// Create config for testing (in-memory)
    pub fn test(working_directory: PathBuf) -> Self {
        BloomStoreConfig {
            working_directory,
            workers: 4,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: BloomStoreConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > WORKERS_MAX {
            return Err(ConfigError::Invalid(format!(
                "workers must be in 1..={}, got {}",
                WORKERS_MAX, self.workers
            )));
        }
        if self.working_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "working_directory must not be empty".to_string(),
            ));
        }
        if self.store_type == ObjectStoreType::LocalFs && self.local_path.is_none() {
            return Err(ConfigError::Invalid(
                "local_path is required for the LocalFs store".to_string(),
            ));
        }
        #[cfg(feature = "s3")]
        if self.store_type == ObjectStoreType::S3 && self.s3.is_none() {
            return Err(ConfigError::Invalid(
                "s3 section is required for the S3 store".to_string(),
            ));
        }
        if self.periods.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one schema period is required".to_string(),
            ));
        }
        if !self.periods.windows(2).all(|w| w[0].from.0.before(w[1].from.0)) {
            return Err(ConfigError::Invalid(
                "schema periods must be sorted by start".to_string(),
            ));
        }
        Ok(())
    }
}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

/// S3 configuration
#[cfg(feature = "s3")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Key prefix within bucket
    pub prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Start of a schema period, truncated to a day boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayTime(pub Time);

impl DayTime {
    pub fn from_day(day: i64) -> Self {
        DayTime(Time(day * crate::bloomshipper::model::MILLIS_PER_DAY))
    }
}

/// One schema period of the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// First day the period applies to
    pub from: DayTime,
    /// Prefix of the daily index tables
    pub index_prefix: String,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        PeriodConfig {
            from: DayTime::default(),
            index_prefix: "index_".to_string(),
        }
    }
}

impl PeriodConfig {
    /// Daily table holding `ts`
    pub fn table_name(&self, ts: Time) -> String {
        format!("{}{}", self.index_prefix, ts.day())
    }
}

fn period_for(configs: &[PeriodConfig], ts: Time) -> Result<&PeriodConfig, ConfigError> {
    configs
        .iter()
        .rev()
        .find(|period| !period.from.0.after(ts))
        .ok_or(ConfigError::PeriodNotFound(ts))
}

/// Find the start of the period covering `ts`: the latest period whose start
/// is not after `ts`
pub fn find_period(configs: &[PeriodConfig], ts: Time) -> Result<DayTime, ConfigError> {
    period_for(configs, ts).map(|period| period.from)
}

/// Resolve the index table holding `ts`
pub fn table_for(configs: &[PeriodConfig], ts: Time) -> Result<String, ConfigError> {
    period_for(configs, ts).map(|period| period.table_name(ts))
}

/// Construct the configured object store backend
pub async fn build_object_store(
    config: &BloomStoreConfig,
) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    config.validate()?;

    match config.store_type {
        ObjectStoreType::InMemory => Ok(Arc::new(InMemoryObjectStore::new())),
        ObjectStoreType::LocalFs => {
            let path = config.local_path.clone().ok_or_else(|| {
                ConfigError::Invalid("local_path is required for the LocalFs store".to_string())
            })?;
            std::fs::create_dir_all(&path)?;
            Ok(Arc::new(LocalFsObjectStore::new(path)))
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => {
            let s3 = config.s3.clone().ok_or_else(|| {
                ConfigError::Invalid("s3 section is required for the S3 store".to_string())
            })?;
            let store = crate::bloomshipper::s3_store::S3ObjectStore::new(s3).await?;
            Ok(Arc::new(store))
        }
    }
}
