//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default upload size limit: 50MB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Full service configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub printer: PrinterConfig,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Print scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before the first tick after startup.
    pub initial_delay: Duration,
    /// Delay between the end of one tick and the start of the next.
    pub tick_interval: Duration,
    /// How long retired jobs stay queryable. Zero keeps them forever.
    pub retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            tick_interval: Duration::from_secs(2),
            retention: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Upload storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("temp/print_files"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Spooler submission configuration.
#[derive(Debug, Clone)]
pub struct PrinterConfig {
    pub submit_timeout: Duration,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Build config from `WEB_PRINT_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let server = ServerConfig {
            bind: lookup("WEB_PRINT_BIND").unwrap_or(defaults.server.bind),
            port: parse_var(&lookup, "WEB_PRINT_PORT")?.unwrap_or(defaults.server.port),
        };

        let scheduler = SchedulerConfig {
            initial_delay: parse_var(&lookup, "WEB_PRINT_INITIAL_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.scheduler.initial_delay),
            tick_interval: parse_var(&lookup, "WEB_PRINT_TICK_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.scheduler.tick_interval),
            retention: parse_var(&lookup, "WEB_PRINT_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.scheduler.retention),
        };

        if scheduler.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "WEB_PRINT_TICK_INTERVAL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let storage = StorageConfig {
            upload_dir: lookup("WEB_PRINT_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.upload_dir),
            max_file_size: match parse_var::<u64, _>(&lookup, "WEB_PRINT_MAX_FILE_MB")? {
                None => defaults.storage.max_file_size,
                Some(mb) => mb.checked_mul(1024 * 1024).ok_or_else(|| ConfigError::InvalidValue {
                    key: "WEB_PRINT_MAX_FILE_MB".to_string(),
                    message: format!("{mb} MB does not fit in a byte count"),
                })?,
            },
        };

        let printer = PrinterConfig {
            submit_timeout: parse_var(&lookup, "WEB_PRINT_PRINT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.printer.submit_timeout),
        };

        Ok(Self {
            server,
            scheduler,
            storage,
            printer,
            log_dir: lookup("WEB_PRINT_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
