// Configuration loading and parsing (config/tracker.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub fetch_timeout: Duration,
    pub max_concurrent: usize,
    pub refresh_interval: Duration,
    pub ws_port: u16,
    pub keepalive: Duration,
    pub db_path: String,
    pub holdings: Vec<String>,
    pub watchlist: Vec<String>,
}

// ---------------------------------------------------------------------------
// tracker.toml structs
// ---------------------------------------------------------------------------

/// Deserialization target for the whole tracker.toml file.
#[derive(Debug, Clone, Deserialize)]
struct TrackerFile {
    endpoints: EndpointsConfig,
    #[serde(default)]
    fetch: FetchSection,
    #[serde(default)]
    refresh: RefreshSection,
    ws: WsSection,
    database: DatabaseSection,
    #[serde(default)]
    portfolio: PortfolioSection,
}

/// Upstream base URLs, split per source so tests and deployments can point
/// individual sources elsewhere.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    pub realtime_base: String,
    pub estimate_base: String,
    pub confirmed_base: String,
    pub search_base: String,
    pub detail_base: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FetchSection {
    timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RefreshSection {
    max_concurrent: usize,
    interval_secs: u64,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            max_concurrent: crate::refresh::DEFAULT_MAX_CONCURRENT,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WsSection {
    port: u16,
    #[serde(default = "default_keepalive_secs")]
    keepalive_secs: u64,
}

fn default_keepalive_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PortfolioSection {
    #[serde(default)]
    holdings: Vec<String>,
    #[serde(default)]
    watchlist: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/tracker.toml` relative to
/// the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy
/// defaults. Prefer `load_config()` which handles default initialization.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("tracker.toml");
    let text = read_file(&path)?;
    let file: TrackerFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        endpoints: file.endpoints,
        fetch_timeout: Duration::from_secs(file.fetch.timeout_secs),
        max_concurrent: file.refresh.max_concurrent,
        refresh_interval: Duration::from_secs(file.refresh.interval_secs),
        ws_port: file.ws.port,
        keepalive: Duration::from_secs(file.ws.keepalive_secs),
        db_path: file.database.path,
        holdings: file.portfolio.holdings,
        watchlist: file.portfolio.watchlist,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure the config file exists by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, keep it.
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: copies default config files into place, then loads
/// config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let endpoint_fields: &[(&str, &str)] = &[
        ("endpoints.realtime_base", &config.endpoints.realtime_base),
        ("endpoints.estimate_base", &config.endpoints.estimate_base),
        ("endpoints.confirmed_base", &config.endpoints.confirmed_base),
        ("endpoints.search_base", &config.endpoints.search_base),
        ("endpoints.detail_base", &config.endpoints.detail_base),
    ];
    for (name, val) in endpoint_fields {
        if val.is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
        if val.ends_with('/') {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not end with `/` (paths are appended)".into(),
            });
        }
    }

    let timeout = config.fetch_timeout.as_secs();
    if !(1..=30).contains(&timeout) {
        return Err(ConfigError::ValidationError {
            field: "fetch.timeout_secs".into(),
            message: format!("must be between 1 and 30 seconds, got {timeout}"),
        });
    }

    if config.max_concurrent == 0 {
        return Err(ConfigError::ValidationError {
            field: "refresh.max_concurrent".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.refresh_interval.is_zero() {
        return Err(ConfigError::ValidationError {
            field: "refresh.interval_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.ws_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "ws.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.keepalive.is_zero() {
        return Err(ConfigError::ValidationError {
            field: "ws.keepalive_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.db_path.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
