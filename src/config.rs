// Configuration loading and parsing (watcher.toml, markers.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::settings::RaffleStatus;

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
    pub watcher: WatcherConfig,
    pub entitlement: EntitlementConfig,
    pub markers: MarkerConfig,
    pub ws_port: u16,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// watcher.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire watcher.toml file.
#[derive(Debug, Clone, Deserialize)]
struct WatcherFile {
    watcher: WatcherConfig,
    websocket: WebsocketSection,
    database: DatabaseSection,
    entitlement: EntitlementConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Minutes between poll-scheduler ticks. Each tick re-examines the
    /// watchlist for stale records; per-raffle cadence comes from the
    /// user-settable `interval` in Settings.
    pub poll_period_minutes: u64,
    /// Lower bound clamped onto `Settings.interval` at the router edge.
    pub min_interval_minutes: u32,
    /// Global cap on simultaneous status probes.
    pub probe_concurrency: usize,
    /// How long the auto-register guard stays held after the driver
    /// fires, so rapid repeat requests coalesce into one.
    pub auto_register_settle_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct WebsocketSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitlementConfig {
    /// When false, every wallet is treated as entitled and no RPC
    /// endpoint is contacted.
    pub enabled: bool,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub contract_address: String,
    /// Token ids whose summed balance must be positive.
    #[serde(default)]
    pub token_ids: Vec<u64>,
}

// ---------------------------------------------------------------------------
// markers.toml structs
// ---------------------------------------------------------------------------

/// The ordered classification table for probe response bodies. The raffle
/// host's wording is uncontrolled, so the markers live in configuration
/// rather than code.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkerConfig {
    /// Checked before the ordered table; its match always wins.
    pub unregistered: MarkerRule,
    /// First match wins, in file order.
    pub markers: Vec<MarkerRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkerRule {
    pub marker: String,
    pub status: RaffleStatus,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/watcher.toml` and
/// `config/markers.toml`, both relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy
/// defaults. Prefer `load_config()` which handles default initialization.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- watcher.toml (required) ---
    let watcher_path = config_dir.join("watcher.toml");
    let watcher_text = read_file(&watcher_path)?;
    let watcher_file: WatcherFile =
        toml::from_str(&watcher_text).map_err(|e| ConfigError::ParseError {
            path: watcher_path.clone(),
            source: e,
        })?;

    // --- markers.toml (required) ---
    let markers_path = config_dir.join("markers.toml");
    let markers_text = read_file(&markers_path)?;
    let markers: MarkerConfig =
        toml::from_str(&markers_text).map_err(|e| ConfigError::ParseError {
            path: markers_path.clone(),
            source: e,
        })?;

    let config = Config {
        watcher: watcher_file.watcher,
        entitlement: watcher_file.entitlement,
        markers,
        ws_port: watcher_file.websocket.port,
        db_path: watcher_file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
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

        // Skip .example template files
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
                // File already exists in config/, skip it
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

/// Convenience wrapper: loads config relative to the current working
/// directory, copying default config files first.
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
    let w = &config.watcher;
    if w.poll_period_minutes == 0 {
        return Err(ConfigError::ValidationError {
            field: "watcher.poll_period_minutes".into(),
            message: "must be greater than 0".into(),
        });
    }
    if w.min_interval_minutes == 0 {
        return Err(ConfigError::ValidationError {
            field: "watcher.min_interval_minutes".into(),
            message: "must be greater than 0".into(),
        });
    }
    if w.probe_concurrency == 0 {
        return Err(ConfigError::ValidationError {
            field: "watcher.probe_concurrency".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.markers.unregistered.marker.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "unregistered.marker".into(),
            message: "must not be empty".into(),
        });
    }
    if config.markers.markers.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "markers".into(),
            message: "at least one marker rule is required".into(),
        });
    }
    for (i, rule) in config.markers.markers.iter().enumerate() {
        if rule.marker.is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("markers[{i}].marker"),
                message: "must not be empty".into(),
            });
        }
    }

    let e = &config.entitlement;
    if e.enabled {
        if e.rpc_url.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "entitlement.rpc_url".into(),
                message: "required when entitlement.enabled = true".into(),
            });
        }
        if e.contract_address.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "entitlement.contract_address".into(),
                message: "required when entitlement.enabled = true".into(),
            });
        }
        if e.token_ids.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "entitlement.token_ids".into(),
                message: "at least one token id is required".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
