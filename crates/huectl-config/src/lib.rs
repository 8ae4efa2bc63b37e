//! Configuration for the huectl binary.
//!
//! TOML settings merged with `HUECTL_*` environment variables, platform
//! paths, translation to `huectl_core::BridgeConfig`, and [`FileStorage`],
//! the on-disk home of the pairing state.

mod storage;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use huectl_api::discovery::{DISCOVERY_ENDPOINT, DiscoveryConfig};
use huectl_api::trust::RootCa;
use huectl_core::{BridgeConfig, DEFAULT_DEVICETYPE, QueueLimits, TransportConfig};

pub use storage::{APPLICATION_KEY_ENV, FileStorage, KEY_STORE_ENV, KeyStore};

/// Overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "HUECTL_CONFIG_DIR";
/// Overrides the data directory holding `bridge.toml`.
pub const DATA_DIR_ENV: &str = "HUECTL_DATA_DIR";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize pairing state: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for huectl_core::CoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { .. } | ConfigError::Figment(_) => Self::Config {
                message: err.to_string(),
            },
            _ => Self::Storage {
                message: err.to_string(),
            },
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `config.toml`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub bridge: BridgeSection,

    #[serde(default)]
    pub discovery: DiscoverySection,

    /// Command budgets per resource class.
    #[serde(default)]
    pub limits: QueueLimits,
}

/// Presentation defaults for the CLI.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// How to talk to the bridge.
#[derive(Debug, Deserialize, Serialize)]
pub struct BridgeSection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// PEM file replacing the bundled Hue root CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ca: Option<PathBuf>,

    /// Follow the event stream in long-running commands.
    #[serde(default = "default_true")]
    pub event_stream: bool,

    /// `devicetype` sent when linking (`app#instance`).
    #[serde(default = "default_devicetype")]
    pub devicetype: String,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            root_ca: None,
            event_stream: true,
            devicetype: default_devicetype(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_devicetype() -> String {
    DEFAULT_DEVICETYPE.into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DiscoverySection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_true")]
    pub ssdp: bool,

    #[serde(default = "default_ssdp_timeout_ms")]
    pub ssdp_timeout_ms: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            ssdp: true,
            ssdp_timeout_ms: default_ssdp_timeout_ms(),
        }
    }
}

fn default_endpoint() -> String {
    DISCOVERY_ENDPOINT.into()
}
fn default_ssdp_timeout_ms() -> u64 {
    3000
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "huectl", "huectl")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Directory holding `config.toml`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return dir.into();
    }
    project_dirs().map_or_else(
        || home_fallback(&[".config", "huectl"]),
        |dirs| dirs.config_dir().to_path_buf(),
    )
}

/// Directory holding `bridge.toml`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return dir.into();
    }
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "huectl"]),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn bridge_state_path() -> PathBuf {
    data_dir().join("bridge.toml")
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load `config.toml` from the platform location plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load `path` (missing is fine) merged with `HUECTL_*` variables.
///
/// Nested keys use a double underscore:
/// `HUECTL_BRIDGE__REQUEST_TIMEOUT_MS=20000`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HUECTL_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, limit) in [("limits.light", self.limits.light), ("limits.group", self.limits.group)] {
            if limit.max_requests == 0 || limit.per.is_zero() {
                return Err(ConfigError::Validation {
                    field: field.into(),
                    reason: "max_requests and per must both be positive".into(),
                });
            }
        }
        if !self.bridge.devicetype.contains('#') {
            return Err(ConfigError::Validation {
                field: "bridge.devicetype".into(),
                reason: format!("expected 'app#instance', got '{}'", self.bridge.devicetype),
            });
        }
        Ok(())
    }

    /// Runtime configuration for `huectl_core`.
    pub fn bridge_config(&self) -> BridgeConfig {
        let root_ca = self
            .bridge
            .root_ca
            .clone()
            .map_or(RootCa::Bundled, RootCa::File);
        BridgeConfig {
            transport: TransportConfig {
                root_ca,
                connect_timeout: Duration::from_millis(self.bridge.connect_timeout_ms),
                request_timeout: Duration::from_millis(self.bridge.request_timeout_ms),
                ..TransportConfig::default()
            },
            discovery: DiscoveryConfig {
                endpoint: self.discovery.endpoint.clone(),
                ssdp_timeout: Duration::from_millis(self.discovery.ssdp_timeout_ms),
                ssdp_enabled: self.discovery.ssdp,
            },
            limits: self.limits,
            devicetype: self.bridge.devicetype.clone(),
            event_stream: self.bridge.event_stream,
        }
    }
}
