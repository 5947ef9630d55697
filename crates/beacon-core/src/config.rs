//! Configuration file for Beacon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BEACON_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/beacon/config.toml
//!   3. ~/.config/beacon/config.toml
//!
//! The file only seeds the [`SettingsRegistry`](crate::settings::SettingsRegistry);
//! the running enumerator reacts to registry changes, not to this struct.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default announcement interval in milliseconds.
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 5_000;
/// Default time without an announcement before a peer is dropped.
pub const DEFAULT_BROADCAST_EXPIRY_MS: u64 = 30_000;
/// Default UDP port, used both to listen and as the broadcast destination.
pub const DEFAULT_BROADCAST_PORT: u16 = 40816;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub identity: IdentityConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Unique id announced to peers. Empty = generate.
    pub uuid: String,
    /// Display name announced to peers. Empty = host name.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub broadcast_interval_ms: u64,
    /// Should exceed the interval of every peer, not enforced.
    pub broadcast_expiry_ms: u64,
    /// 0 = OS-assigned.
    pub broadcast_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            broadcast_expiry_ms: DEFAULT_BROADCAST_EXPIRY_MS,
            broadcast_port: DEFAULT_BROADCAST_PORT,
        }
    }
}

impl IdentityConfig {
    /// Id to announce: configured value, or a fresh v4 uuid.
    pub fn resolved_uuid(&self) -> String {
        if self.uuid.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.uuid.clone()
        }
    }

    /// Name to announce: configured value, else $HOSTNAME, else "beacon".
    pub fn resolved_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "beacon".to_string())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("beacon")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BeaconConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::parse(path, &text)?
        } else {
            BeaconConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse(path: &std::path::Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BEACON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    ///
    /// The written file carries a freshly generated uuid so the node keeps
    /// the same identity across restarts.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let mut config = BeaconConfig::default();
            config.identity.uuid = config.identity.resolved_uuid();
            let text = toml::to_string_pretty(&config).map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply BEACON_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BEACON_IDENTITY__NAME") {
            self.identity.name = v;
        }
        if let Ok(v) = std::env::var("BEACON_DISCOVERY__BROADCAST_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.discovery.broadcast_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("BEACON_DISCOVERY__BROADCAST_EXPIRY_MS") {
            if let Ok(ms) = v.parse() {
                self.discovery.broadcast_expiry_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("BEACON_DISCOVERY__BROADCAST_PORT") {
            if let Ok(p) = v.parse() {
                self.discovery.broadcast_port = p;
            }
        }
    }
}
