//! Settings registry — live key/value tunables with change notification.
//!
//! Components register the settings they understand with [`SettingsRegistry::add`]
//! and read them with [`SettingsRegistry::get_int`]. Writers update values with
//! [`SettingsRegistry::set_int`] or [`SettingsRegistry::set_many`]; every write
//! that actually changes something publishes one notification carrying the
//! set of changed keys. Values may be stored before a setting is registered.

use std::collections::BTreeSet;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::DiscoveryConfig;

/// Announcement interval in milliseconds.
pub const BROADCAST_INTERVAL: &str = "BroadcastInterval";
/// Peer expiry in milliseconds.
pub const BROADCAST_EXPIRY: &str = "BroadcastExpiry";
/// UDP discovery port.
pub const BROADCAST_PORT: &str = "BroadcastPort";

/// Keys changed by one write, sorted.
pub type ChangedKeys = BTreeSet<String>;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Integer,
}

/// Descriptor for a registered setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub kind: SettingKind,
    pub name: String,
    /// Human-readable label for settings UIs.
    pub title: String,
    pub default: i64,
}

impl Setting {
    pub fn integer(name: impl Into<String>, title: impl Into<String>, default: i64) -> Self {
        Self {
            kind: SettingKind::Integer,
            name: name.into(),
            title: title.into(),
            default,
        }
    }
}

pub struct SettingsRegistry {
    descriptors: DashMap<String, Setting>,
    values: DashMap<String, i64>,
    changes: broadcast::Sender<ChangedKeys>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            descriptors: DashMap::new(),
            values: DashMap::new(),
            changes,
        }
    }

    /// Registry seeded with the discovery tunables from a config file.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        let registry = Self::new();
        registry.apply_config(config);
        registry
    }

    /// Register a setting descriptor, replacing any with the same name.
    pub fn add(&self, setting: Setting) {
        tracing::debug!(setting = %setting.name, default = setting.default, "setting registered");
        self.descriptors.insert(setting.name.clone(), setting);
    }

    /// Unregister a setting. Its stored value, if any, is kept.
    pub fn remove(&self, name: &str) {
        if self.descriptors.remove(name).is_some() {
            tracing::debug!(setting = name, "setting removed");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Current value: the stored one, else the registered default.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        if let Some(v) = self.values.get(key) {
            return Some(*v);
        }
        self.descriptors.get(key).map(|s| s.default)
    }

    /// Store one value. Returns true if it changed.
    pub fn set_int(&self, key: &str, value: i64) -> bool {
        !self.set_many([(key, value)]).is_empty()
    }

    /// Store several values and publish a single notification for the
    /// ones that changed. Returns the changed keys.
    pub fn set_many<'a, I>(&self, entries: I) -> ChangedKeys
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut changed = ChangedKeys::new();
        for (key, value) in entries {
            let previous = self.get_int(key);
            self.values.insert(key.to_string(), value);
            if previous != Some(value) {
                changed.insert(key.to_string());
            }
        }

        if !changed.is_empty() {
            tracing::debug!(keys = ?changed, "settings changed");
            // No receivers is fine, nobody is listening yet.
            let _ = self.changes.send(changed.clone());
        }
        changed
    }

    /// Push the discovery section of a config file as one batch.
    pub fn apply_config(&self, config: &DiscoveryConfig) -> ChangedKeys {
        self.set_many([
            (BROADCAST_INTERVAL, clamp_i64(config.broadcast_interval_ms)),
            (BROADCAST_EXPIRY, clamp_i64(config.broadcast_expiry_ms)),
            (BROADCAST_PORT, i64::from(config.broadcast_port)),
        ])
    }

    /// Receive future change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangedKeys> {
        self.changes.subscribe()
    }
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
