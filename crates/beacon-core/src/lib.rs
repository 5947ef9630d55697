//! beacon-core — configuration, settings, identity and wire format.
//! The discovery runtime in beacon-services builds on these.

pub mod config;
pub mod identity;
pub mod settings;
pub mod wire;

pub use identity::{Identity, StaticIdentity};
pub use settings::{Setting, SettingKind, SettingsRegistry};
pub use wire::{Announcement, Attributes};
