//! Local identity announced to peers.

use crate::config::IdentityConfig;

/// Supplies this node's id and display name.
///
/// Read on every announcement, so an implementation may change its answers
/// at runtime (e.g. a renamed device).
pub trait Identity: Send + Sync {
    fn local_id(&self) -> String;
    fn local_name(&self) -> String;
}

/// Fixed identity, usually resolved once from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    pub id: String,
    pub name: String,
}

impl StaticIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(config.resolved_uuid(), config.resolved_name())
    }
}

impl Identity for StaticIdentity {
    fn local_id(&self) -> String {
        self.id.clone()
    }

    fn local_name(&self) -> String {
        self.name.clone()
    }
}
