//! Peer table — the authoritative set of discovered peers.
//!
//! Owned by the enumerator task. The only mutations are [`PeerTable::upsert`]
//! (one per received announcement) and [`PeerTable::sweep_expired`] (one per
//! expiry tick), and every mutation is reported to the host as a [`PeerEvent`].

use std::collections::HashMap;
use std::time::Duration;

use beacon_core::Attributes;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One discovered peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: String,
    /// When the most recent announcement from this peer arrived.
    pub last_seen: Instant,
    /// Fields the peer announced, plus the observed `addresses`.
    pub attributes: Attributes,
}

/// Raised to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Fired on every announcement, first sighting or refresh alike.
    Updated { id: String, attributes: Attributes },
    /// Fired once when a peer's record expires.
    Removed { id: String },
}

/// Point-in-time copy of a record, handed out to callers outside the task.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub id: String,
    pub attributes: Attributes,
    /// Time since the last announcement.
    pub age: Duration,
}

pub struct PeerTable {
    peers: HashMap<String, PeerRecord>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerTable {
    pub fn new(events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            peers: HashMap::new(),
            events,
        }
    }

    /// Insert or replace the record for `id` and report it as updated.
    ///
    /// Attributes are replaced wholesale. `last_seen` never moves backwards.
    pub fn upsert(&mut self, id: &str, timestamp: Instant, attributes: Attributes) {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.last_seen = record.last_seen.max(timestamp);
                record.attributes = attributes.clone();
            }
            None => {
                tracing::info!(peer = id, "peer discovered");
                self.peers.insert(
                    id.to_string(),
                    PeerRecord {
                        id: id.to_string(),
                        last_seen: timestamp,
                        attributes: attributes.clone(),
                    },
                );
            }
        }

        self.emit(PeerEvent::Updated {
            id: id.to_string(),
            attributes,
        });
    }

    /// Drop every record not refreshed within `expiry` of `now`.
    /// Returns how many were removed.
    pub fn sweep_expired(&mut self, now: Instant, expiry: Duration) -> usize {
        let expired: Vec<String> = self
            .peers
            .values()
            .filter(|r| now.saturating_duration_since(r.last_seen) > expiry)
            .map(|r| r.id.clone())
            .collect();

        for id in &expired {
            self.peers.remove(id);
            tracing::info!(peer = %id, "peer expired");
            self.emit(PeerEvent::Removed { id: id.clone() });
        }

        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), remaining = self.peers.len(), "expiry sweep");
        }
        expired.len()
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<PeerSnapshot> {
        let mut peers: Vec<PeerSnapshot> = self
            .peers
            .values()
            .map(|r| PeerSnapshot {
                id: r.id.clone(),
                attributes: r.attributes.clone(),
                age: now.saturating_duration_since(r.last_seen),
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    fn emit(&self, event: PeerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("peer event dropped, host receiver closed");
        }
    }
}
