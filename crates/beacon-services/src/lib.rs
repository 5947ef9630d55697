//! beacon-services — the LAN discovery runtime.
//!
//! [`Enumerator`] owns the UDP socket, both timers and the [`PeerTable`],
//! and drives them from a single task.

pub mod discovery;
pub mod peer;

pub use discovery::interfaces::{BroadcastTargets, FixedTargets, SystemInterfaces};
pub use discovery::{Enumerator, EnumeratorHandle};
pub use peer::{PeerEvent, PeerRecord, PeerSnapshot, PeerTable};
