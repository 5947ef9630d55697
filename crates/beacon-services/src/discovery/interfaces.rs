//! Broadcast destinations.
//!
//! The set is recomputed on every announcement so interfaces that come and
//! go (DHCP renewals, Wi-Fi toggling) are picked up without a restart.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

/// Source of the IPv4 broadcast addresses an announcement is sent to.
pub trait BroadcastTargets: Send + Sync {
    /// Current destinations, deduplicated.
    fn broadcast_addresses(&self) -> Result<BTreeSet<Ipv4Addr>>;
}

/// Every broadcast address of every broadcast-capable local interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl BroadcastTargets for SystemInterfaces {
    fn broadcast_addresses(&self) -> Result<BTreeSet<Ipv4Addr>> {
        let mut addresses = BTreeSet::new();
        for ifaddr in getifaddrs().context("getifaddrs()")? {
            if !ifaddr.flags.contains(InterfaceFlags::IFF_BROADCAST) {
                continue;
            }
            // Several interfaces may share a subnet; the set collapses them.
            if let Some(sin) = ifaddr.broadcast.as_ref().and_then(|b| b.as_sockaddr_in()) {
                let addr = *SocketAddrV4::from(*sin).ip();
                if !addr.is_unspecified() {
                    tracing::trace!(interface = %ifaddr.interface_name, %addr, "broadcast address");
                    addresses.insert(addr);
                }
            }
        }
        Ok(addresses)
    }
}

/// A fixed destination list, for static deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedTargets(pub Vec<Ipv4Addr>);

impl BroadcastTargets for FixedTargets {
    fn broadcast_addresses(&self) -> Result<BTreeSet<Ipv4Addr>> {
        Ok(self.0.iter().copied().collect())
    }
}
