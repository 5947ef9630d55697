//! Announcement broadcast.
//!
//! Sends this node's `{uuid, name}` announcement to every broadcast
//! address, one datagram each. The destination port is the socket's own
//! local port: peers listen and announce on the same port.

use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use beacon_core::{Announcement, Identity};

/// Something datagrams can be written to without blocking.
pub trait DatagramSink {
    fn local_port(&self) -> io::Result<u16>;
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for tokio::net::UdpSocket {
    fn local_port(&self) -> io::Result<u16> {
        Ok(self.local_addr()?.port())
    }

    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.try_send_to(payload, dest)
    }
}

impl DatagramSink for std::net::UdpSocket {
    fn local_port(&self) -> io::Result<u16> {
        Ok(self.local_addr()?.port())
    }

    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, dest)
    }
}

/// Outcome of one broadcast round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Build the payload for the current identity.
pub fn announcement_payload(identity: &dyn Identity) -> Result<Vec<u8>, beacon_core::wire::WireError> {
    Announcement::new(identity.local_id(), identity.local_name()).encode()
}

/// Send `payload` once to each address.
///
/// A failed send is logged and skipped; the remaining addresses still get
/// their datagram.
pub fn send_announcement<S: DatagramSink + ?Sized>(
    sink: &S,
    addresses: &BTreeSet<Ipv4Addr>,
    payload: &[u8],
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    let port = match sink.local_port() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "broadcast socket has no local port");
            report.failed = addresses.len();
            return report;
        }
    };

    for addr in addresses {
        let dest = SocketAddr::V4(SocketAddrV4::new(*addr, port));
        match sink.send_datagram(payload, dest) {
            Ok(n) => {
                tracing::trace!(%dest, bytes = n, "broadcast sent");
                report.sent += 1;
            }
            Err(e) => {
                tracing::warn!(%dest, error = %e, "broadcast send failed");
                report.failed += 1;
            }
        }
    }
    report
}
