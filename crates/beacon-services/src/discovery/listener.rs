//! Announcement listener.
//!
//! Drains every pending datagram from the discovery socket, decodes it and
//! upserts the sender into the peer table. The sender's address is taken
//! from the datagram source, never from the payload.

use std::io;
use std::net::SocketAddr;

use beacon_core::wire::{self, ADDRESSES_KEY};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::peer::PeerTable;

/// Largest possible UDP payload.
pub const MAX_DATAGRAM: usize = 65_535;

/// Read until the socket reports no more pending datagrams.
/// Returns the number of datagrams read.
pub fn drain_inbound(
    socket: &UdpSocket,
    buf: &mut [u8],
    table: &mut PeerTable,
    local_id: &str,
) -> usize {
    let mut count = 0;
    loop {
        match socket.try_recv_from(buf) {
            Ok((len, from)) => {
                count += 1;
                handle_datagram(table, local_id, &buf[..len], from, Instant::now());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            // ICMP port-unreachable from an earlier send surfaces here on some
            // platforms; it says nothing about inbound data.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                break;
            }
        }
    }
    count
}

/// Decode one datagram and record its sender. Returns true if the table
/// was updated.
pub fn handle_datagram(
    table: &mut PeerTable,
    local_id: &str,
    data: &[u8],
    from: SocketAddr,
    now: Instant,
) -> bool {
    let mut decoded = match wire::decode(data) {
        Ok(d) => d,
        Err(e) => {
            tracing::debug!(%from, bytes = data.len(), error = %e, "discarding announcement");
            return false;
        }
    };

    if decoded.id == local_id {
        tracing::trace!("ignoring own announcement");
        return false;
    }

    decoded.attributes.insert(
        ADDRESSES_KEY.to_string(),
        Value::Array(vec![Value::String(from.ip().to_string())]),
    );

    tracing::trace!(peer = %decoded.id, %from, "announcement received");
    table.upsert(&decoded.id, now, decoded.attributes);
    true
}
