//! Beacon integration test harness.
//!
//! Tests run in-process enumerators against real UDP sockets on loopback.
//! Nodes announce to 127.255.255.255, the loopback broadcast address, which
//! the kernel delivers to every socket bound to the destination port. Two
//! nodes sharing a port therefore see each other the way they would on a
//! LAN segment.
//!
//!   cargo test --test integration

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

use beacon_core::settings::{BROADCAST_EXPIRY, BROADCAST_INTERVAL, BROADCAST_PORT};
use beacon_core::{Attributes, SettingsRegistry, StaticIdentity};
use beacon_services::{Enumerator, EnumeratorHandle, FixedTargets, PeerEvent};

mod discovery;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const LOOPBACK_BROADCAST: Ipv4Addr = Ipv4Addr::new(127, 255, 255, 255);

/// Upper bound for anything that should happen "within one tick".
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

/// One in-process discovery node.
pub struct Node {
    pub settings: Arc<SettingsRegistry>,
    pub handle: EnumeratorHandle,
    pub events: UnboundedReceiver<PeerEvent>,
}

/// Start a node. Port 0 lets the OS pick; read it back with [`bound_port`].
pub fn start_node(id: &str, name: &str, interval_ms: i64, expiry_ms: i64, port: u16) -> Node {
    let settings = Arc::new(SettingsRegistry::new());
    settings.set_many([
        (BROADCAST_INTERVAL, interval_ms),
        (BROADCAST_EXPIRY, expiry_ms),
        (BROADCAST_PORT, i64::from(port)),
    ]);

    let (handle, events) = Enumerator::spawn(
        settings.clone(),
        Arc::new(StaticIdentity::new(id, name)),
        Arc::new(FixedTargets(vec![LOOPBACK_BROADCAST])),
    );
    Node {
        settings,
        handle,
        events,
    }
}

/// The port a node ended up bound to.
pub async fn bound_port(node: &Node) -> u16 {
    node.handle
        .local_port()
        .await
        .expect("node should be bound")
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let probe = UdpSocket::bind("0.0.0.0:0").expect("bind probe socket");
    probe.local_addr().expect("probe local addr").port()
}

/// Send one datagram to 127.0.0.1:`port` from a throwaway socket.
pub fn send_raw(port: u16, payload: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").context("bind sender")?;
    socket
        .send_to(payload, (Ipv4Addr::LOCALHOST, port))
        .context("send_to")?;
    Ok(())
}

/// Wait for an update about `id`, skipping unrelated events.
pub async fn next_update_from(
    events: &mut UnboundedReceiver<PeerEvent>,
    id: &str,
    within: Duration,
) -> Option<Attributes> {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(PeerEvent::Updated { id: got, attributes })) if got == id => {
                return Some(attributes)
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Wait for the removal of `id`, skipping unrelated events.
pub async fn next_removal_of(
    events: &mut UnboundedReceiver<PeerEvent>,
    id: &str,
    within: Duration,
) -> bool {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(PeerEvent::Removed { id: got })) if got == id => return true,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return false,
        }
    }
}

/// Poll until the node's bound port equals `want`.
pub async fn wait_for_port(handle: &EnumeratorHandle, want: Option<u16>) -> bool {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        if handle.local_port().await == want {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// The standard announcement payload for `id`.
pub fn announcement(id: &str, name: &str) -> Vec<u8> {
    beacon_core::Announcement::new(id, name)
        .encode()
        .expect("announcement encodes")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The loopback broadcast route the harness relies on is present.
#[test]
fn test_loopback_broadcast_reaches_shared_port() {
    use socket2::{Domain, Protocol, Socket, Type};

    let open = |port: u16| -> Socket {
        let s = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        s.set_reuse_address(true).unwrap();
        s.set_broadcast(true).unwrap();
        s.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        s.bind(&std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
            .unwrap();
        s
    };

    let a: UdpSocket = open(0).into();
    let port = a.local_addr().unwrap().port();
    let b: UdpSocket = open(port).into();

    a.send_to(b"ping", (LOOPBACK_BROADCAST, port)).unwrap();

    let mut buf = [0u8; 16];
    let (n, _) = b.recv_from(&mut buf).expect("b should receive the broadcast");
    assert_eq!(&buf[..n], b"ping");
}
