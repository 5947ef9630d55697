//! LAN discovery — announce this node and track peers announcing themselves.
//!
//! One [`Enumerator`] task owns the UDP socket, the broadcast and expiry
//! timers and the [`PeerTable`]. It reacts to four event sources in turn:
//!
//! - broadcast tick: send the announcement to every broadcast address
//! - expiry tick: drop peers not heard from within the expiry window
//! - socket readable: drain and record inbound announcements
//! - settings change: rebind / retime without a restart
//!
//! Each event runs to completion before the next is polled, so the table
//! and the socket need no locking.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use beacon_core::config::{
    DEFAULT_BROADCAST_EXPIRY_MS, DEFAULT_BROADCAST_INTERVAL_MS, DEFAULT_BROADCAST_PORT,
};
use beacon_core::settings::{ChangedKeys, BROADCAST_EXPIRY, BROADCAST_INTERVAL, BROADCAST_PORT};
use beacon_core::{Identity, Setting, SettingsRegistry};

use crate::peer::{PeerEvent, PeerSnapshot, PeerTable};

pub mod broadcast;
pub mod interfaces;
pub mod listener;

use interfaces::BroadcastTargets;

/// Tag attached to errors reported by the discovery subsystem.
pub const MESSAGE_TAG: &str = "broadcast";

enum Command {
    BroadcastNow,
    Peers(oneshot::Sender<Vec<PeerSnapshot>>),
    LocalPort(oneshot::Sender<Option<u16>>),
}

/// Control surface for a running [`Enumerator`].
///
/// Dropping the handle stops the task.
pub struct EnumeratorHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl EnumeratorHandle {
    /// Announce now instead of waiting for the next tick.
    pub fn broadcast_now(&self) {
        let _ = self.commands.send(Command::BroadcastNow);
    }

    /// Current peer table, sorted by id.
    pub async fn peers(&self) -> Vec<PeerSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Peers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Port the discovery socket is bound to, `None` while unbound.
    pub async fn local_port(&self) -> Option<u16> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::LocalPort(tx)).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Stop the task and wait for it to unregister its settings.
    pub async fn shutdown(self) {
        let Self { commands, task } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "enumerator task did not exit cleanly");
        }
    }
}

pub struct Enumerator {
    settings: Arc<SettingsRegistry>,
    identity: Arc<dyn Identity>,
    targets: Arc<dyn BroadcastTargets>,

    socket: Option<UdpSocket>,
    /// Last port a bind was attempted on.
    port: Option<u16>,
    buf: Vec<u8>,

    table: PeerTable,

    broadcast_interval: Duration,
    broadcast_timer: Interval,
    expiry: Duration,
    expiry_timer: Interval,
}

impl Enumerator {
    /// Register the discovery settings, bind the socket and start the task.
    ///
    /// Must be called from within a tokio runtime. Peer events are delivered
    /// on the returned receiver.
    pub fn spawn(
        settings: Arc<SettingsRegistry>,
        identity: Arc<dyn Identity>,
        targets: Arc<dyn BroadcastTargets>,
    ) -> (EnumeratorHandle, mpsc::UnboundedReceiver<PeerEvent>) {
        settings.add(Setting::integer(
            BROADCAST_INTERVAL,
            "Broadcast Interval",
            DEFAULT_BROADCAST_INTERVAL_MS as i64,
        ));
        settings.add(Setting::integer(
            BROADCAST_EXPIRY,
            "Broadcast Expiry",
            DEFAULT_BROADCAST_EXPIRY_MS as i64,
        ));
        settings.add(Setting::integer(
            BROADCAST_PORT,
            "Broadcast Port",
            i64::from(DEFAULT_BROADCAST_PORT),
        ));

        // Subscribe before the first read so no change falls in between.
        let changes = settings.subscribe();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let broadcast_interval = Duration::from_millis(DEFAULT_BROADCAST_INTERVAL_MS);
        let expiry = Duration::from_millis(DEFAULT_BROADCAST_EXPIRY_MS);
        let enumerator = Self {
            settings,
            identity,
            targets,
            socket: None,
            port: None,
            buf: vec![0u8; listener::MAX_DATAGRAM],
            table: PeerTable::new(events_tx),
            broadcast_interval,
            broadcast_timer: restart_timer(broadcast_interval),
            expiry,
            expiry_timer: restart_timer(expiry),
        };

        let task = tokio::spawn(enumerator.run(changes, commands_rx));
        (
            EnumeratorHandle {
                commands: commands_tx,
                task,
            },
            events_rx,
        )
    }

    async fn run(
        mut self,
        mut changes: tokio::sync::broadcast::Receiver<ChangedKeys>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        self.apply_settings(&all_keys(), true);

        loop {
            tokio::select! {
                _ = self.broadcast_timer.tick() => self.broadcast_now(),
                _ = self.expiry_timer.tick() => self.sweep(),
                ready = readable(&self.socket) => match ready {
                    Ok(()) => self.drain_inbound(),
                    Err(e) => tracing::warn!(error = %e, "discovery socket poll failed"),
                },
                changed = changes.recv() => match changed {
                    Ok(keys) => self.apply_settings(&keys, false),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "settings notifications lagged, reloading all");
                        self.apply_settings(&all_keys(), false);
                    }
                    Err(RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.settings.remove(BROADCAST_INTERVAL);
        self.settings.remove(BROADCAST_EXPIRY);
        self.settings.remove(BROADCAST_PORT);
        tracing::info!("discovery stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::BroadcastNow => self.broadcast_now(),
            Command::Peers(reply) => {
                let _ = reply.send(self.table.snapshot(Instant::now()));
            }
            Command::LocalPort(reply) => {
                let port = self
                    .socket
                    .as_ref()
                    .and_then(|s| s.local_addr().ok())
                    .map(|a| a.port());
                let _ = reply.send(port);
            }
        }
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    /// React to changed keys. Each key is handled on its own; a value equal
    /// to the one in effect is ignored unless `force` is set.
    ///
    /// Port first, so the interval's immediate broadcast goes out on the
    /// new socket.
    fn apply_settings(&mut self, keys: &ChangedKeys, force: bool) {
        if keys.contains(BROADCAST_PORT) {
            if let Some(port) = self.read_port() {
                if force || self.port != Some(port) || self.socket.is_none() {
                    self.rebind(port);
                }
            }
        }

        if keys.contains(BROADCAST_INTERVAL) {
            if let Some(interval) = self.read_millis(BROADCAST_INTERVAL) {
                if force || interval != self.broadcast_interval {
                    self.broadcast_interval = interval;
                    self.broadcast_now();
                    self.broadcast_timer = restart_timer(interval);
                    tracing::debug!(interval_ms = interval.as_millis() as u64, "interval set");
                }
            }
        }

        if keys.contains(BROADCAST_EXPIRY) {
            if let Some(expiry) = self.read_millis(BROADCAST_EXPIRY) {
                if force || expiry != self.expiry {
                    self.expiry = expiry;
                    self.sweep();
                    self.expiry_timer = restart_timer(expiry);
                    tracing::debug!(expiry_ms = expiry.as_millis() as u64, "expiry set");
                }
            }
        }
    }

    fn read_millis(&self, key: &str) -> Option<Duration> {
        match self.settings.get_int(key) {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            Some(ms) => {
                tracing::error!(
                    tag = MESSAGE_TAG,
                    setting = key,
                    value = ms,
                    "setting must be positive, keeping previous value"
                );
                None
            }
            None => None,
        }
    }

    fn read_port(&self) -> Option<u16> {
        let value = self.settings.get_int(BROADCAST_PORT)?;
        match u16::try_from(value) {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::error!(
                    tag = MESSAGE_TAG,
                    value,
                    "broadcast port out of range, keeping previous socket"
                );
                None
            }
        }
    }

    /// Close the current socket and bind a new one. On failure the
    /// enumerator stays unbound until the next successful reconfiguration.
    fn rebind(&mut self, port: u16) {
        self.socket = None;
        self.port = Some(port);

        match bind_socket(port) {
            Ok(socket) => {
                let bound = socket.local_addr().map(|a| a.port()).unwrap_or(port);
                tracing::info!(port = bound, "discovery socket bound");
                self.socket = Some(socket);
            }
            Err(e) => {
                tracing::error!(tag = MESSAGE_TAG, port, error = ?e, "failed to bind discovery socket");
            }
        }
    }

    // ── Events ────────────────────────────────────────────────────────────────

    fn broadcast_now(&self) {
        let Some(socket) = &self.socket else {
            tracing::debug!("no discovery socket, skipping broadcast");
            return;
        };

        let addresses: BTreeSet<Ipv4Addr> = match self.targets.broadcast_addresses() {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = ?e, "failed to enumerate broadcast addresses");
                return;
            }
        };

        let payload = match broadcast::announcement_payload(self.identity.as_ref()) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(tag = MESSAGE_TAG, error = %e, "failed to build announcement");
                return;
            }
        };

        let report = broadcast::send_announcement(socket, &addresses, &payload);
        tracing::debug!(sent = report.sent, failed = report.failed, "announcement broadcast");
    }

    fn sweep(&mut self) {
        self.table.sweep_expired(Instant::now(), self.expiry);
    }

    fn drain_inbound(&mut self) {
        let local_id = self.identity.local_id();
        if let Some(socket) = &self.socket {
            listener::drain_inbound(socket, &mut self.buf, &mut self.table, &local_id);
        }
    }
}

/// A fresh timer whose first tick is one full period away.
fn restart_timer(period: Duration) -> Interval {
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

fn all_keys() -> ChangedKeys {
    [BROADCAST_INTERVAL, BROADCAST_EXPIRY, BROADCAST_PORT]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Resolves when the socket has data; never resolves without a socket.
async fn readable(socket: &Option<UdpSocket>) -> std::io::Result<()> {
    match socket {
        Some(socket) => socket.readable().await,
        None => std::future::pending().await,
    }
}

/// Create a broadcast-capable UDP socket bound to 0.0.0.0:`port`.
fn bind_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_broadcast(true).context("SO_BROADCAST")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind() {addr}"))?;

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}
