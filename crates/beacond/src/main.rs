//! beacond — LAN discovery daemon.
//!
//! Announces this node on every broadcast-capable interface and logs peers
//! as they appear and expire. `SIGHUP` reloads the config file; changed
//! discovery settings take effect without a restart.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};

use beacon_core::config::BeaconConfig;
use beacon_core::wire::{ADDRESSES_KEY, NAME_KEY};
use beacon_core::{Attributes, SettingsRegistry, StaticIdentity};
use beacon_services::{Enumerator, PeerEvent, SystemInterfaces};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BeaconConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BeaconConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BeaconConfig::default()
    });

    if config.identity.uuid.is_empty() {
        tracing::warn!("no uuid configured, this run uses a temporary identity");
    }
    let identity = Arc::new(StaticIdentity::from_config(&config.identity));
    tracing::info!(
        uuid = %identity.id,
        name = %identity.name,
        port = config.discovery.broadcast_port,
        interval_ms = config.discovery.broadcast_interval_ms,
        expiry_ms = config.discovery.broadcast_expiry_ms,
        "beacond starting"
    );

    let settings = Arc::new(SettingsRegistry::from_config(&config.discovery));
    let (handle, mut events) =
        Enumerator::spawn(settings.clone(), identity, Arc::new(SystemInterfaces));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Config reload ────────────────────────────────────────────────────────
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    {
        let settings = settings.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                match BeaconConfig::load() {
                    Ok(config) => {
                        let changed = settings.apply_config(&config.discovery);
                        tracing::info!(changed = ?changed, "config reloaded");
                    }
                    Err(e) => tracing::error!(error = %e, "config reload failed, keeping current settings"),
                }
            }
        });
    }

    // ── Event loop ───────────────────────────────────────────────────────────
    let mut snapshot = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(event) = events.recv() => log_event(&event),
            _ = snapshot.tick() => {
                let peers = handle.peers().await;
                tracing::info!(count = peers.len(), "peer table snapshot");
                for p in peers {
                    tracing::info!(
                        peer = %p.id,
                        name = %display_name(&p.attributes),
                        age_ms = p.age.as_millis() as u64,
                        "  peer"
                    );
                }
            }
        }
    }

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn log_event(event: &PeerEvent) {
    match event {
        PeerEvent::Updated { id, attributes } => tracing::debug!(
            peer = %id,
            name = %display_name(attributes),
            addresses = %attributes.get(ADDRESSES_KEY).cloned().unwrap_or_default(),
            "peer updated"
        ),
        PeerEvent::Removed { id } => tracing::info!(peer = %id, "peer removed"),
    }
}

fn display_name(attributes: &Attributes) -> &str {
    attributes
        .get(NAME_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or("?")
}
