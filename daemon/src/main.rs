//! keyhook-daemon: Background daemon dispatching global keyboard events
//!
//! This daemon provides:
//! - A shared event buffer fed by the native keyboard hook
//! - A dispatcher thread delivering each event to its listener in order
//! - A channel listener bridging dispatched keys into the async runtime
//!
//! The native hook backend is CGEventTap on macOS and keyboard state
//! polling through evdev on Linux. Other platforms run the dispatcher
//! without a producer.

mod config;
mod dispatch;
mod events;
mod hook;
mod lifecycle;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::hook::{ChannelListener, KeyNotification, KeyboardHook};
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "keyhook-daemon starting"
    );

    let config = Config::load()?;
    info!(?config, "configuration loaded");

    let mut shutdown = ShutdownSignal::new().context("failed to install signal handlers")?;

    // Dispatcher thread -> async side
    let (key_tx, mut key_rx) = mpsc::channel::<KeyNotification>(config.channel_capacity);

    let hook = Arc::new(
        KeyboardHook::start(config.poll_interval()).context("failed to start keyboard hook")?,
    );
    let channel_listener = hook.add_listener(Arc::new(ChannelListener::new(key_tx)));
    info!(listeners = hook.listener_count(), "channel listener registered");

    #[cfg(target_os = "macos")]
    let event_tap = {
        let tap = crate::hook::EventTap::new(Arc::clone(&hook));
        match tap.start() {
            Ok(()) => info!("event tap started"),
            Err(e) => {
                tracing::error!(?e, "failed to start event tap");
                warn!("continuing without key capture - check Accessibility permissions");
            }
        }
        tap
    };

    #[cfg(target_os = "linux")]
    let poller = {
        let poller = crate::hook::KeymapPoller::new(Arc::clone(&hook), config.poll_interval());
        match poller.start() {
            Ok(()) => info!("keymap poller started"),
            Err(e) => {
                tracing::error!(?e, "failed to start keymap poller");
                warn!("continuing without key capture - check read access to /dev/input");
            }
        }
        poller
    };

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    warn!("no native keyboard hook on this platform, dispatcher will stay idle");

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = async {
            while let Some(key) = key_rx.recv().await {
                info!(
                    key_code = key.key_code,
                    transition = %key.transition,
                    latency_us = key.latency_us,
                    "key event"
                );
            }
        } => {
            info!("key channel closed");
        }

        reason = shutdown.wait() => {
            info!(%reason, "shutdown signal received");
        }
    }

    info!("shutting down...");

    #[cfg(target_os = "macos")]
    if event_tap.is_running() {
        event_tap.stop();
    }

    #[cfg(target_os = "linux")]
    if poller.is_running() {
        poller.stop();
    }

    if !hook.is_running() {
        warn!("dispatcher was not running at shutdown");
    }
    hook.remove_listener(channel_listener);
    let discarded = hook.shutdown();
    info!(discarded, "keyboard hook shut down");

    info!("keyhook-daemon stopped");

    Ok(())
}
