//! layout-switcher: keyboard layout and edit shortcut daemon for macOS
//!
//! This daemon runs as a LaunchAgent and provides:
//! - A Shift + modifier chord that cycles keyboard input sources
//! - Windows-style Control edit shortcuts rewritten to Command
//! - Fn+Z as Control+Z
//! - IPC server for the menu bar app to toggle options and watch filter health

mod config;
mod controller;
mod events;
mod hotkey;
mod input_source;
mod ipc;
mod lifecycle;
mod platform;
mod remap;
mod tap;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Settings};
use crate::controller::{Backends, Controller};
use crate::events::DaemonEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::platform::{EditFilterBackend, LayoutMonitorBackend, TisProvider};
use crate::remap::RemapConfigStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "layout-switcher starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.settings_path, "configuration loaded");

    let settings = Settings::load(&config.settings_path);
    let store = RemapConfigStore::new(settings.remap_config());

    if !platform::request_accessibility() {
        warn!("accessibility permission missing - filters stay inactive until granted");
    }

    let mut shutdown = ShutdownSignal::new()?;

    // IPC server -> controller
    let (command_tx, command_rx) = mpsc::channel(32);
    // tap threads -> controller
    let (notice_tx, notice_rx) = mpsc::channel(64);
    // controller -> subscribed IPC clients
    let (event_tx, _event_rx) = broadcast::channel::<DaemonEvent>(64);

    let backends = Backends {
        edit_filter: EditFilterBackend::new(store.clone()),
        layout_monitor: LayoutMonitorBackend::new(settings.combo_modifier),
        input_sources: TisProvider::new(),
    };
    let mut controller = Controller::new(
        settings,
        config.settings_path.clone(),
        store,
        backends,
        notice_tx,
        event_tx.clone(),
    );

    let server = Server::bind(&config.socket_path, command_tx, event_tx)?;

    controller.start();
    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = controller.run(command_rx, notice_rx) => {
            info!("controller exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "IPC server error");
            }
        }

        signal = shutdown.wait() => {
            info!(signal, "shutdown signal received");
        }
    }

    info!("shutting down...");

    controller.shutdown();
    server.shutdown().await;

    info!("layout-switcher stopped");

    Ok(())
}
