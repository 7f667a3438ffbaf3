//! # pocketclaude agent
//!
//! Workstation-resident process that owns assistant PTY sessions, executes
//! commands forwarded by the relay, and streams PTY output upstream.
//! Sessions survive relay outages: the uplink reconnects with backoff
//! while PTYs keep running and logging locally.

mod config;
mod dispatch;
mod history;
mod memory;
mod session;
mod upload;
mod uplink;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pocketclaude_core::projects::ProjectRegistry;

use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::history::HistoryStore;
use crate::memory::MemoryFile;
use crate::session::manager::SessionManager;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AgentConfig::from_env()?;
    let shutdown = setup_shutdown_signal();
    info!("pocketclaude-agent {VERSION} starting");

    let registry = ProjectRegistry::load(&config.projects_path, config.quick_path.clone())?;
    info!(
        "loaded {} project(s) from {}",
        registry.all().len(),
        config.projects_path.display()
    );

    let history_root = HistoryStore::default_root()
        .ok_or_else(|| anyhow::anyhow!("cannot resolve a home directory for history"))?;

    let (uplink_tx, mut uplink_rx) = mpsc::unbounded_channel();
    let authenticated = Arc::new(AtomicBool::new(false));

    let (manager, events_rx) = SessionManager::new(
        registry,
        HistoryStore::new(history_root),
        MemoryFile::default_path(),
        config.tuning.clone(),
        config.launch_command.clone(),
        uplink_tx,
        Arc::clone(&authenticated),
    );

    tokio::spawn(
        Arc::clone(&manager).run_event_pump(events_rx, shutdown.child_token()),
    );
    tokio::spawn(Arc::clone(&manager).run_idle_reaper(shutdown.child_token()));

    let dispatcher = Dispatcher::new(Arc::clone(&manager));
    uplink::run(
        &config,
        dispatcher,
        &mut uplink_rx,
        authenticated,
        shutdown.clone(),
    )
    .await?;

    // Shutdown: kill PTYs and finalize every history file.
    info!("shutting down, closing all sessions");
    manager.close_all().await;
    Ok(())
}

/// Tracing goes to stderr so it can never interleave with anything a
/// future stdio transport might put on stdout.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel the returned token on SIGINT or SIGTERM.
fn setup_shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    let _ = ctrl_c.await;
                    token_clone.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, initiating shutdown"),
                _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
    });

    token
}
