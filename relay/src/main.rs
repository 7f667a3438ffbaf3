//! # pocketclaude relay
//!
//! A pure message switch between one workstation agent and any number of
//! clients. Accepts authenticated WebSocket connections on `/ws`, serves
//! `GET /health`, and keeps nothing across restarts.
//!
//! Configuration comes from the environment: `PORT` (default 8080) and
//! `RELAY_TOKEN` (required shared secret).

mod api;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Context;
use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::{RelayState, HEARTBEAT_INTERVAL};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let token = std::env::var("RELAY_TOKEN").context("RELAY_TOKEN must be set")?;
    let port = match std::env::var("PORT") {
        Ok(raw) => raw.parse::<u16>().context("PORT must be a valid port number")?,
        Err(_) => DEFAULT_PORT,
    };

    let state = RelayState::new(token);
    let shutdown = setup_shutdown_signal();

    // Heartbeat: ping every authenticated peer; force-close the silent.
    let hb_state = state.clone();
    let hb_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = hb_shutdown.cancelled() => break,
                _ = ticker.tick() => hb_state.heartbeat_sweep(Instant::now()).await,
            }
        }
    });

    let app = Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(api::health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("relay listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("relay shut down");
    Ok(())
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
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, shutting down");
        }

        token_clone.cancel();
    });

    token
}
