//! The agent's single connection to the relay.
//!
//! State machine: Disconnected → Connecting → Authenticating →
//! Authenticated → (Disconnected). The session table is never torn down on
//! link loss; PTYs keep running and their output keeps landing in disk
//! logs and ring buffers while the uplink is away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pocketclaude_core::backoff::Backoff;
use pocketclaude_core::protocol::{codes, Body, Envelope, Role, StatusKind};

use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;

/// Extra backoff steps after `AGENT_EXISTS`, protecting the incumbent.
const AGENT_EXISTS_PENALTY: u32 = 5;

/// Why a connection attempt ended.
#[derive(Debug, PartialEq, Eq)]
enum LinkOutcome {
    /// The relay is bound to another agent.
    AgentExists,
    /// Normal closure or rejection; reconnect with standard backoff.
    Closed,
    /// Shutdown was requested.
    Shutdown,
}

/// The relay's verdict on our auth frame, if this envelope carries one.
#[derive(Debug, PartialEq, Eq)]
enum AuthVerdict {
    Accepted,
    AgentExists,
    Rejected,
}

fn auth_verdict(body: &Body) -> Option<AuthVerdict> {
    match body {
        Body::Status(status) if status.status == StatusKind::Connected => {
            Some(AuthVerdict::Accepted)
        }
        Body::Error(error) if error.code == codes::AGENT_EXISTS => Some(AuthVerdict::AgentExists),
        Body::Error(_) => Some(AuthVerdict::Rejected),
        _ => None,
    }
}

/// Run the uplink until shutdown: connect, authenticate, pump frames,
/// reconnect with jittered exponential backoff.
pub async fn run(
    config: &AgentConfig,
    dispatcher: Dispatcher,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    authenticated: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut backoff = Backoff::default();

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let outcome = connect_once(
            config,
            &dispatcher,
            outbound_rx,
            &authenticated,
            &shutdown,
            &mut backoff,
        )
        .await;
        authenticated.store(false, Ordering::SeqCst);

        match outcome {
            Ok(LinkOutcome::Shutdown) => return Ok(()),
            Ok(LinkOutcome::AgentExists) => {
                warn!("relay already has an agent; backing off hard");
                backoff.penalize(AGENT_EXISTS_PENALTY);
            }
            Ok(LinkOutcome::Closed) => info!("uplink closed"),
            Err(e) => warn!("uplink error: {e}"),
        }

        let delay = backoff.next_delay();
        info!(
            "reconnecting in {:.1}s (attempt {})",
            delay.as_secs_f64(),
            backoff.attempt()
        );
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn connect_once(
    config: &AgentConfig,
    dispatcher: &Dispatcher,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    authenticated: &AtomicBool,
    shutdown: &CancellationToken,
    backoff: &mut Backoff,
) -> anyhow::Result<LinkOutcome> {
    info!("connecting to {}", config.relay_url);
    let (ws, _response) = tokio_tungstenite::connect_async(config.relay_url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let auth = Envelope::auth(&config.token, Role::Agent);
    sink.send(Message::Text(auth.to_json().into())).await?;

    // ── Authenticating ─────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(LinkOutcome::Shutdown);
            }
            incoming = stream.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(LinkOutcome::Closed),
                };
                match msg {
                    Message::Text(text) => {
                        let envelope = match Envelope::from_json(text.as_str()) {
                            Ok(env) => env,
                            Err(e) => {
                                warn!("unparseable frame during auth: {e}");
                                continue;
                            }
                        };
                        match auth_verdict(&envelope.body) {
                            Some(AuthVerdict::Accepted) => break,
                            Some(AuthVerdict::AgentExists) => {
                                return Ok(LinkOutcome::AgentExists)
                            }
                            Some(AuthVerdict::Rejected) => {
                                if let Body::Error(err) = &envelope.body {
                                    warn!("auth rejected: {} ({})", err.code, err.message);
                                }
                                return Ok(LinkOutcome::Closed);
                            }
                            None => continue,
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => return Ok(LinkOutcome::Closed),
                    _ => continue,
                }
            }
        }
    }

    // ── Authenticated ──────────────────────────────────────────────
    // Only now does the backoff reset. Frames queued while offline are
    // dropped: clients get live output, never replay.
    backoff.reset();
    while outbound_rx.try_recv().is_ok() {}
    authenticated.store(true, Ordering::SeqCst);
    info!("uplink authenticated");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(LinkOutcome::Shutdown);
            }
            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    return Ok(LinkOutcome::Closed);
                };
                sink.send(Message::Text(envelope.to_json().into())).await?;
            }
            incoming = stream.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(LinkOutcome::Closed),
                };
                match msg {
                    Message::Text(text) => {
                        let envelope = match Envelope::from_json(text.as_str()) {
                            Ok(env) => env,
                            Err(e) => {
                                warn!("dropping unparseable frame: {e}");
                                continue;
                            }
                        };
                        match envelope.body {
                            Body::Command(command) => {
                                if let Some(reply) = dispatcher.dispatch(command).await {
                                    sink.send(Message::Text(reply.to_json().into())).await?;
                                }
                            }
                            other => debug!("ignoring non-command frame: {other:?}"),
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Message::Close(frame) => {
                        debug!("relay closed the uplink: {frame:?}");
                        return Ok(LinkOutcome::Closed);
                    }
                    _ => {}
                }
            }
        }
    }
}
