//! WebSocket connection lifecycle: upgrade, authentication, routing,
//! cleanup.
//!
//! Each connection runs an outbound writer task draining a [`Frame`] queue
//! and an inbound loop on the upgrade task. All routing decisions live in
//! [`route_envelope`] so they can be tested without sockets.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pocketclaude_core::protocol::{codes, Body, Envelope, Role, StatusKind};

use crate::state::{AgentSlot, Frame, Peer, RelayState};

/// `GET /ws`: upgrade to a relay connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Where an inbound envelope went.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Client command forwarded to the agent.
    Forwarded,
    /// Client command with no agent bound; sender gets `NO_AGENT`.
    NoAgent,
    /// Agent traffic fanned out to all clients.
    Broadcast,
    /// Any other type/role combination.
    Discarded,
}

/// Apply the routing rules for an authenticated peer's envelope.
pub async fn route_envelope(state: &RelayState, role: Role, envelope: Envelope) -> RouteOutcome {
    match (role, &envelope.body) {
        (Role::Client, Body::Command(_)) => {
            if state.forward_to_agent(envelope).await {
                RouteOutcome::Forwarded
            } else {
                RouteOutcome::NoAgent
            }
        }
        (Role::Agent, Body::Output(_) | Body::Status(_) | Body::Error(_)) => {
            state.broadcast_to_clients(&envelope);
            RouteOutcome::Broadcast
        }
        _ => RouteOutcome::Discarded,
    }
}

/// The `status{connected}` reply sent to a freshly authenticated peer.
pub fn auth_ok_reply(role: Role, agent_connected: bool) -> Envelope {
    Envelope::status(
        StatusKind::Connected,
        Some(json!({
            "role": role.as_str(),
            "agentConnected": agent_connected,
        })),
    )
}

/// The broadcast sent to clients when the agent binds or goes away.
pub fn agent_presence_broadcast(connected: bool) -> Envelope {
    let (status, reason) = if connected {
        (StatusKind::Connected, "agent_connected")
    } else {
        (StatusKind::Disconnected, "agent_disconnected")
    };
    Envelope::status(status, Some(json!({ "reason": reason })))
}

async fn handle_connection(socket: WebSocket, state: RelayState) {
    let conn_id = Uuid::new_v4().to_string();
    debug!("connection {conn_id} open");

    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(run_writer(ws_sink, rx));

    // ── Authentication ─────────────────────────────────────────────
    // The first text frame must be a valid auth envelope; anything else
    // closes the connection with the matching code.
    let role = match authenticate(&state, &conn_id, &tx, &cancel, &mut ws_stream).await {
        Some(role) => role,
        None => {
            // The writer drains the error/close frames before exiting.
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    info!("{} {conn_id} authenticated", role.as_str());

    if role == Role::Agent {
        state.broadcast_to_clients(&agent_presence_broadcast(true));
    }

    // ── Inbound loop ───────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("connection {conn_id} force-closed");
                break;
            }
            incoming = ws_stream.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!("connection {conn_id} read error: {e}");
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        let envelope = match Envelope::from_json(text.as_str()) {
                            Ok(env) => env,
                            Err(e) => {
                                debug!("connection {conn_id} bad frame: {e}");
                                send_error(&tx, codes::INVALID_JSON, "frame is not a valid envelope");
                                continue;
                            }
                        };
                        match route_envelope(&state, role, envelope).await {
                            RouteOutcome::NoAgent => {
                                send_error(&tx, codes::NO_AGENT, "no agent connected");
                            }
                            outcome => debug!("connection {conn_id}: {outcome:?}"),
                        }
                    }
                    Message::Pong(_) => state.note_pong(&conn_id).await,
                    Message::Close(_) => break,
                    // axum answers pings itself; binary frames are not
                    // part of the protocol.
                    _ => {}
                }
            }
        }
    }

    // ── Cleanup ────────────────────────────────────────────────────
    drop(tx);
    let _ = writer.await;

    match role {
        Role::Agent => {
            if state.release_agent(&conn_id).await {
                info!("agent {conn_id} disconnected");
                state.broadcast_to_clients(&agent_presence_broadcast(false));
            }
        }
        _ => {
            state.remove_client(&conn_id);
            debug!("client {conn_id} disconnected");
        }
    }
}

/// Run the authentication handshake. Returns the peer's role on success;
/// on failure the error and close frames are already queued.
async fn authenticate(
    state: &RelayState,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<Frame>,
    cancel: &CancellationToken,
    ws_stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Role> {
    let text = loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return None,
        }
    };

    let envelope = match Envelope::from_json(text.as_str()) {
        Ok(env) => env,
        Err(_) => {
            send_error(tx, codes::INVALID_JSON, "auth frame is not a valid envelope");
            send_close(tx, codes::CLOSE_AUTH_FAILURE, "authentication failed");
            return None;
        }
    };

    let auth = match envelope.body {
        Body::Auth(auth) => auth,
        other => {
            warn!("connection {conn_id} sent {other:?} before auth");
            send_error(tx, codes::NOT_AUTHENTICATED, "first frame must be auth");
            send_close(tx, codes::CLOSE_AUTH_FAILURE, "not authenticated");
            return None;
        }
    };

    if auth.role == Role::Unknown {
        send_error(tx, codes::INVALID_ROLE, "role must be \"agent\" or \"client\"");
        send_close(tx, codes::CLOSE_INVALID_ROLE, "invalid role");
        return None;
    }

    if auth.token != *state.token {
        warn!("connection {conn_id} failed auth as {}", auth.role.as_str());
        send_error(tx, codes::AUTH_FAILED, "invalid token");
        send_close(tx, codes::CLOSE_AUTH_FAILURE, "authentication failed");
        return None;
    }

    match auth.role {
        Role::Agent => {
            let slot = AgentSlot {
                conn_id: conn_id.to_string(),
                peer: Peer::new(tx.clone(), cancel.clone()),
            };
            if state.bind_agent(slot).await.is_err() {
                info!("rejecting second agent {conn_id}");
                send_error(tx, codes::AGENT_EXISTS, "an agent is already connected");
                send_close(tx, codes::CLOSE_AGENT_EXISTS, "agent already connected");
                return None;
            }
            // agentConnected refers to this very binding.
            send_envelope(tx, auth_ok_reply(Role::Agent, true));
            Some(Role::Agent)
        }
        Role::Client => {
            let agent_connected = state.agent_connected().await;
            state.register_client(
                conn_id.to_string(),
                Peer::new(tx.clone(), cancel.clone()),
            );
            send_envelope(tx, auth_ok_reply(Role::Client, agent_connected));
            Some(Role::Client)
        }
        Role::Unknown => unreachable!("rejected above"),
    }
}

/// Drain the outbound queue into the socket. Exits on close frame, send
/// failure, or queue closure.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        let result = match frame {
            Frame::Envelope(envelope) => sink.send(Message::Text(envelope.to_json().into())).await,
            Frame::Ping => sink.send(Message::Ping(Vec::new().into())).await,
            Frame::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

fn send_envelope(tx: &mpsc::UnboundedSender<Frame>, envelope: Envelope) {
    let _ = tx.send(Frame::Envelope(Box::new(envelope)));
}

fn send_error(tx: &mpsc::UnboundedSender<Frame>, code: &str, message: &str) {
    send_envelope(tx, Envelope::error(code, message));
}

fn send_close(tx: &mpsc::UnboundedSender<Frame>, code: u16, reason: &str) {
    let _ = tx.send(Frame::Close {
        code,
        reason: reason.to_string(),
    });
}
