//! Authenticated relay connection with automatic reconnection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pocketclaude_core::backoff::Backoff;
use pocketclaude_core::protocol::{
    Body, CommandPayload, Envelope, ErrorPayload, Role, StatusKind, StatusPayload,
};

/// Events surfaced to the adapter embedding this client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Authenticated with the relay; carries the agent-connected flag from
    /// the auth reply.
    Connected { agent_connected: bool },
    /// The relay link dropped; a reconnect is scheduled.
    Disconnected,
    /// The agent bound to or released from the relay.
    AgentPresence(bool),
    /// A raw PTY output chunk.
    Output { session_id: String, data: String },
    /// Any other status notification (session lifecycle, query replies).
    Status(StatusPayload),
    /// An error reply.
    Error(ErrorPayload),
}

/// Translate an incoming envelope into an adapter event.
///
/// Agent-presence broadcasts are recognized by their `reason` field and
/// folded into [`ClientEvent::AgentPresence`]; everything else passes
/// through typed.
pub fn map_incoming(envelope: Envelope) -> Option<ClientEvent> {
    match envelope.body {
        Body::Output(output) => Some(ClientEvent::Output {
            session_id: output.session_id,
            data: output.data,
        }),
        Body::Status(status) => {
            let reason = status
                .data
                .as_ref()
                .and_then(|d| d.get("reason"))
                .and_then(|r| r.as_str());
            match (status.status, reason) {
                (StatusKind::Connected, Some("agent_connected")) => {
                    Some(ClientEvent::AgentPresence(true))
                }
                (StatusKind::Disconnected, Some("agent_disconnected")) => {
                    Some(ClientEvent::AgentPresence(false))
                }
                _ => Some(ClientEvent::Status(status)),
            }
        }
        Body::Error(error) => Some(ClientEvent::Error(error)),
        // Clients never receive auth or command frames.
        Body::Auth(_) | Body::Command(_) => None,
    }
}

/// Handle to a running relay connection task.
pub struct RelayClient {
    commands_tx: mpsc::UnboundedSender<CommandPayload>,
    agent_connected: watch::Receiver<bool>,
    shutdown: CancellationToken,
}

impl RelayClient {
    /// Spawn the connection task. Events arrive on the returned receiver;
    /// the task reconnects on its own until [`RelayClient::close`].
    pub fn connect(url: impl Into<String>, token: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (agent_tx, agent_rx) = watch::channel(false);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_connection(
            url.into(),
            token.into(),
            commands_rx,
            events_tx,
            Arc::new(agent_tx),
            shutdown.clone(),
        ));

        (
            Self {
                commands_tx,
                agent_connected: agent_rx,
                shutdown,
            },
            events_rx,
        )
    }

    /// Queue a command for the agent. Fails once the client is closed.
    pub fn send(&self, command: CommandPayload) -> Result<(), CommandPayload> {
        self.commands_tx.send(command).map_err(|e| e.0)
    }

    /// Latest agent-connected flag from relay broadcasts.
    pub fn agent_connected(&self) -> bool {
        *self.agent_connected.borrow()
    }

    /// Watch agent presence changes.
    pub fn watch_agent(&self) -> watch::Receiver<bool> {
        self.agent_connected.clone()
    }

    /// Stop reconnecting and drop the link.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn run_connection(
    url: String,
    token: String,
    mut commands_rx: mpsc::UnboundedReceiver<CommandPayload>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    agent_tx: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::default();

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match connect_once(
            &url,
            &token,
            &mut commands_rx,
            &events_tx,
            &agent_tx,
            &shutdown,
            &mut backoff,
        )
        .await
        {
            Ok(true) => return, // shutdown requested
            Ok(false) => debug!("relay link closed"),
            Err(e) => warn!("relay link error: {e}"),
        }

        let _ = agent_tx.send(false);
        if events_tx.send(ClientEvent::Disconnected).is_err() {
            return; // adapter dropped the event stream
        }

        let delay = backoff.next_delay();
        debug!("reconnecting in {:.1}s", delay.as_secs_f64());
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One connection attempt. Returns `Ok(true)` when shutdown ended it.
async fn connect_once(
    url: &str,
    token: &str,
    commands_rx: &mut mpsc::UnboundedReceiver<CommandPayload>,
    events_tx: &mpsc::UnboundedSender<ClientEvent>,
    agent_tx: &watch::Sender<bool>,
    shutdown: &CancellationToken,
    backoff: &mut Backoff,
) -> anyhow::Result<bool> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    let auth = Envelope::auth(token, Role::Client);
    sink.send(Message::Text(auth.to_json().into())).await?;

    // Await the auth verdict.
    let agent_connected = loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(true);
            }
            incoming = stream.next() => match incoming {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(false),
            },
        };
        match msg {
            Message::Text(text) => {
                let envelope = Envelope::from_json(text.as_str())?;
                match &envelope.body {
                    Body::Status(status) if status.status == StatusKind::Connected => {
                        break status
                            .data
                            .as_ref()
                            .and_then(|d| d.get("agentConnected"))
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false);
                    }
                    Body::Error(error) => {
                        anyhow::bail!("auth rejected: {} ({})", error.code, error.message);
                    }
                    _ => continue,
                }
            }
            Message::Close(_) => return Ok(false),
            _ => continue,
        }
    };

    backoff.reset();
    let _ = agent_tx.send(agent_connected);
    info!("authenticated with relay (agentConnected={agent_connected})");
    if events_tx
        .send(ClientEvent::Connected { agent_connected })
        .is_err()
    {
        return Ok(true);
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(true);
            }
            command = commands_rx.recv() => {
                let Some(command) = command else { return Ok(true) };
                let envelope = Envelope::command(command);
                sink.send(Message::Text(envelope.to_json().into())).await?;
            }
            incoming = stream.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(false),
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
                        if let Some(event) = map_incoming(envelope) {
                            if let ClientEvent::AgentPresence(up) = &event {
                                let _ = agent_tx.send(*up);
                            }
                            if events_tx.send(event).is_err() {
                                return Ok(true);
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => return Ok(false),
                    _ => {}
                }
            }
        }
    }
}
