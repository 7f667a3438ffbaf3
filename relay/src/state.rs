//! Shared relay state: the single agent slot and the client registry.
//!
//! The client registry is a [`DashMap`] since client connections come and
//! go concurrently; the agent slot is a plain `Mutex<Option<_>>` because
//! the single-agent invariant is exactly a single-slot lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pocketclaude_core::protocol::Envelope;

/// Ping cadence for authenticated peers.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A peer silent for longer than this is force-closed.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound frames queued to a peer's writer task.
#[derive(Debug, Clone)]
pub enum Frame {
    Envelope(Box<Envelope>),
    Ping,
    Close { code: u16, reason: String },
}

pub type PeerTx = mpsc::UnboundedSender<Frame>;

/// Per-connection record: outbound queue, force-close handle, pong clock.
#[derive(Debug)]
pub struct Peer {
    pub tx: PeerTx,
    pub cancel: CancellationToken,
    pub last_pong: Instant,
}

impl Peer {
    pub fn new(tx: PeerTx, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            last_pong: Instant::now(),
        }
    }
}

/// The bound agent, if any.
#[derive(Debug)]
pub struct AgentSlot {
    pub conn_id: String,
    pub peer: Peer,
}

/// Returned by [`RelayState::bind_agent`] when a healthy agent is already
/// bound.
#[derive(Debug)]
pub struct AgentExists;

#[derive(Clone)]
pub struct RelayState {
    pub token: Arc<str>,
    agent: Arc<Mutex<Option<AgentSlot>>>,
    clients: Arc<DashMap<String, Peer>>,
}

impl RelayState {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
            agent: Arc::new(Mutex::new(None)),
            clients: Arc::new(DashMap::new()),
        }
    }

    pub async fn agent_connected(&self) -> bool {
        self.agent.lock().await.is_some()
    }

    /// Bind an agent to the slot.
    ///
    /// Fails when a healthy agent is already bound. A previous agent whose
    /// outbound channel has closed is treated as gone and replaced.
    pub async fn bind_agent(&self, slot: AgentSlot) -> Result<(), AgentExists> {
        let mut agent = self.agent.lock().await;
        if let Some(existing) = agent.as_ref() {
            if !existing.peer.tx.is_closed() {
                return Err(AgentExists);
            }
            info!("replacing dead agent connection {}", existing.conn_id);
        }
        *agent = Some(slot);
        Ok(())
    }

    /// Release the agent slot if it is held by `conn_id`.
    pub async fn release_agent(&self, conn_id: &str) -> bool {
        let mut agent = self.agent.lock().await;
        if agent.as_ref().is_some_and(|a| a.conn_id == conn_id) {
            *agent = None;
            return true;
        }
        false
    }

    /// Forward an envelope to the bound agent. `false` when no agent is
    /// bound or its queue is gone.
    pub async fn forward_to_agent(&self, envelope: Envelope) -> bool {
        let agent = self.agent.lock().await;
        match agent.as_ref() {
            Some(slot) => slot.peer.tx.send(Frame::Envelope(Box::new(envelope))).is_ok(),
            None => false,
        }
    }

    pub fn register_client(&self, conn_id: String, peer: Peer) {
        self.clients.insert(conn_id, peer);
    }

    pub fn remove_client(&self, conn_id: &str) -> bool {
        self.clients.remove(conn_id).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Broadcast an envelope to every connected client.
    ///
    /// A failed send drops only that client; the others and the agent are
    /// unaffected.
    pub fn broadcast_to_clients(&self, envelope: &Envelope) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            let frame = Frame::Envelope(Box::new(envelope.clone()));
            if entry.value().tx.send(frame).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for conn_id in dead {
            warn!("dropping client {conn_id}: outbound queue closed");
            if let Some((_, peer)) = self.clients.remove(&conn_id) {
                peer.cancel.cancel();
            }
        }
    }

    /// Record a pong from a peer.
    pub async fn note_pong(&self, conn_id: &str) {
        {
            let mut agent = self.agent.lock().await;
            if let Some(slot) = agent.as_mut() {
                if slot.conn_id == conn_id {
                    slot.peer.last_pong = Instant::now();
                    return;
                }
            }
        }
        if let Some(mut peer) = self.clients.get_mut(conn_id) {
            peer.last_pong = Instant::now();
        }
    }

    /// One heartbeat pass: ping healthy peers, force-close silent ones.
    pub async fn heartbeat_sweep(&self, now: Instant) {
        {
            let agent = self.agent.lock().await;
            if let Some(slot) = agent.as_ref() {
                sweep_peer(&slot.peer, now, &format!("agent {}", slot.conn_id));
            }
        }
        for entry in self.clients.iter() {
            sweep_peer(entry.value(), now, &format!("client {}", entry.key()));
        }
    }
}

fn sweep_peer(peer: &Peer, now: Instant, label: &str) {
    if is_stale(peer.last_pong, now) {
        warn!("{label} missed heartbeats, force-closing");
        let _ = peer.tx.send(Frame::Close {
            code: 1001,
            reason: "heartbeat timeout".into(),
        });
        peer.cancel.cancel();
    } else {
        let _ = peer.tx.send(Frame::Ping);
    }
}

/// Whether a peer's last pong is older than the timeout.
pub fn is_stale(last_pong: Instant, now: Instant) -> bool {
    now.duration_since(last_pong) > PONG_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> (Peer, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(tx, CancellationToken::new()), rx)
    }

    #[tokio::test]
    async fn agent_slot_starts_empty() {
        let state = RelayState::new("secret");
        assert!(!state.agent_connected().await);
    }

    #[tokio::test]
    async fn second_agent_bind_is_rejected() {
        let state = RelayState::new("secret");
        let (p1, _rx1) = peer();
        let (p2, _rx2) = peer();

        state
            .bind_agent(AgentSlot {
                conn_id: "a1".into(),
                peer: p1,
            })
            .await
            .unwrap();

        let err = state
            .bind_agent(AgentSlot {
                conn_id: "a2".into(),
                peer: p2,
            })
            .await;
        assert!(err.is_err());
        assert!(state.agent_connected().await);
    }

    #[tokio::test]
    async fn dead_agent_is_replaced() {
        let state = RelayState::new("secret");
        let (p1, rx1) = peer();
        drop(rx1); // channel closed -> peer counts as dead
        state
            .bind_agent(AgentSlot {
                conn_id: "a1".into(),
                peer: p1,
            })
            .await
            .unwrap();

        let (p2, _rx2) = peer();
        state
            .bind_agent(AgentSlot {
                conn_id: "a2".into(),
                peer: p2,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_only_matches_own_conn_id() {
        let state = RelayState::new("secret");
        let (p1, _rx1) = peer();
        state
            .bind_agent(AgentSlot {
                conn_id: "a1".into(),
                peer: p1,
            })
            .await
            .unwrap();

        assert!(!state.release_agent("other").await);
        assert!(state.agent_connected().await);
        assert!(state.release_agent("a1").await);
        assert!(!state.agent_connected().await);
    }

    #[tokio::test]
    async fn forward_without_agent_fails() {
        let state = RelayState::new("secret");
        let env = Envelope::error("NO_AGENT", "x");
        assert!(!state.forward_to_agent(env).await);
    }

    #[tokio::test]
    async fn broadcast_drops_dead_clients_only() {
        let state = RelayState::new("secret");
        let (alive, mut alive_rx) = peer();
        let (dead, dead_rx) = peer();
        drop(dead_rx);
        let dead_cancel = dead.cancel.clone();

        state.register_client("c1".into(), alive);
        state.register_client("c2".into(), dead);

        state.broadcast_to_clients(&Envelope::status(
            pocketclaude_core::protocol::StatusKind::Connected,
            None,
        ));

        assert!(matches!(
            alive_rx.try_recv().unwrap(),
            Frame::Envelope(_)
        ));
        assert_eq!(state.client_count(), 1);
        assert!(dead_cancel.is_cancelled());
    }

    #[tokio::test]
    async fn note_pong_updates_client_clock() {
        let state = RelayState::new("secret");
        let (mut p, _rx) = peer();
        p.last_pong = Instant::now() - Duration::from_secs(120);
        state.register_client("c1".into(), p);

        state.note_pong("c1").await;
        let fresh = state.clients.get("c1").unwrap().last_pong;
        assert!(!is_stale(fresh, Instant::now()));
    }

    #[tokio::test]
    async fn heartbeat_pings_fresh_and_closes_stale() {
        let state = RelayState::new("secret");
        let (fresh, mut fresh_rx) = peer();
        let (mut stale, mut stale_rx) = peer();
        stale.last_pong = Instant::now() - Duration::from_secs(120);
        let stale_cancel = stale.cancel.clone();

        state.register_client("fresh".into(), fresh);
        state.register_client("stale".into(), stale);

        state.heartbeat_sweep(Instant::now()).await;

        assert!(matches!(fresh_rx.try_recv().unwrap(), Frame::Ping));
        assert!(matches!(
            stale_rx.try_recv().unwrap(),
            Frame::Close { .. }
        ));
        assert!(stale_cancel.is_cancelled());
    }

    #[test]
    fn staleness_threshold_is_sixty_seconds() {
        let now = Instant::now();
        assert!(!is_stale(now - Duration::from_secs(59), now));
        assert!(is_stale(now - Duration::from_secs(61), now));
    }
}
