//! End-to-end relay tests.
//!
//! Each test spawns the relay binary built by cargo on a free port, then
//! drives it with real WebSocket connections and HTTP requests.

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pocketclaude_core::protocol::{codes, Body, CommandPayload, Envelope, Role, StatusKind};

const TOKEN: &str = "it-test-token";

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    child: Child,
    port: u16,
}

impl Drop for Relay {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

async fn spawn_relay() -> Relay {
    let port = free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_pocketclaude-relay"))
        .env("PORT", port.to_string())
        .env("RELAY_TOKEN", TOKEN)
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn relay binary");

    let relay = Relay { child, port };
    let url = format!("http://127.0.0.1:{}/health", relay.port);
    for _ in 0..200 {
        if reqwest::get(&url).await.is_ok() {
            return relay;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("relay did not become ready on port {}", relay.port);
}

async fn connect(relay: &Relay) -> Ws {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", relay.port))
        .await
        .expect("websocket connect");
    ws
}

async fn send(ws: &mut Ws, envelope: &Envelope) {
    ws.send(Message::Text(envelope.to_json().into()))
        .await
        .expect("ws send");
}

/// Read frames until the next envelope, skipping control frames.
async fn recv_envelope(ws: &mut Ws) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return Envelope::from_json(text.as_str()).expect("envelope"),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Read frames until the connection closes; returns the close code if any.
async fn recv_close_code(ws: &mut Ws) -> Option<u16> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code.into()),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

async fn auth(ws: &mut Ws, token: &str, role: Role) -> Envelope {
    send(ws, &Envelope::auth(token, role)).await;
    recv_envelope(ws).await
}

fn status_of(envelope: &Envelope) -> (StatusKind, serde_json::Value) {
    match &envelope.body {
        Body::Status(payload) => (
            payload.status,
            payload.data.clone().unwrap_or(serde_json::Value::Null),
        ),
        other => panic!("expected status, got {other:?}"),
    }
}

fn error_code(envelope: &Envelope) -> String {
    match &envelope.body {
        Body::Error(payload) => payload.code.clone(),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn health_reports_peer_counts() {
    let relay = spawn_relay().await;

    let url = format!("http://127.0.0.1:{}/health", relay.port);
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["agent"], false);
    assert_eq!(body["clients"], 0);

    let mut agent = connect(&relay).await;
    let reply = auth(&mut agent, TOKEN, Role::Agent).await;
    let (kind, data) = status_of(&reply);
    assert_eq!(kind, StatusKind::Connected);
    assert_eq!(data["role"], "agent");

    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["agent"], true);
    assert_eq!(body["clients"], 0);
}

#[tokio::test]
async fn bad_token_is_rejected_with_4001() {
    let relay = spawn_relay().await;
    let mut ws = connect(&relay).await;

    send(&mut ws, &Envelope::auth("wrong", Role::Client)).await;
    let reply = recv_envelope(&mut ws).await;
    assert_eq!(error_code(&reply), codes::AUTH_FAILED);
    assert_eq!(recv_close_code(&mut ws).await, Some(4001));
}

#[tokio::test]
async fn invalid_role_is_rejected_with_4003() {
    let relay = spawn_relay().await;
    let mut ws = connect(&relay).await;

    let frame = format!(
        r#"{{"type":"auth","payload":{{"token":"{TOKEN}","role":"superuser"}},"timestamp":1}}"#
    );
    ws.send(Message::Text(frame.into())).await.unwrap();
    let reply = recv_envelope(&mut ws).await;
    assert_eq!(error_code(&reply), codes::INVALID_ROLE);
    assert_eq!(recv_close_code(&mut ws).await, Some(4003));
}

#[tokio::test]
async fn second_agent_is_rejected_with_4002() {
    let relay = spawn_relay().await;

    let mut first = connect(&relay).await;
    auth(&mut first, TOKEN, Role::Agent).await;

    let mut second = connect(&relay).await;
    send(&mut second, &Envelope::auth(TOKEN, Role::Agent)).await;
    let reply = recv_envelope(&mut second).await;
    assert_eq!(error_code(&reply), codes::AGENT_EXISTS);
    assert_eq!(recv_close_code(&mut second).await, Some(4002));

    // The incumbent is untouched.
    let url = format!("http://127.0.0.1:{}/health", relay.port);
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["agent"], true);
}

#[tokio::test]
async fn command_without_agent_bounces_no_agent() {
    let relay = spawn_relay().await;
    let mut client = connect(&relay).await;

    let reply = auth(&mut client, TOKEN, Role::Client).await;
    let (kind, data) = status_of(&reply);
    assert_eq!(kind, StatusKind::Connected);
    assert_eq!(data["agentConnected"], false);

    send(
        &mut client,
        &Envelope::command(CommandPayload::new("list_projects")),
    )
    .await;
    let reply = recv_envelope(&mut client).await;
    assert_eq!(error_code(&reply), codes::NO_AGENT);
}

#[tokio::test]
async fn commands_forward_and_output_broadcasts() {
    let relay = spawn_relay().await;

    let mut agent = connect(&relay).await;
    auth(&mut agent, TOKEN, Role::Agent).await;

    let mut client = connect(&relay).await;
    let reply = auth(&mut client, TOKEN, Role::Client).await;
    let (_, data) = status_of(&reply);
    assert_eq!(data["agentConnected"], true);

    // Client command reaches the agent unchanged.
    send(
        &mut client,
        &Envelope::command(CommandPayload::new("list_sessions")),
    )
    .await;
    let forwarded = recv_envelope(&mut agent).await;
    match forwarded.body {
        Body::Command(cmd) => assert_eq!(cmd.command, "list_sessions"),
        other => panic!("expected command, got {other:?}"),
    }

    // Agent output fans out to the client.
    send(&mut agent, &Envelope::output("sess-1", "hello from pty")).await;
    let broadcast = recv_envelope(&mut client).await;
    match broadcast.body {
        Body::Output(out) => {
            assert_eq!(out.session_id, "sess-1");
            assert_eq!(out.data, "hello from pty");
        }
        other => panic!("expected output, got {other:?}"),
    }
}

#[tokio::test]
async fn agent_disconnect_is_broadcast_to_clients() {
    let relay = spawn_relay().await;

    let mut agent = connect(&relay).await;
    auth(&mut agent, TOKEN, Role::Agent).await;

    let mut client = connect(&relay).await;
    auth(&mut client, TOKEN, Role::Client).await;

    drop(agent);

    let notice = recv_envelope(&mut client).await;
    let (kind, data) = status_of(&notice);
    assert_eq!(kind, StatusKind::Disconnected);
    assert_eq!(data["reason"], "agent_disconnected");

    // A replacement agent can now bind.
    let mut replacement = connect(&relay).await;
    let reply = auth(&mut replacement, TOKEN, Role::Agent).await;
    let (kind, _) = status_of(&reply);
    assert_eq!(kind, StatusKind::Connected);

    let notice = recv_envelope(&mut client).await;
    let (kind, data) = status_of(&notice);
    assert_eq!(kind, StatusKind::Connected);
    assert_eq!(data["reason"], "agent_connected");
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let relay = spawn_relay().await;
    let mut client = connect(&relay).await;
    auth(&mut client, TOKEN, Role::Client).await;

    client
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let reply = recv_envelope(&mut client).await;
    assert_eq!(error_code(&reply), codes::INVALID_JSON);

    // Still authenticated: a real command now bounces NO_AGENT rather
    // than closing.
    send(
        &mut client,
        &Envelope::command(CommandPayload::new("list_projects")),
    )
    .await;
    let reply = recv_envelope(&mut client).await;
    assert_eq!(error_code(&reply), codes::NO_AGENT);
}
