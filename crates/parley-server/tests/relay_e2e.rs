//! End-to-end relay tests over real WebSocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_server::{server, ServerConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server::serve(listener, config, shutdown.clone()));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn connect(&self, user_id: &str) -> Client {
        let url = format!("ws://{}/ws/{}", self.addr, user_id);
        let (client, _) = connect_async(url).await.unwrap();
        client
    }

    /// Fetch `GET /` with a bare HTTP/1.1 request.
    async fn status(&self) -> Value {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }

    /// Poll the status endpoint until `active_users` matches.
    async fn wait_for_users(&self, expected: &[&str]) -> Value {
        let expected = json!(expected);
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let status = self.status().await;
                if status["active_users"] == expected {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("status never reached expected users")
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(STEP_TIMEOUT, self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv_json(client: &mut Client) -> Value {
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected a text message, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

/// True once the server has closed the connection.
async fn is_closed(client: &mut Client) -> bool {
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(_)) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn test_offer_answer_exchange() {
    let server = TestServer::start(ServerConfig::default()).await;

    let mut alice = server.connect("alice").await;
    let welcome = recv_json(&mut alice).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["user_id"], "alice");
    assert_eq!(welcome["online_users"], json!(["alice"]));

    let mut bob = server.connect("bob").await;
    let welcome = recv_json(&mut bob).await;
    assert_eq!(welcome["online_users"], json!(["alice", "bob"]));

    send_json(
        &mut alice,
        json!({"type": "offer", "target": "bob", "sdp": "v=0..."}),
    )
    .await;
    assert_eq!(
        recv_json(&mut bob).await,
        json!({"type": "offer", "target": "bob", "sdp": "v=0...", "from": "alice"})
    );

    send_json(
        &mut bob,
        json!({"type": "answer", "target": "alice", "sdp": "v=0 answer"}),
    )
    .await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "answer", "target": "alice", "sdp": "v=0 answer", "from": "bob"})
    );

    send_json(
        &mut alice,
        json!({"type": "ice-candidate", "target": "carol", "candidate": {}}),
    )
    .await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "error", "message": "User 'carol' is not online"})
    );

    bob.close(None).await.unwrap();
    let status = server.wait_for_users(&["alice"]).await;
    assert_eq!(
        status,
        json!({"status": "running", "active_users": ["alice"], "total_connections": 1})
    );

    send_json(&mut alice, json!({"type": "offer", "target": "bob", "sdp": "Y"})).await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "error", "message": "User 'bob' is not online"})
    );

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_message_closes_connection() {
    let server = TestServer::start(ServerConfig::default()).await;

    let mut alice = server.connect("alice").await;
    recv_json(&mut alice).await;

    alice
        .send(Message::text("this is not json"))
        .await
        .unwrap();

    assert!(is_closed(&mut alice).await);
    server.wait_for_users(&[]).await;

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_message_reported_when_configured() {
    let mut config = ServerConfig::default();
    config.session.malformed_policy = parley_relay::MalformedPolicy::Report;
    let server = TestServer::start(config).await;

    let mut alice = server.connect("alice").await;
    recv_json(&mut alice).await;

    alice.send(Message::text("[1, 2]")).await.unwrap();
    let error = recv_json(&mut alice).await;
    assert_eq!(error["type"], "error");
    assert!(error["message"]
        .as_str()
        .unwrap()
        .starts_with("Malformed message: "));

    server.wait_for_users(&["alice"]).await;
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_keeps_newest_connection() {
    let server = TestServer::start(ServerConfig::default()).await;

    let mut first = server.connect("alice").await;
    recv_json(&mut first).await;
    let mut second = server.connect("alice").await;
    recv_json(&mut second).await;

    // Closing the orphaned connection must not remove the newer one.
    first.close(None).await.unwrap();
    let mut bob = server.connect("bob").await;
    recv_json(&mut bob).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.wait_for_users(&["alice", "bob"]).await;

    send_json(&mut bob, json!({"type": "offer", "target": "alice"})).await;
    assert_eq!(
        recv_json(&mut second).await,
        json!({"type": "offer", "target": "alice", "from": "bob"})
    );

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestServer::start(ServerConfig::default()).await;

    let mut alice = server.connect("alice").await;
    recv_json(&mut alice).await;

    server.shutdown.cancel();
    assert!(is_closed(&mut alice).await);

    tokio::time::timeout(STEP_TIMEOUT, server.handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
