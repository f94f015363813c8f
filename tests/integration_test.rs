// Integration tests for the watch relay
// These boot the real warp routes on an ephemeral port and drive them over WebSockets

use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use watch_relay::api::relay_routes;
use watch_relay::config::RelayConfig;
use watch_relay::relay::RelayServer;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Client {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws_stream, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("Failed to connect");
        let (write, read) = ws_stream.split();
        Self { write, read }
    }

    async fn send(&mut self, value: Value) {
        self.write
            .send(Message::Text(value.to_string()))
            .await
            .expect("Failed to send message");
    }

    async fn recv(&mut self) -> Value {
        loop {
            let msg = timeout(Duration::from_secs(2), self.read.next())
                .await
                .expect("Timeout waiting for message")
                .expect("Connection closed")
                .expect("WebSocket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let msg = self.recv().await;
            if msg["type"] == kind {
                return msg;
            }
        }
    }

    /// Fails if anything other than a roster update arrives within `window`.
    async fn assert_no_traffic(&mut self, window: Duration) {
        loop {
            match timeout(window, self.read.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Text(text)))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(value["type"], "peerUpdate", "Unexpected message {}", value);
                }
                Ok(other) => panic!("Unexpected frame: {:?}", other),
            }
        }
    }

    async fn close(mut self) {
        self.write.close().await.ok();
        // Drain until the server finishes its side of the close handshake
        while let Ok(Some(Ok(_))) = timeout(Duration::from_secs(2), self.read.next()).await {}
    }
}

async fn start_server() -> (SocketAddr, Arc<RelayServer>) {
    let relay_server = Arc::new(RelayServer::new(RelayConfig::default()));
    let routes = relay_routes::routes(relay_server.clone(), std::env::temp_dir());
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, relay_server)
}

/// Polls until the session is gone; teardown runs after the socket closes.
async fn wait_for_session_removal(relay_server: &RelayServer, session_id: &str) -> bool {
    for _ in 0..40 {
        if relay_server.storage().get_session(session_id).await.is_none() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _) = start_server().await;

    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(resp.status(), 200, "Health endpoint should return 200 OK");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_stats_endpoint_tracks_sessions() {
    let (addr, relay_server) = start_server().await;
    let url = format!("http://{}/stats", addr);

    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["sessions"], 0);

    let mut client = Client::connect(addr).await;
    client.send(json!({ "sessionId": "stats" })).await;
    client.recv_type("joined").await;

    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["sessions"], 1);

    client.close().await;
    assert!(wait_for_session_removal(&relay_server, "stats").await);
}

#[tokio::test]
async fn test_invalid_join_closes_socket() {
    let (addr, relay_server) = start_server().await;

    let mut client = Client::connect(addr).await;
    client.send(json!({ "room": "movie1" })).await;

    let next = timeout(Duration::from_secs(2), client.read.next())
        .await
        .expect("Server should close the connection");
    assert!(matches!(
        next,
        None | Some(Ok(Message::Close(_))) | Some(Err(_))
    ));
    assert_eq!(relay_server.storage().session_count().await, 0);
}

/// The end-to-end watch party: join, upload, late join, sync, leave.
#[tokio::test]
async fn test_watch_party_scenario() {
    let (addr, relay_server) = start_server().await;

    // A joins an unseen session
    let mut a = Client::connect(addr).await;
    a.send(json!({ "sessionId": "movie1" })).await;
    let joined = a.recv().await;
    assert_eq!(joined["type"], "joined");
    assert!(joined["peerID"].as_str().unwrap().starts_with("peer_"));
    assert_eq!(
        a.recv().await,
        json!({ "type": "sync", "playing": false, "currentTime": 0.0 })
    );

    // A uploads; nothing comes back to A
    a.send(json!({ "type": "videoData", "data": "AQID" })).await;
    a.assert_no_traffic(Duration::from_millis(300)).await;
    let stored = relay_server.storage().get_video("movie1").await.unwrap();
    assert_eq!(stored.as_slice(), &[1, 2, 3]);

    // B joins and gets the video before the sync snapshot
    let mut b = Client::connect(addr).await;
    b.send(json!({ "sessionId": "movie1" })).await;
    let b_joined = b.recv().await;
    assert_eq!(b_joined["type"], "joined");
    let b_id = b_joined["peerID"].as_str().unwrap().to_string();
    assert_eq!(b.recv().await, json!({ "type": "videoData", "data": "AQID" }));
    assert_eq!(
        b.recv().await,
        json!({ "type": "sync", "playing": false, "currentTime": 0.0 })
    );

    // B syncs; A receives it, B does not
    b.send(json!({ "type": "sync", "playing": true, "currentTime": 12.5 }))
        .await;
    let relayed = a.recv_type("sync").await;
    assert_eq!(relayed["playing"], true);
    assert_eq!(relayed["currentTime"], 12.5);
    b.assert_no_traffic(Duration::from_millis(300)).await;

    // A leaves; B sees a roster of just itself
    a.close().await;
    loop {
        let roster = b.recv_type("peerUpdate").await;
        if roster["peers"] == json!([b_id.clone()]) {
            break;
        }
    }

    // B leaves; the session and its video are gone
    b.close().await;
    assert!(wait_for_session_removal(&relay_server, "movie1").await);
    assert!(relay_server.storage().get_video("movie1").await.is_none());
}

#[tokio::test]
async fn test_concurrent_joins_share_one_session() {
    let (addr, relay_server) = start_server().await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client.send(json!({ "sessionId": "crowd" })).await;
            client.recv_type("joined").await;
            client
        }));
    }

    let mut joined = Vec::new();
    for handle in clients {
        joined.push(handle.await.unwrap());
    }

    assert_eq!(relay_server.storage().session_count().await, 1);
    let session = relay_server.storage().get_session("crowd").await.unwrap();
    assert_eq!(session.peer_count().await, 5);

    for client in joined {
        client.close().await;
    }
    assert!(wait_for_session_removal(&relay_server, "crowd").await);
}
