// Watch Relay CLI
// Talks to a running relay: health checks, manual joins/uploads/syncs and scripted validation scenarios

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Watch Relay CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Show active session count
    Stats,

    /// Join a session and print incoming traffic
    Join {
        /// Session to join
        #[arg(long)]
        session: String,

        /// Keep connection alive (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Join a session and upload a video file
    Upload {
        #[arg(long)]
        session: String,

        /// Video file to send
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Join a session and send one playback update
    Sync {
        #[arg(long)]
        session: String,

        #[arg(short, long)]
        playing: Option<bool>,

        /// Playback position in seconds
        #[arg(short, long)]
        time: Option<f64>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

const SCENARIOS: [(&str, &str); 6] = [
    ("connection", "Basic WebSocket connection test"),
    ("join", "Join handshake and greeting"),
    ("invalid-join", "Join without a session id is rejected"),
    ("sync-relay", "Sync reaches other peers but is not echoed"),
    ("video-relay", "Video upload reaches peers and late joiners"),
    ("watch-party", "Full two-peer session lifecycle"),
];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Stats => {
            check_stats(&cli.server).await;
        }
        Commands::Join { session, keep_alive } => {
            join_session(&cli.server, session, *keep_alive).await;
        }
        Commands::Upload { session, file } => {
            upload_video(&cli.server, session, file).await;
        }
        Commands::Sync { session, playing, time } => {
            send_sync(&cli.server, session, *playing, *time).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

/// A joined relay connection.
struct RelayClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    peer_id: String,
}

impl RelayClient {
    async fn join(server: &str, session: &str) -> Result<Self, String> {
        let url = format!("ws://{}/ws", server);
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| format!("Cannot connect to {}: {}", url, e))?;
        let (write, read) = ws_stream.split();

        let mut client = Self {
            write,
            read,
            peer_id: String::new(),
        };
        client.send(json!({ "sessionId": session })).await?;

        let joined = client
            .recv()
            .await
            .ok_or_else(|| "No joined acknowledgment".to_string())?;
        if joined["type"] != "joined" {
            return Err(format!("Expected joined, got {}", joined));
        }
        client.peer_id = joined["peerID"].as_str().unwrap_or_default().to_string();

        Ok(client)
    }

    async fn send(&mut self, value: Value) -> Result<(), String> {
        self.write
            .send(Message::Text(value.to_string()))
            .await
            .map_err(|e| format!("Failed to send message: {}", e))
    }

    /// Next JSON message, or `None` on timeout or close.
    async fn recv(&mut self) -> Option<Value> {
        loop {
            match timeout(RESPONSE_TIMEOUT, self.read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
                Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
                _ => return None,
            }
        }
    }

    /// Skips messages until one of type `kind` arrives.
    async fn recv_type(&mut self, kind: &str) -> Option<Value> {
        while let Some(message) = self.recv().await {
            if message["type"] == kind {
                return Some(message);
            }
        }
        None
    }

    /// True if no message other than a roster update arrives within `window`.
    async fn quiet_for(&mut self, window: Duration) -> bool {
        loop {
            match timeout(window, self.read.next()).await {
                Err(_) => return true,
                Ok(Some(Ok(Message::Text(text)))) => {
                    let value: Value = serde_json::from_str(&text).unwrap_or_default();
                    if value["type"] != "peerUpdate" {
                        return false;
                    }
                }
                Ok(_) => return false,
            }
        }
    }

    async fn close(mut self) {
        let _ = self.write.close().await;
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_stats(server: &str) {
    println!("{}", "Fetching relay stats...".cyan());

    let url = format!("http://{}/stats", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(body) => println!("  Active sessions: {}", body["sessions"]),
            Err(e) => println!("{} Invalid stats response: {}", "✗".red(), e),
        },
        Ok(resp) => println!("{} Stats fetch failed: {}", "✗".red(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn join_session(server: &str, session: &str, keep_alive: bool) {
    println!("{}", "Joining session...".cyan());
    println!("  Session: {}", session);

    let mut client = match RelayClient::join(server, session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    println!("{} Joined as {}", "✓".green(), client.peer_id.green().bold());

    if !keep_alive {
        while let Some(message) = client.recv().await {
            print_incoming(&message);
        }
        client.close().await;
        return;
    }

    println!("\n{}", "Connection is being kept alive...".yellow());
    println!("Press {} to disconnect.", "Ctrl+C".bold());

    loop {
        tokio::select! {
            msg = client.read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(message) => print_incoming(&message),
                            Err(_) => println!("{} {}", "◀".green(), text.bright_white()),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        println!("{} Server closed the connection", "✗".yellow());
                        break;
                    }
                    Some(Err(e)) => {
                        println!("{} Connection error: {}", "✗".red(), e);
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Disconnecting...".yellow());
                break;
            }
        }
    }

    client.close().await;
}

fn print_incoming(message: &Value) {
    match message["type"].as_str() {
        Some("videoData") => {
            let size = message["data"].as_str().map(str::len).unwrap_or(0);
            println!("{} videoData ({} base64 chars)", "◀".green(), size);
        }
        _ => println!("{} {}", "◀".green(), message.to_string().bright_white()),
    }
}

async fn upload_video(server: &str, session: &str, file: &PathBuf) {
    println!("{}", "Uploading video...".cyan());

    let bytes = match tokio::fs::read(file).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("{} Cannot read {}: {}", "✗".red(), file.display(), e);
            return;
        }
    };
    if bytes.is_empty() {
        println!("{} {} is empty; the relay ignores empty uploads", "✗".red(), file.display());
        return;
    }

    let mut client = match RelayClient::join(server, session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
    match client.send(json!({ "type": "videoData", "data": data })).await {
        Ok(()) => println!(
            "{} Sent {} bytes to session {}",
            "✓".green(),
            bytes.len(),
            session.bold()
        ),
        Err(e) => println!("{} {}", "✗".red(), e),
    }

    // Give the relay a moment to store the payload before our leave could empty the session
    sleep(Duration::from_millis(500)).await;
    client.close().await;
}

async fn send_sync(server: &str, session: &str, playing: Option<bool>, time: Option<f64>) {
    println!("{}", "Sending sync...".cyan());

    let mut client = match RelayClient::join(server, session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    let mut message = json!({ "type": "sync" });
    if let Some(playing) = playing {
        message["playing"] = json!(playing);
    }
    if let Some(time) = time {
        message["currentTime"] = json!(time);
    }

    match client.send(message).await {
        Ok(()) => println!("{} Sync sent", "✓".green()),
        Err(e) => println!("{} {}", "✗".red(), e),
    }

    sleep(Duration::from_millis(200)).await;
    client.close().await;
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    for (name, description) in SCENARIOS {
        println!("  {} - {}", name.cyan(), description);
    }
    println!("\nExample: relay-cli validate --scenario watch-party");
}

async fn run_named(server: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "connection" => validate_connection(server).await,
        "join" => validate_join(server).await,
        "invalid-join" => validate_invalid_join(server).await,
        "sync-relay" => validate_sync_relay(server).await,
        "video-relay" => validate_video_relay(server).await,
        "watch-party" => validate_watch_party(server).await,
        _ => return None,
    };
    Some(result)
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match run_named(server, scenario).await {
        Some(true) => println!("\n{} Scenario passed", "✓".green().bold()),
        Some(false) => println!("\n{} Scenario failed", "✗".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for (scenario, _) in SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if run_named(server, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(500)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed!".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

/// Unique session name so scenarios never collide with live sessions.
fn scratch_session(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("validate-{}-{}", prefix, nanos)
}

fn check(ok: bool, what: &str) -> bool {
    if ok {
        println!("  {} {}", "✓".green(), what);
    } else {
        println!("  {} {}", "✗".red(), what);
    }
    ok
}

async fn validate_connection(server: &str) -> bool {
    let url = format!("ws://{}/ws", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection successful", "✓".green());
            drop(ws_stream);
            true
        }
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_join(server: &str) -> bool {
    let session = scratch_session("join");
    let mut client = match RelayClient::join(server, &session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return false;
        }
    };

    let mut ok = check(client.peer_id.starts_with("peer_"), "joined carries a peer id");
    let sync = client.recv().await.unwrap_or_default();
    ok &= check(
        sync["type"] == "sync" && sync["playing"] == false && sync["currentTime"] == 0.0,
        "initial sync is paused at 0",
    );
    let roster = client.recv().await.unwrap_or_default();
    ok &= check(
        roster["peers"] == json!([client.peer_id.clone()]),
        "roster lists only this peer",
    );

    client.close().await;
    ok
}

async fn validate_invalid_join(server: &str) -> bool {
    let url = format!("ws://{}/ws", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            return false;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if write
        .send(Message::Text(json!({ "sessionId": "" }).to_string()))
        .await
        .is_err()
    {
        println!("{} Failed to send join", "✗".red());
        return false;
    }

    let closed = match timeout(RESPONSE_TIMEOUT, read.next()).await {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => true,
        _ => false,
    };
    check(closed, "server closes the connection")
}

async fn validate_sync_relay(server: &str) -> bool {
    let session = scratch_session("sync");
    let (mut a, mut b) = match join_pair(server, &session).await {
        Some(pair) => pair,
        None => return false,
    };

    if b
        .send(json!({ "type": "sync", "playing": true, "currentTime": 12.5 }))
        .await
        .is_err()
    {
        return false;
    }

    let received = loop {
        match a.recv_type("sync").await {
            Some(sync) if sync["playing"] == true => break Some(sync),
            Some(_) => continue,
            None => break None,
        }
    };
    let mut ok = check(
        received.map(|s| s["currentTime"] == 12.5).unwrap_or(false),
        "peer A receives the update",
    );
    ok &= check(b.quiet_for(Duration::from_millis(500)).await, "peer B gets no echo");

    a.close().await;
    b.close().await;
    ok
}

async fn validate_video_relay(server: &str) -> bool {
    let session = scratch_session("video");
    let (mut a, mut b) = match join_pair(server, &session).await {
        Some(pair) => pair,
        None => return false,
    };

    if a
        .send(json!({ "type": "videoData", "data": [1, 2, 3] }))
        .await
        .is_err()
    {
        return false;
    }

    let video = b.recv_type("videoData").await.unwrap_or_default();
    let mut ok = check(video["data"] == "AQID", "peer B receives the bytes");

    let mut late = match RelayClient::join(server, &session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return false;
        }
    };
    let first = late.recv().await.unwrap_or_default();
    ok &= check(
        first["type"] == "videoData" && first["data"] == "AQID",
        "late joiner gets the video first",
    );

    a.close().await;
    b.close().await;
    late.close().await;
    ok
}

async fn validate_watch_party(server: &str) -> bool {
    let session = scratch_session("party");

    let mut a = match RelayClient::join(server, &session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return false;
        }
    };
    let greeting = a.recv().await.unwrap_or_default();
    let mut ok = check(greeting["type"] == "sync", "A: joined then sync, no video");

    ok &= a
        .send(json!({ "type": "videoData", "data": "AQID" }))
        .await
        .is_ok();
    ok &= check(a.quiet_for(Duration::from_millis(300)).await, "A: upload not echoed");

    let mut b = match RelayClient::join(server, &session).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return false;
        }
    };
    let video = b.recv().await.unwrap_or_default();
    ok &= check(video["data"] == "AQID", "B: receives stored video");
    let sync = b.recv().await.unwrap_or_default();
    ok &= check(
        sync["type"] == "sync" && sync["playing"] == false,
        "B: receives paused sync",
    );

    ok &= b
        .send(json!({ "type": "sync", "playing": true, "currentTime": 12.5 }))
        .await
        .is_ok();
    let relayed = a.recv_type("sync").await.unwrap_or_default();
    ok &= check(
        relayed["playing"] == true && relayed["currentTime"] == 12.5,
        "A: receives B's sync",
    );

    let b_id = b.peer_id.clone();
    a.close().await;
    let roster = loop {
        match b.recv_type("peerUpdate").await {
            Some(update) if update["peers"] == json!([b_id.clone()]) => break true,
            Some(_) => continue,
            None => break false,
        }
    };
    ok &= check(roster, "B: roster shrinks to itself");

    b.close().await;
    ok
}

async fn join_pair(server: &str, session: &str) -> Option<(RelayClient, RelayClient)> {
    let a = RelayClient::join(server, session).await;
    let b = RelayClient::join(server, session).await;
    match (a, b) {
        (Ok(a), Ok(b)) => Some((a, b)),
        (Err(e), _) | (_, Err(e)) => {
            println!("{} {}", "✗".red(), e);
            None
        }
    }
}
