use std::sync::Arc;
use futures::StreamExt;
use warp::ws::WebSocket;

use crate::relay::RelayServer;

pub async fn handle_relay_websocket(websocket: WebSocket, relay_server: Arc<RelayServer>) {
    tracing::info!("New relay WebSocket connection established");

    let (ws_sender, ws_receiver) = websocket.split();
    relay_server.handle_connection(ws_receiver, ws_sender).await;

    tracing::info!("Relay WebSocket connection closed");
}
