use std::path::PathBuf;
use std::sync::Arc;
use warp::Filter;

use super::relay_websocket;
use crate::relay::RelayServer;

/// Every route the server exposes: the relay socket, health, stats and the
/// static frontend as a fallback.
pub fn routes(
    relay_server: Arc<RelayServer>,
    static_dir: PathBuf,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    relay_websocket_route(relay_server.clone())
        .or(relay_health_check())
        .or(relay_stats_endpoint(relay_server))
        .or(warp::fs::dir(static_dir))
}

pub fn relay_websocket_route(
    relay_server: Arc<RelayServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_relay_server(relay_server))
        .map(|ws: warp::ws::Ws, relay_server: Arc<RelayServer>| {
            ws.on_upgrade(move |websocket| {
                relay_websocket::handle_relay_websocket(websocket, relay_server)
            })
        })
}

pub fn relay_health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })))
}

pub fn relay_stats_endpoint(
    relay_server: Arc<RelayServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_relay_server(relay_server))
        .and_then(|relay_server: Arc<RelayServer>| async move {
            let sessions = relay_server.storage().session_count().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&serde_json::json!({
                "sessions": sessions
            })))
        })
}

fn with_relay_server(
    relay_server: Arc<RelayServer>,
) -> impl Filter<Extract = (Arc<RelayServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || relay_server.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn relay_server() -> Arc<RelayServer> {
        Arc::new(RelayServer::new(RelayConfig::default()))
    }

    #[tokio::test]
    async fn test_health_check() {
        let resp = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&relay_health_check())
            .await;

        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_stats_counts_sessions() {
        let relay_server = relay_server();
        relay_server.storage().create_or_get_session("movie1").await;
        relay_server.storage().create_or_get_session("movie2").await;

        let resp = warp::test::request()
            .method("GET")
            .path("/stats")
            .reply(&relay_stats_endpoint(relay_server))
            .await;

        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["sessions"], 2);
    }

    #[tokio::test]
    async fn test_websocket_route_rejects_plain_get() {
        let resp = warp::test::request()
            .method("GET")
            .path("/ws")
            .reply(&relay_websocket_route(relay_server()))
            .await;

        assert!(resp.status().is_client_error());
    }
}
