use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use watch_relay::api;
use watch_relay::config::Config;
use watch_relay::relay::RelayServer;

#[tokio::main]
async fn main() {
    // Loads .env first, so RUST_LOG and LOG_FORMAT from it reach the subscriber
    let config = Config::from_env();
    init_tracing();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let relay_server = Arc::new(RelayServer::new(config.relay.clone()));
    let routes = api::relay_routes::routes(relay_server, config.server.static_dir.clone());

    let (ip, port) = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = port,
        static_dir = %config.server.static_dir.display(),
        queue_capacity = config.relay.queue_capacity,
        "Watch relay starting"
    );

    warp::serve(routes).run((ip, port)).await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
