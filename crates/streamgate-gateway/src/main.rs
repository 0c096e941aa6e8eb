//! streamgate gateway binary.
//!
//! One listener, two channel kinds: native HTTP/2 streams and a CBOR-framed
//! sub-protocol tunneled in WebSocket connections, both resolved through the
//! same command pipeline.

use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use streamgate_gateway::commands::{list_command, MemoryDataSource};
use streamgate_gateway::dispatch::CommandDispatcher;
use streamgate_gateway::mux::Multiplexer;
use streamgate_gateway::obs::GatewayMetrics;
use streamgate_gateway::routing::Router;
use streamgate_gateway::server::TransportServer;
use streamgate_gateway::config;

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "streamgate.yaml".to_string());
    let cfg = config::load_from_file(&config_path).expect("config load failed");

    let source = Arc::new(MemoryDataSource::new(vec![
        json!({"title": "Alien", "year": 1979}),
        json!({"title": "Blade Runner", "year": 1982}),
        json!({"title": "Stalker", "year": 1979}),
        json!({"title": "Brazil", "year": 1985}),
    ]));

    let mut router = Router::new();
    router.register("items", list_command(source).expect("item command"));

    let resolver = Arc::new(CommandDispatcher::new(router));
    let metrics = Arc::new(GatewayMetrics::default());
    let mux = Arc::new(Multiplexer::new(resolver, &cfg.gateway, metrics));

    let server = TransportServer::bind(&cfg).await.expect("failed to bind");
    tracing::info!(listen = %server.local_addr(), "streamgate starting");
    server.listen(mux).await.expect("server failed");
}
