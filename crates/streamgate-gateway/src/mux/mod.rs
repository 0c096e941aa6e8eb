//! Sub-protocol multiplexer.
//!
//! Reproduces HTTP/2-style multiplexing — many logical streams over one
//! physical connection — inside a WebSocket, using the minimum mechanism
//! needed for correct demultiplexing: an explicit stream identity plus an
//! end flag. Native HTTP/2 sessions are driven through the same resolver
//! path so the rest of the stack never sees the channel kind.

pub mod h2_session;
pub mod ws_conn;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GatewaySection;
use crate::dispatch::ServiceResolver;
use crate::obs::GatewayMetrics;
use crate::server::{ConnectionSink, H2Connection, WsStream};

/// Entry point for every connection the transport server accepts.
pub struct Multiplexer {
    resolver: Arc<dyn ServiceResolver>,
    service_header: String,
    command_header: String,
    metrics: Arc<GatewayMetrics>,
}

impl Multiplexer {
    pub fn new(
        resolver: Arc<dyn ServiceResolver>,
        gateway: &GatewaySection,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            resolver,
            service_header: gateway.service_header.clone(),
            command_header: gateway.command_header.clone(),
            metrics,
        }
    }
}

#[async_trait]
impl ConnectionSink for Multiplexer {
    async fn on_ws_connection(&self, ws: WsStream, peer: SocketAddr) {
        self.metrics.ws_connections.inc();
        ws_conn::run_ws_connection(
            ws,
            peer,
            Arc::clone(&self.resolver),
            self.service_header.clone(),
            Arc::clone(&self.metrics),
        )
        .await;
    }

    async fn on_h2_session(&self, conn: H2Connection, peer: SocketAddr) {
        self.metrics.h2_sessions.inc();
        h2_session::run_h2_session(
            conn,
            peer,
            Arc::clone(&self.resolver),
            self.service_header.clone(),
            self.command_header.clone(),
            Arc::clone(&self.metrics),
        )
        .await;
    }

    fn on_legacy_request(&self, method: &str, target: &str) {
        self.metrics.legacy_rejected.inc();
        tracing::debug!(%method, %target, "rejecting non-h2 request");
    }
}
