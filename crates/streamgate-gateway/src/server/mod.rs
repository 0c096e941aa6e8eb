//! TLS transport server.
//!
//! Owns the listening socket, terminates TLS, and branches on the negotiated
//! ALPN protocol: `h2` connections get a native HTTP/2 session, everything
//! else falls to the HTTP/1.1 lane where WebSocket upgrades are accepted and
//! plain requests are rejected. Which of the two channel kinds a client used
//! is invisible past the [`ConnectionSink`] boundary.

pub mod h1;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::WebSocketStream;

use streamgate_core::{GateError, Result};

use crate::config::GatewayConfig;

/// Byte stream a WebSocket connection can run over.
pub trait DuplexIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexIo for T {}

pub type TlsServerStream = tokio_rustls::server::TlsStream<TcpStream>;
pub type WsStream = WebSocketStream<Box<dyn DuplexIo>>;
pub type H2Connection = h2::server::Connection<Box<dyn DuplexIo>, Bytes>;

/// Receives every connection the server accepts, already classified.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn on_ws_connection(&self, ws: WsStream, peer: SocketAddr);
    async fn on_h2_session(&self, conn: H2Connection, peer: SocketAddr);
    /// An HTTP/1.1 request that is not a WebSocket upgrade. The server has
    /// already written the rejection; this is notification only.
    fn on_legacy_request(&self, method: &str, target: &str);
}

/// The listening front of the gateway.
pub struct TransportServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    allow_http1: bool,
    use_websockets: bool,
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Bind the listener and build the TLS acceptor. Missing or unreadable
    /// key material is fatal here, before any connection is accepted.
    pub async fn bind(cfg: &GatewayConfig) -> Result<Self> {
        let mut allow_http1 = cfg.gateway.allow_http1;
        if cfg.gateway.use_websockets && !allow_http1 {
            tracing::warn!("websockets require the HTTP/1.1 lane; enabling it");
            allow_http1 = true;
        }

        let acceptor = tls::build_tls_acceptor(&cfg.tls, allow_http1)?;
        let listener = TcpListener::bind(&cfg.gateway.listen).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            acceptor,
            allow_http1,
            use_websockets: cfg.gateway.use_websockets,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, spawning one task per connection.
    pub async fn listen(self, sink: Arc<dyn ConnectionSink>) -> Result<()> {
        tracing::info!(listen = %self.local_addr, "transport server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let acceptor = self.acceptor.clone();
            let sink = Arc::clone(&sink);
            let allow_http1 = self.allow_http1;
            let use_websockets = self.use_websockets;
            tokio::spawn(async move {
                if let Err(err) =
                    handle_connection(stream, peer, acceptor, sink, allow_http1, use_websockets)
                        .await
                {
                    tracing::debug!(%peer, error = %err, "connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    sink: Arc<dyn ConnectionSink>,
    allow_http1: bool,
    use_websockets: bool,
) -> Result<()> {
    let tls = acceptor
        .accept(stream)
        .await
        .map_err(|e| GateError::Internal(format!("tls accept: {e}")))?;

    let alpn = tls.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
    match alpn.as_deref() {
        Some(b"h2") => {
            let io: Box<dyn DuplexIo> = Box::new(tls);
            let conn = h2::server::handshake(io)
                .await
                .map_err(|e| GateError::Internal(format!("h2 handshake: {e}")))?;
            sink.on_h2_session(conn, peer).await;
            Ok(())
        }
        _ if allow_http1 => h1::serve_http1(tls, peer, sink, use_websockets).await,
        _ => Err(GateError::Internal("no usable ALPN protocol".into())),
    }
}
