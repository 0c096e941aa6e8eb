//! HTTP/1.1 lane.
//!
//! Only one thing is served here: the WebSocket upgrade that carries the
//! tunneled sub-protocol. Every other HTTP/1.1 request gets a raw
//! `501 Not Implemented` and the connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use streamgate_core::{GateError, Result};

use super::{ConnectionSink, DuplexIo, TlsServerStream};

/// Cap on the request head; anything longer is not a handshake we serve.
const MAX_HEAD_BYTES: usize = 16 * 1024;

const REJECT_501: &[u8] = b"HTTP/1.1 501 Not Implemented\r\n\
content-type: text/plain\r\n\
content-length: 15\r\n\
connection: close\r\n\
\r\n\
Not implemented";

struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn is_websocket_upgrade(&self) -> bool {
        self.method == "GET"
            && self
                .header("upgrade")
                .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
            && self.header("sec-websocket-key").is_some()
    }
}

/// Serve one connection on the HTTP/1.1 lane.
///
/// A WebSocket client sends nothing past the request head until it has seen
/// the `101`, so reading up to the blank line consumes the whole handshake.
pub async fn serve_http1(
    mut stream: TlsServerStream,
    peer: SocketAddr,
    sink: Arc<dyn ConnectionSink>,
    use_websockets: bool,
) -> Result<()> {
    let head = read_request_head(&mut stream).await?;

    if use_websockets && head.is_websocket_upgrade() {
        // header presence verified in is_websocket_upgrade
        let Some(key) = head.header("sec-websocket-key") else {
            return Err(GateError::Internal("upgrade without key".into()));
        };
        let accept = derive_accept_key(key.as_bytes());
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             upgrade: websocket\r\n\
             connection: Upgrade\r\n\
             sec-websocket-accept: {accept}\r\n\
             \r\n"
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        let io: Box<dyn DuplexIo> = Box::new(stream);
        let ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
        sink.on_ws_connection(ws, peer).await;
        return Ok(());
    }

    sink.on_legacy_request(&head.method, &head.target);
    stream.write_all(REJECT_501).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

async fn read_request_head(stream: &mut TlsServerStream) -> Result<RequestHead> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GateError::Internal("connection closed mid-head".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(GateError::Internal("request head too large".into()));
        }
    }
    parse_request_head(&buf)
}

fn parse_request_head(buf: &[u8]) -> Result<RequestHead> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| GateError::Internal("non-utf8 request head".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| GateError::Internal("empty request head".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| GateError::Internal("missing method".into()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| GateError::Internal("missing request target".into()))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    Ok(RequestHead {
        method,
        target,
        headers,
    })
}
