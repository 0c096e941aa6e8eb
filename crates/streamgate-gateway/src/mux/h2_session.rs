//! Native HTTP/2 session handling.
//!
//! Each accepted stream is wrapped directly in an `Http2StreamTransport` and
//! handed to the same resolver path as tunneled WebSocket streams. The
//! protocol already guarantees unique stream numbers per session, so the
//! session's notify registry for the reserved `NOTIFY` command is keyed by
//! those native numbers: a client names its own stream when it notifies.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use http::StatusCode;

use streamgate_core::protocol::envelope::decode_envelope;

use crate::context::{RequestContext, SessionContext};
use crate::dispatch::ServiceResolver;
use crate::obs::GatewayMetrics;
use crate::routing::resolve_target;
use crate::server::H2Connection;
use crate::transport::{Http2NotifyHandle, Http2StreamTransport, StreamTransport};

/// Command header value reserved for out-of-band continuation signaling.
pub const NOTIFY_COMMAND: &str = "NOTIFY";

type NotifyRegistry = Arc<DashMap<u64, Http2NotifyHandle>>;

/// Drive one HTTP/2 session until the peer goes away.
pub async fn run_h2_session(
    mut conn: H2Connection,
    peer: SocketAddr,
    resolver: Arc<dyn ServiceResolver>,
    service_header: String,
    command_header: String,
    metrics: Arc<GatewayMetrics>,
) {
    let session = SessionContext::new();
    let notify_streams: NotifyRegistry = Arc::new(DashMap::new());
    tracing::debug!(%peer, "h2 session open");

    while let Some(accepted) = conn.accept().await {
        match accepted {
            Ok((request, respond)) => {
                let session = Arc::clone(&session);
                let notify_streams = Arc::clone(&notify_streams);
                let resolver = Arc::clone(&resolver);
                let service_header = service_header.clone();
                let command_header = command_header.clone();
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    handle_h2_stream(
                        request,
                        respond,
                        session,
                        notify_streams,
                        resolver,
                        &service_header,
                        &command_header,
                        metrics,
                    )
                    .await;
                });
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "h2 session ended");
                break;
            }
        }
    }

    tracing::debug!(%peer, "h2 session closed");
}

#[allow(clippy::too_many_arguments)]
async fn handle_h2_stream(
    request: http::Request<h2::RecvStream>,
    respond: h2::server::SendResponse<Bytes>,
    session: Arc<SessionContext>,
    notify_streams: NotifyRegistry,
    resolver: Arc<dyn ServiceResolver>,
    service_header: &str,
    command_header: &str,
    metrics: Arc<GatewayMetrics>,
) {
    let is_notify = request
        .headers()
        .get(command_header)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == NOTIFY_COMMAND)
        .unwrap_or(false);
    if is_notify {
        handle_notify(request, respond, &notify_streams).await;
        return;
    }

    let native_id = u64::from(respond.stream_id().as_u32());
    let (transport, notify_handle) = Http2StreamTransport::new(request, respond);
    notify_streams.insert(native_id, notify_handle);
    metrics.streams_opened.inc();

    let (path, params) = resolve_target(transport.incoming_headers(), service_header);
    let ctx = RequestContext::new(session, path, params);

    if let Err(err) = resolver.dispatch(Box::new(transport), ctx).await {
        tracing::debug!(error = %err, "h2 stream dispatch failed");
    }
    notify_streams.remove(&native_id);
}

/// Decode the continuation notification from the request body and forward
/// its payload to the targeted stream. The body reuses the envelope format:
/// a control record naming the target plus an opaque payload.
async fn handle_notify(
    request: http::Request<h2::RecvStream>,
    mut respond: h2::server::SendResponse<Bytes>,
    notify_streams: &NotifyRegistry,
) {
    let (_, mut body) = request.into_parts();
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.data().await {
        match chunk {
            Ok(data) => {
                let _ = body.flow_control().release_capacity(data.len());
                buf.extend_from_slice(&data);
            }
            Err(_) => {
                send_status(&mut respond, StatusCode::NOT_FOUND);
                return;
            }
        }
    }

    let delivered = decode_envelope(&buf)
        .ok()
        .and_then(|envelope| {
            let target = envelope.control.stream_id?;
            let handle = notify_streams.get(&target)?;
            handle.notify_continue(envelope.payload);
            Some(())
        })
        .is_some();

    if delivered {
        send_status(&mut respond, StatusCode::NO_CONTENT);
    } else {
        send_status(&mut respond, StatusCode::NOT_FOUND);
    }
}

fn send_status(respond: &mut h2::server::SendResponse<Bytes>, status: StatusCode) {
    let mut response = http::Response::new(());
    *response.status_mut() = status;
    if let Err(e) = respond.send_response(response, true) {
        tracing::debug!(error = %e, "notify reply failed");
    }
}
