//! Per-WebSocket-connection demultiplexing.
//!
//! One reader task owns the connection's stream map (single-writer rule);
//! outbound frames from every logical stream funnel through one writer
//! channel. Envelopes are processed strictly in arrival order; dispatched
//! streams run as their own tasks and interleave freely.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use streamgate_core::error::{WIRE_INVALID_DATA, WIRE_MISSING_HEADERS, WIRE_UNKNOWN_STREAM};
use streamgate_core::protocol::envelope::{
    decode_envelope, decode_header_block, encode_envelope, ControlRecord, Envelope,
};
use streamgate_core::protocol::identity::allocate_stream_id;

use crate::context::{RequestContext, SessionContext};
use crate::dispatch::ServiceResolver;
use crate::obs::GatewayMetrics;
use crate::routing::resolve_target;
use crate::server::WsStream;
use crate::transport::{StreamTransport, WsStreamHandle, WsStreamTransport};

/// Verdict for one inbound WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// Undecodable leading control record: the connection loop announces
    /// `INVALID_DATA` and closes.
    Fatal,
}

/// Demultiplexing state of one WebSocket connection.
pub struct WsConnectionState {
    streams: HashMap<u64, WsStreamHandle>,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    done_tx: mpsc::UnboundedSender<u64>,
    session: Arc<SessionContext>,
    resolver: Arc<dyn ServiceResolver>,
    service_header: String,
    metrics: Arc<GatewayMetrics>,
}

impl WsConnectionState {
    pub fn new(
        out_tx: mpsc::UnboundedSender<Vec<u8>>,
        done_tx: mpsc::UnboundedSender<u64>,
        resolver: Arc<dyn ServiceResolver>,
        service_header: String,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            streams: HashMap::new(),
            out_tx,
            done_tx,
            session: SessionContext::new(),
            resolver,
            service_header,
            metrics,
        }
    }

    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }

    /// Drop a finished stream from the map. Called by the connection loop
    /// when the stream's dispatch task completes, so no reference to the
    /// old identity remains when it leaves.
    pub fn remove_stream(&mut self, stream_id: u64) {
        self.streams.remove(&stream_id);
    }

    /// Process one inbound message per the demultiplexing algorithm.
    pub fn handle_message(&mut self, bytes: Bytes) -> FrameOutcome {
        let envelope = match decode_envelope(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(error = %err, "undecodable envelope");
                self.metrics.frame_errors.inc();
                return FrameOutcome::Fatal;
            }
        };

        match envelope.control.stream_id {
            None => self.open_stream(envelope),
            Some(stream_id) => self.continue_stream(stream_id, envelope),
        }
        FrameOutcome::Continue
    }

    fn open_stream(&mut self, envelope: Envelope) {
        let headers = match decode_header_block(&envelope.payload) {
            Ok(headers) => headers,
            Err(_) => {
                self.metrics.frame_errors.inc();
                let stream_id = allocate_stream_id(|id| self.streams.contains_key(&id));
                self.send_reply(ControlRecord::error_reply(
                    Some(stream_id),
                    WIRE_MISSING_HEADERS,
                ));
                return;
            }
        };

        let stream_id = allocate_stream_id(|id| self.streams.contains_key(&id));
        let (transport, handle) =
            WsStreamTransport::pair(stream_id, self.out_tx.clone(), headers);

        let (path, params) = resolve_target(transport.incoming_headers(), &self.service_header);
        let ctx = RequestContext::new(Arc::clone(&self.session), path, params);

        let is_end = envelope.control.is_end;
        if is_end {
            // Fully contained bodiless request: the event channel buffers
            // the end marker until the dispatched consumer attaches.
            handle.signal_end();
        }
        self.streams.insert(stream_id, handle);
        self.metrics.streams_opened.inc();

        let resolver = Arc::clone(&self.resolver);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = resolver.dispatch(Box::new(transport), ctx).await {
                tracing::debug!(stream_id, error = %err, "stream dispatch failed");
            }
            let _ = done_tx.send(stream_id);
        });
    }

    fn continue_stream(&mut self, stream_id: u64, envelope: Envelope) {
        let Some(handle) = self.streams.get(&stream_id) else {
            self.metrics.unknown_streams.inc();
            self.send_reply(ControlRecord::error_reply(
                Some(stream_id),
                WIRE_UNKNOWN_STREAM,
            ));
            return;
        };
        if envelope.control.is_end {
            handle.signal_end();
        }
        if !envelope.payload.is_empty() {
            handle.deliver_chunk(envelope.payload);
        }
    }

    fn send_reply(&self, control: ControlRecord) {
        match encode_envelope(&control, &[]) {
            Ok(frame) => {
                let _ = self.out_tx.send(frame);
            }
            Err(err) => tracing::error!(error = %err, "reply encode failed"),
        }
    }
}

/// Drive one upgraded WebSocket connection until it closes.
pub async fn run_ws_connection(
    ws: WsStream,
    peer: SocketAddr,
    resolver: Arc<dyn ServiceResolver>,
    service_header: String,
    metrics: Arc<GatewayMetrics>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();

    let mut state = WsConnectionState::new(out_tx, done_tx, resolver, service_header, metrics);
    tracing::debug!(%peer, "websocket connection open");

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(frame) => {
                        if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // finished stream tasks
            Some(stream_id) = done_rx.recv() => {
                state.remove_stream(stream_id);
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break; };
                let Ok(msg) = incoming else { break; };
                match msg {
                    Message::Binary(bytes) => {
                        if state.handle_message(bytes) == FrameOutcome::Fatal {
                            announce_fatal(&mut ws_tx, &mut out_rx).await;
                            break;
                        }
                    }
                    Message::Text(_) => {
                        // the sub-protocol is binary-only
                        if state.handle_message(Bytes::new()) == FrameOutcome::Fatal {
                            announce_fatal(&mut ws_tx, &mut out_rx).await;
                            break;
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                    Message::Frame(_) => {}
                }
            }
        }
    }

    tracing::debug!(%peer, live = state.live_streams(), "websocket connection closed");
}

/// Flush whatever the live streams already queued, then announce the fatal
/// condition. The announcement is a text message, unlike every sub-protocol
/// frame, so even a peer that lost envelope framing can read it.
async fn announce_fatal(
    ws_tx: &mut futures_util::stream::SplitSink<WsStream, Message>,
    out_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Ok(frame) = out_rx.try_recv() {
        let _ = ws_tx.send(Message::Binary(frame.into())).await;
    }
    let _ = ws_tx.send(Message::Text(WIRE_INVALID_DATA.into())).await;
    let _ = ws_tx.send(Message::Close(None)).await;
}
