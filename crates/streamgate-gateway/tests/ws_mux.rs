#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use streamgate_core::error::{WIRE_INVALID_DATA, WIRE_MISSING_HEADERS, WIRE_UNKNOWN_STREAM};
use streamgate_core::protocol::envelope::{
    decode_envelope, encode_envelope, encode_header_block, ControlRecord,
};
use streamgate_core::protocol::Headers;
use streamgate_core::Result;
use streamgate_gateway::context::RequestContext;
use streamgate_gateway::dispatch::ServiceResolver;
use streamgate_gateway::mux::ws_conn::{FrameOutcome, WsConnectionState};
use streamgate_gateway::obs::GatewayMetrics;
use streamgate_gateway::transport::{RespondOptions, StreamEvent, StreamTransport};

use async_trait::async_trait;

/// Resolver that responds immediately and then drains incoming events until
/// the stream ends, recording what it saw.
#[derive(Default)]
struct DrainResolver {
    dispatches: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

#[async_trait]
impl ServiceResolver for DrainResolver {
    async fn dispatch(
        &self,
        mut transport: Box<dyn StreamTransport>,
        ctx: RequestContext,
    ) -> Result<()> {
        let mut headers = Headers::new();
        headers.insert(":status".into(), "200".into());
        headers.insert("content-type".into(), "application/json".into());
        transport.respond(headers, RespondOptions::default())?;

        let mut seen = Vec::new();
        let mut events = transport.take_events().expect("events taken once");
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Data(data) => {
                    seen.push(format!("data:{}", String::from_utf8_lossy(&data)));
                }
                StreamEvent::End => {
                    seen.push("end".into());
                    break;
                }
                StreamEvent::Error(e) => {
                    seen.push(format!("error:{e}"));
                    break;
                }
            }
        }
        transport.end()?;

        self.dispatches
            .lock()
            .unwrap()
            .push((ctx.path().to_string(), seen));
        Ok(())
    }
}

struct Harness {
    state: WsConnectionState,
    out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    done_rx: mpsc::UnboundedReceiver<u64>,
    resolver: Arc<DrainResolver>,
    metrics: Arc<GatewayMetrics>,
}

fn harness() -> Harness {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let resolver = Arc::new(DrainResolver::default());
    let metrics = Arc::new(GatewayMetrics::default());
    let state = WsConnectionState::new(
        out_tx,
        done_tx,
        Arc::clone(&resolver) as Arc<dyn ServiceResolver>,
        "service".into(),
        Arc::clone(&metrics),
    );
    Harness {
        state,
        out_rx,
        done_rx,
        resolver,
        metrics,
    }
}

fn open_frame(service: &str, is_end: bool) -> Bytes {
    let mut headers = Headers::new();
    headers.insert("service".into(), service.into());
    let block = encode_header_block(&headers).unwrap();
    let control = ControlRecord {
        stream_id: None,
        is_end,
        error: None,
    };
    Bytes::from(encode_envelope(&control, &block).unwrap())
}

fn continue_frame(stream_id: u64, payload: &[u8], is_end: bool) -> Bytes {
    let control = ControlRecord {
        stream_id: Some(stream_id),
        is_end,
        error: None,
    };
    Bytes::from(encode_envelope(&control, payload).unwrap())
}

async fn next_frame(out_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    timeout(Duration::from_secs(1), out_rx.recv())
        .await
        .expect("frame within deadline")
        .expect("writer channel open")
}

#[tokio::test]
async fn concurrent_opens_get_distinct_nonzero_ids() {
    let mut h = harness();

    assert_eq!(h.state.handle_message(open_frame("items", true)), FrameOutcome::Continue);
    assert_eq!(h.state.handle_message(open_frame("items", true)), FrameOutcome::Continue);
    assert_eq!(h.state.live_streams(), 2);

    // each dispatch writes a header frame and an end frame, in whichever
    // order the two tasks interleave; collect the identities they carry
    let mut ids = std::collections::HashSet::new();
    for _ in 0..4 {
        let env = decode_envelope(&next_frame(&mut h.out_rx).await).unwrap();
        let id = env.control.stream_id.unwrap();
        assert_ne!(id, 0);
        ids.insert(id);
    }
    assert_eq!(ids.len(), 2);
    assert_eq!(h.metrics.streams_opened.get(), 2);
}

#[tokio::test]
async fn open_with_end_yields_exactly_one_end_event() {
    let mut h = harness();
    h.state.handle_message(open_frame("items", true));

    // dispatch completion is signaled through the done channel
    let finished = timeout(Duration::from_secs(1), h.done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    h.state.remove_stream(finished);
    assert_eq!(h.state.live_streams(), 0);

    let dispatches = h.resolver.dispatches.lock().unwrap();
    assert_eq!(dispatches.len(), 1);
    let (path, events) = &dispatches[0];
    assert_eq!(path, "items");
    assert_eq!(events, &vec!["end".to_string()]);
}

#[tokio::test]
async fn chunks_arrive_in_order_and_empty_payloads_are_not_chunks() {
    let mut h = harness();
    h.state.handle_message(open_frame("items", false));

    // learn the allocated identity from the response header frame
    let reply = decode_envelope(&next_frame(&mut h.out_rx).await).unwrap();
    let id = reply.control.stream_id.unwrap();

    h.state.handle_message(continue_frame(id, b"alpha", false));
    h.state.handle_message(continue_frame(id, b"beta", false));
    h.state.handle_message(continue_frame(id, &[], true));

    let finished = timeout(Duration::from_secs(1), h.done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished, id);

    let dispatches = h.resolver.dispatches.lock().unwrap();
    let (_, events) = &dispatches[0];
    assert_eq!(
        events,
        &vec![
            "data:alpha".to_string(),
            "data:beta".to_string(),
            "end".to_string()
        ]
    );
}

#[tokio::test]
async fn unknown_stream_gets_error_reply_and_state_is_untouched() {
    let mut h = harness();
    let outcome = h.state.handle_message(continue_frame(12345, b"x", false));
    assert_eq!(outcome, FrameOutcome::Continue);
    assert_eq!(h.state.live_streams(), 0);

    let reply = decode_envelope(&next_frame(&mut h.out_rx).await).unwrap();
    assert_eq!(reply.control.stream_id, Some(12345));
    assert_eq!(reply.control.error.as_deref(), Some(WIRE_UNKNOWN_STREAM));
    assert_eq!(h.metrics.unknown_streams.get(), 1);
    assert!(h.resolver.dispatches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn open_without_decodable_headers_registers_nothing() {
    let mut h = harness();
    // payload is valid CBOR but not a map of scalars
    let mut payload = Vec::new();
    ciborium::ser::into_writer(&42u32, &mut payload).unwrap();
    let control = ControlRecord {
        stream_id: None,
        is_end: false,
        error: None,
    };
    let frame = Bytes::from(encode_envelope(&control, &payload).unwrap());

    let outcome = h.state.handle_message(frame);
    assert_eq!(outcome, FrameOutcome::Continue);
    assert_eq!(h.state.live_streams(), 0);

    let reply = decode_envelope(&next_frame(&mut h.out_rx).await).unwrap();
    assert_eq!(reply.control.error.as_deref(), Some(WIRE_MISSING_HEADERS));
    assert_ne!(reply.control.stream_id, Some(0));
    assert_eq!(h.metrics.frame_errors.get(), 1);
}

#[tokio::test]
async fn undecodable_envelope_is_fatal() {
    let mut h = harness();
    let outcome = h.state.handle_message(Bytes::from_static(b"\xff\x00garbage"));
    assert_eq!(outcome, FrameOutcome::Fatal);

    // the announcement is the connection loop's job, not a queued frame
    assert!(h.out_rx.try_recv().is_err());
    assert_eq!(h.metrics.frame_errors.get(), 1);
    assert_eq!(h.state.live_streams(), 0);
}

#[tokio::test]
async fn fatal_frame_is_announced_as_text_then_close() {
    use futures_util::{SinkExt, StreamExt};
    use streamgate_gateway::server::DuplexIo;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let resolver = Arc::new(DrainResolver::default());
    let metrics = Arc::new(GatewayMetrics::default());

    let server_metrics = Arc::clone(&metrics);
    let server = tokio::spawn(async move {
        let io: Box<dyn DuplexIo> = Box::new(server_io);
        let ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
        streamgate_gateway::mux::ws_conn::run_ws_connection(
            ws,
            "127.0.0.1:0".parse().unwrap(),
            resolver,
            "service".into(),
            server_metrics,
        )
        .await;
    });

    let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    client
        .send(Message::Binary(Bytes::from_static(b"\xff\x00garbage")))
        .await
        .unwrap();

    let announcement = timeout(Duration::from_secs(1), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match announcement {
        Message::Text(text) => assert_eq!(text.as_str(), WIRE_INVALID_DATA),
        other => panic!("expected text announcement, got {other:?}"),
    }

    let close = timeout(Duration::from_secs(1), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(close, Message::Close(_)));

    timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    assert_eq!(metrics.frame_errors.get(), 1);
}
