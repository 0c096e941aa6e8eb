#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::time::timeout;

use streamgate_core::protocol::envelope::{encode_envelope, ControlRecord};
use streamgate_core::protocol::Headers;
use streamgate_core::{GateError, Result};
use streamgate_gateway::commands::{list_command, MemoryDataSource};
use streamgate_gateway::context::RequestContext;
use streamgate_gateway::dispatch::{CommandDispatcher, ServiceResolver};
use streamgate_gateway::mux::h2_session::run_h2_session;
use streamgate_gateway::obs::GatewayMetrics;
use streamgate_gateway::routing::Router;
use streamgate_gateway::server::DuplexIo;
use streamgate_gateway::transport::{
    Payload, RespondOptions, StreamEvent, StreamTransport,
};

/// Run one in-memory HTTP/2 session against the given resolver and hand back
/// the client half.
async fn start_session(
    resolver: Arc<dyn ServiceResolver>,
) -> (h2::client::SendRequest<Bytes>, Arc<GatewayMetrics>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let metrics = Arc::new(GatewayMetrics::default());

    let session_metrics = Arc::clone(&metrics);
    tokio::spawn(async move {
        let io: Box<dyn DuplexIo> = Box::new(server_io);
        let conn = h2::server::handshake(io).await.expect("server handshake");
        run_h2_session(
            conn,
            "127.0.0.1:0".parse().expect("addr"),
            resolver,
            "service".into(),
            "command".into(),
            session_metrics,
        )
        .await;
    });

    let (client, connection) = h2::client::handshake(client_io)
        .await
        .expect("client handshake");
    tokio::spawn(async move {
        let _ = connection.await;
    });
    (client, metrics)
}

async fn read_body(response: http::Response<h2::RecvStream>) -> Vec<u8> {
    let mut body = response.into_body();
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        buf.extend_from_slice(&chunk);
    }
    buf
}

fn get(uri: &str) -> http::Request<()> {
    http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(())
        .unwrap()
}

#[tokio::test]
async fn items_command_is_served_over_native_h2() {
    let source = Arc::new(MemoryDataSource::new(vec![
        json!({"title": "Alien", "year": 1979}),
        json!({"title": "Blade Runner", "year": 1982}),
    ]));
    let mut router = Router::new();
    router.register("items", list_command(source).unwrap());
    let resolver = Arc::new(CommandDispatcher::new(router));

    let (client, metrics) = start_session(resolver).await;
    let mut client = client.ready().await.unwrap();

    let (response, _) = client
        .send_request(get("https://gateway.test/items?year=1982"), true)
        .unwrap();
    let response = timeout(Duration::from_secs(2), response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );

    let body = read_body(response).await;
    let item: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(item["title"], "Blade Runner");
    assert_eq!(metrics.streams_opened.get(), 1);
}

/// Exercises every transport-usage rule against the live h2 stream and
/// reports which ones held.
#[derive(Default)]
struct UsageProbeResolver {
    outcomes: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServiceResolver for UsageProbeResolver {
    async fn dispatch(
        &self,
        mut transport: Box<dyn StreamTransport>,
        _ctx: RequestContext,
    ) -> Result<()> {
        let mut seen = Vec::new();

        if matches!(
            transport.send_data(Payload::Text("early".into())),
            Err(GateError::HeadersNotSent)
        ) {
            seen.push("headers-not-sent".to_string());
        }

        let mut bad = Headers::new();
        bad.insert("content-type".into(), "application/xml".into());
        if matches!(
            transport.respond(bad, RespondOptions::default()),
            Err(GateError::InvalidContentType(_))
        ) {
            seen.push("invalid-content-type".to_string());
        }
        // rejected responds leave no sent headers behind
        if transport.sent_headers().is_none() {
            seen.push("nothing-recorded".to_string());
        }

        let mut ok = Headers::new();
        ok.insert(":status".into(), "200".into());
        ok.insert("content-type".into(), "application/json".into());
        transport.respond(ok, RespondOptions::default())?;

        let mut again = Headers::new();
        again.insert("content-type".into(), "application/json".into());
        if matches!(
            transport.respond(again, RespondOptions::default()),
            Err(GateError::AlreadyResponded)
        ) {
            seen.push("already-responded".to_string());
        }

        // the request carried end_stream, so the pump delivers exactly End
        let mut events = transport.take_events().expect("events taken once");
        if matches!(events.recv().await, Some(StreamEvent::End)) {
            seen.push("end-event".to_string());
        }

        transport.send_data(Payload::Json(json!({"ok": true})))?;
        transport.end()?;

        *self.outcomes.lock().unwrap() = seen;
        Ok(())
    }
}

#[tokio::test]
async fn transport_usage_rules_hold_on_the_h2_stream() {
    let resolver = Arc::new(UsageProbeResolver::default());
    let outcomes = Arc::clone(&resolver.outcomes);

    let (client, _metrics) = start_session(resolver).await;
    let mut client = client.ready().await.unwrap();

    let (response, _) = client
        .send_request(get("https://gateway.test/probe"), true)
        .unwrap();
    let response = timeout(Duration::from_secs(2), response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    let body = read_body(response).await;
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["ok"], true);

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![
            "headers-not-sent".to_string(),
            "invalid-content-type".to_string(),
            "nothing-recorded".to_string(),
            "already-responded".to_string(),
            "end-event".to_string(),
        ]
    );
}

/// Responds, then suspends until a continuation signal arrives and echoes its
/// payload back as the body.
struct WaitForNotifyResolver;

#[async_trait]
impl ServiceResolver for WaitForNotifyResolver {
    async fn dispatch(
        &self,
        mut transport: Box<dyn StreamTransport>,
        _ctx: RequestContext,
    ) -> Result<()> {
        let mut headers = Headers::new();
        headers.insert(":status".into(), "200".into());
        headers.insert("content-type".into(), "application/json".into());
        transport.respond(headers, RespondOptions::default())?;

        let mut continuations = transport.take_continuations().expect("taken once");
        if let Some(data) = continuations.recv().await {
            transport.send_data(Payload::Binary(data))?;
        }
        transport.end()
    }
}

fn notify_request() -> http::Request<()> {
    http::Request::builder()
        .method("POST")
        .uri("https://gateway.test/ignored")
        .header("command", "NOTIFY")
        .body(())
        .unwrap()
}

#[tokio::test]
async fn notify_resumes_the_targeted_stream() {
    let (client, _metrics) = start_session(Arc::new(WaitForNotifyResolver)).await;
    let mut client = client.ready().await.unwrap();

    // first client-initiated stream: native id 1
    let (response, _) = client
        .send_request(get("https://gateway.test/wait"), true)
        .unwrap();
    let response = timeout(Duration::from_secs(2), response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    let payload = encode_envelope(&ControlRecord::for_stream(1), b"resume").unwrap();
    let (notify_response, mut notify_body) = client.send_request(notify_request(), false).unwrap();
    notify_body.send_data(Bytes::from(payload), true).unwrap();
    let notify_response = timeout(Duration::from_secs(2), notify_response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notify_response.status(), http::StatusCode::NO_CONTENT);

    let body = read_body(response).await;
    assert_eq!(&body, b"resume");
}

#[tokio::test]
async fn notify_for_an_unknown_stream_is_404() {
    let (client, _metrics) = start_session(Arc::new(WaitForNotifyResolver)).await;
    let mut client = client.ready().await.unwrap();

    let payload = encode_envelope(&ControlRecord::for_stream(999), b"resume").unwrap();
    let (response, mut body) = client.send_request(notify_request(), false).unwrap();
    body.send_data(Bytes::from(payload), true).unwrap();
    let response = timeout(Duration::from_secs(2), response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notify_with_an_undecodable_body_is_404() {
    let (client, _metrics) = start_session(Arc::new(WaitForNotifyResolver)).await;
    let mut client = client.ready().await.unwrap();

    let (response, mut body) = client.send_request(notify_request(), false).unwrap();
    body.send_data(Bytes::from_static(b"\xff\x00garbage"), true)
        .unwrap();
    let response = timeout(Duration::from_secs(2), response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
}
