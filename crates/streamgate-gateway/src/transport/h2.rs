//! Native HTTP/2 stream transport.
//!
//! Wraps one accepted `h2` stream: the receive half is pumped into the
//! transport's event channel (releasing flow-control capacity as chunks are
//! consumed), the send half is driven by `respond`/`send_data`/`end`.
//! HTTP/2 already guarantees unique stream numbers per session, so no
//! identity allocation happens here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use tokio::sync::mpsc;

use streamgate_core::protocol::Headers;
use streamgate_core::{GateError, Result};

use super::{
    check_content_type, encode_payload, normalize_headers, Payload, RespondOptions, StreamEvent,
    StreamTransport, NOTIFY_CONTINUE,
};

/// Session-side handle used to route reserved `NOTIFY` requests to the
/// stream they target.
#[derive(Clone)]
pub struct Http2NotifyHandle {
    continuations: mpsc::UnboundedSender<Bytes>,
}

impl Http2NotifyHandle {
    pub fn notify_continue(&self, data: Bytes) {
        let _ = self.continuations.send(data);
    }
}

/// One native HTTP/2 request/response stream.
pub struct Http2StreamTransport {
    incoming: Headers,
    outgoing: Option<Headers>,
    content_type: Option<String>,
    respond: h2::server::SendResponse<Bytes>,
    send: Option<h2::SendStream<Bytes>>,
    wait_for_trailers: bool,
    events_rx: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    continuations_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    continuations_tx: mpsc::UnboundedSender<Bytes>,
    detached: Arc<AtomicBool>,
}

impl Http2StreamTransport {
    /// Wrap an accepted stream. Spawns the receive pump immediately so the
    /// event channel observes every chunk from the moment of construction.
    pub fn new(
        request: http::Request<h2::RecvStream>,
        respond: h2::server::SendResponse<Bytes>,
    ) -> (Self, Http2NotifyHandle) {
        let (parts, body) = request.into_parts();
        let incoming = capture_incoming_headers(&parts);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (continuations_tx, continuations_rx) = mpsc::unbounded_channel();
        let detached = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump_recv_stream(
            body,
            events_tx,
            Arc::clone(&detached),
        ));

        let handle = Http2NotifyHandle {
            continuations: continuations_tx.clone(),
        };
        let transport = Self {
            incoming,
            outgoing: None,
            content_type: None,
            respond,
            send: None,
            wait_for_trailers: false,
            events_rx: Some(events_rx),
            continuations_rx: Some(continuations_rx),
            continuations_tx,
            detached,
        };
        (transport, handle)
    }
}

fn capture_incoming_headers(parts: &http::request::Parts) -> Headers {
    let mut headers = Headers::new();
    headers.insert(":method".into(), parts.method.as_str().to_string());
    if let Some(pq) = parts.uri.path_and_query() {
        headers.insert(":path".into(), pq.as_str().to_string());
    }
    if let Some(scheme) = parts.uri.scheme_str() {
        headers.insert(":scheme".into(), scheme.to_string());
    }
    if let Some(authority) = parts.uri.authority() {
        headers.insert(":authority".into(), authority.as_str().to_string());
    }
    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(v) => {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
            Err(_) => {
                tracing::debug!(header = %name, "dropping non-utf8 header value");
            }
        }
    }
    headers
}

async fn pump_recv_stream(
    mut body: h2::RecvStream,
    events: mpsc::UnboundedSender<StreamEvent>,
    detached: Arc<AtomicBool>,
) {
    while let Some(chunk) = body.data().await {
        match chunk {
            Ok(data) => {
                // Release capacity regardless of delivery so the peer is
                // never stalled by a detached consumer.
                let _ = body.flow_control().release_capacity(data.len());
                if !detached.load(Ordering::Acquire) {
                    let _ = events.send(StreamEvent::Data(data));
                }
            }
            Err(e) => {
                if !detached.load(Ordering::Acquire) {
                    let _ = events.send(StreamEvent::Error(e.to_string()));
                }
                return;
            }
        }
    }
    match body.trailers().await {
        Ok(_) => {
            if !detached.load(Ordering::Acquire) {
                let _ = events.send(StreamEvent::End);
            }
        }
        Err(e) => {
            if !detached.load(Ordering::Acquire) {
                let _ = events.send(StreamEvent::Error(e.to_string()));
            }
        }
    }
}

fn build_response(headers: &Headers) -> Result<http::Response<()>> {
    let mut response = http::Response::new(());

    let status = match headers.get(":status") {
        Some(raw) => raw
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| GateError::Internal(format!("invalid :status: {raw}")))?,
        None => StatusCode::OK,
    };
    *response.status_mut() = status;

    for (name, value) in headers {
        if name.starts_with(':') {
            continue;
        }
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| GateError::Internal(format!("invalid header name: {name}")))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|_| GateError::Internal(format!("invalid header value for {name}")))?;
        response.headers_mut().insert(name, value);
    }
    Ok(response)
}

impl StreamTransport for Http2StreamTransport {
    fn incoming_headers(&self) -> &Headers {
        &self.incoming
    }

    fn sent_headers(&self) -> Option<&Headers> {
        self.outgoing.as_ref()
    }

    fn respond(&mut self, headers: Headers, options: RespondOptions) -> Result<()> {
        if self.outgoing.is_some() {
            return Err(GateError::AlreadyResponded);
        }
        let headers = normalize_headers(headers);
        let content_type = check_content_type(&headers)?;

        let response = build_response(&headers)?;
        let send = self
            .respond
            .send_response(response, options.end_stream)
            .map_err(|e| GateError::Internal(format!("h2 respond: {e}")))?;

        self.send = Some(send);
        self.wait_for_trailers = options.wait_for_trailers;
        self.content_type = Some(content_type);
        self.outgoing = Some(headers);
        Ok(())
    }

    fn send_data(&mut self, payload: Payload) -> Result<()> {
        let content_type = self.content_type.as_deref().ok_or(GateError::HeadersNotSent)?;
        let bytes = encode_payload(content_type, &payload)?;
        let send = self.send.as_mut().ok_or(GateError::HeadersNotSent)?;
        send.send_data(bytes, false)
            .map_err(|e| GateError::Internal(format!("h2 send: {e}")))
    }

    fn end(&mut self) -> Result<()> {
        let send = self.send.as_mut().ok_or(GateError::HeadersNotSent)?;
        if self.wait_for_trailers {
            send.send_trailers(http::HeaderMap::new())
                .map_err(|e| GateError::Internal(format!("h2 trailers: {e}")))
        } else {
            send.send_data(Bytes::new(), true)
                .map_err(|e| GateError::Internal(format!("h2 end: {e}")))
        }
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.events_rx.take()
    }

    fn take_continuations(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.continuations_rx.take()
    }

    fn notify(&self, channel: &str, data: Bytes) {
        if channel == NOTIFY_CONTINUE {
            let _ = self.continuations_tx.send(data);
        }
    }

    fn stop_processing_input(&mut self) {
        self.detached.store(true, Ordering::Release);
    }
}
