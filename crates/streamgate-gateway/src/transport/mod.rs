//! Unified stream transport.
//!
//! One `StreamTransport` contract, implemented once per underlying channel:
//! a native HTTP/2 stream, or one logical stream tunneled inside a WebSocket
//! connection. The multiplexer and the command pipeline depend only on the
//! trait, never on the concrete kind.
//!
//! Incoming traffic surfaces as level-triggered events on a channel created
//! at construction, so a consumer that takes the receiver during dispatch can
//! never miss a chunk that raced ahead of it.

pub mod h2;
pub mod ws;

use bytes::Bytes;
use tokio::sync::mpsc;

use streamgate_core::protocol::Headers;
use streamgate_core::{GateError, Result};

pub use h2::{Http2NotifyHandle, Http2StreamTransport};
pub use ws::{WsStreamHandle, WsStreamTransport};

/// Content types accepted by `respond`. Anything else is rejected with
/// `InvalidContentType`.
pub const SUPPORTED_CONTENT_TYPES: [&str; 3] =
    ["application/json", "text/html", "application/cbor"];

/// Notification channel that `notify` forwards; every other channel name is
/// a silent no-op.
pub const NOTIFY_CONTINUE: &str = "continue";

/// Incoming stream notifications, in arrival order, each delivered at most
/// once.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Next chunk of body data.
    Data(Bytes),
    /// End of input for this stream.
    End,
    /// Transport-level failure; no further events follow.
    Error(String),
}

/// Options for `respond`.
#[derive(Debug, Clone, Default)]
pub struct RespondOptions {
    /// Close the response after the header frame (bodiless response).
    pub end_stream: bool,
    /// Finish the stream with a trailer frame instead of an empty data frame.
    pub wait_for_trailers: bool,
    /// Error to carry in the response envelope (WebSocket lane only).
    pub error: Option<String>,
}

/// Outgoing body data; serialized according to the content type recorded at
/// `respond` time.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Structured value, encoded as JSON or CBOR per the content type.
    Json(serde_json::Value),
    /// Pre-rendered text, written as-is.
    Text(String),
    /// Raw bytes, written as-is.
    Binary(Bytes),
}

/// One request/response exchange over either channel kind.
pub trait StreamTransport: Send {
    /// Header set captured at stream-open; immutable afterwards.
    fn incoming_headers(&self) -> &Headers;

    /// Headers sent by `respond`, or `None` while no response exists. This
    /// nullness is the authoritative "have I responded yet" flag the
    /// pipeline guards on.
    fn sent_headers(&self) -> Option<&Headers>;

    /// Send exactly one response header frame.
    fn respond(&mut self, headers: Headers, options: RespondOptions) -> Result<()>;

    /// Send one body payload, serialized per the recorded content type.
    fn send_data(&mut self, payload: Payload) -> Result<()>;

    /// Finalize the stream.
    fn end(&mut self) -> Result<()>;

    /// Take the incoming-event receiver. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>>;

    /// Take the continuation-signal receiver fed by `notify("continue", _)`.
    /// Yields `Some` exactly once.
    fn take_continuations(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>>;

    /// Restricted side-channel: forwards continuation-control signals to a
    /// suspended stream; any other channel name is ignored.
    fn notify(&self, channel: &str, data: Bytes);

    /// Detach incoming-event delivery without closing the underlying
    /// channel; full teardown is the owning connection's concern.
    fn stop_processing_input(&mut self);
}

/// Validate and return the declared content type of a response header set.
pub(crate) fn check_content_type(headers: &Headers) -> Result<String> {
    let content_type = headers
        .get("content-type")
        .cloned()
        .unwrap_or_default();
    if SUPPORTED_CONTENT_TYPES.contains(&content_type.as_str()) {
        Ok(content_type)
    } else {
        Err(GateError::InvalidContentType(content_type))
    }
}

/// Serialize an outgoing payload according to the response content type:
/// structured encode for JSON/CBOR, raw for text and anything binary.
pub(crate) fn encode_payload(content_type: &str, payload: &Payload) -> Result<Bytes> {
    match (content_type, payload) {
        ("application/json", Payload::Json(value)) => serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| GateError::Internal(format!("json encode: {e}"))),
        ("application/cbor", Payload::Json(value)) => {
            let mut out = Vec::new();
            ciborium::ser::into_writer(value, &mut out)
                .map_err(|e| GateError::Internal(format!("cbor encode: {e}")))?;
            Ok(Bytes::from(out))
        }
        (_, Payload::Json(value)) => serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| GateError::Internal(format!("json encode: {e}"))),
        (_, Payload::Text(text)) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        (_, Payload::Binary(bytes)) => Ok(bytes.clone()),
    }
}

/// Normalize a header set for response use: lowercase field names so the
/// content-type check sees `Content-Type` and `content-type` alike.
pub(crate) fn normalize_headers(headers: Headers) -> Headers {
    headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}
