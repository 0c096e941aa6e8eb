//! Logical-stream transport tunneled inside a WebSocket connection.
//!
//! A `WsStreamTransport` owns no socket: every write is an encoded envelope
//! keyed by its stream identity, pushed into the connection's shared writer
//! channel. The multiplexer keeps the matching `WsStreamHandle` in the
//! connection's stream map and feeds inbound events through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use streamgate_core::protocol::envelope::{
    encode_envelope, encode_header_block, ControlRecord, Headers,
};
use streamgate_core::{GateError, Result};

use super::{
    check_content_type, encode_payload, normalize_headers, Payload, RespondOptions, StreamEvent,
    StreamTransport, NOTIFY_CONTINUE,
};

/// Multiplexer-side handle for one registered logical stream.
pub struct WsStreamHandle {
    stream_id: u64,
    events: mpsc::UnboundedSender<StreamEvent>,
    continuations: mpsc::UnboundedSender<Bytes>,
    detached: Arc<AtomicBool>,
}

impl WsStreamHandle {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Deliver the next body chunk, unless input processing was detached.
    pub fn deliver_chunk(&self, data: Bytes) {
        if !self.detached.load(Ordering::Acquire) {
            let _ = self.events.send(StreamEvent::Data(data));
        }
    }

    /// Signal end-of-input.
    pub fn signal_end(&self) {
        if !self.detached.load(Ordering::Acquire) {
            let _ = self.events.send(StreamEvent::End);
        }
    }

    /// Signal a transport-level failure.
    pub fn signal_error(&self, message: String) {
        if !self.detached.load(Ordering::Acquire) {
            let _ = self.events.send(StreamEvent::Error(message));
        }
    }

    /// Forward an out-of-band continuation signal.
    pub fn notify_continue(&self, data: Bytes) {
        let _ = self.continuations.send(data);
    }
}

/// One logical request/response stream inside a WebSocket connection.
pub struct WsStreamTransport {
    stream_id: u64,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    incoming: Headers,
    outgoing: Option<Headers>,
    content_type: Option<String>,
    events_rx: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    continuations_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    continuations_tx: mpsc::UnboundedSender<Bytes>,
    detached: Arc<AtomicBool>,
}

impl WsStreamTransport {
    /// Build a transport plus the multiplexer-side handle for one freshly
    /// opened stream. The event channels exist from this point on, so no
    /// inbound chunk can be missed by a later consumer.
    pub fn pair(
        stream_id: u64,
        writer: mpsc::UnboundedSender<Vec<u8>>,
        incoming: Headers,
    ) -> (Self, WsStreamHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (continuations_tx, continuations_rx) = mpsc::unbounded_channel();
        let detached = Arc::new(AtomicBool::new(false));

        let handle = WsStreamHandle {
            stream_id,
            events: events_tx,
            continuations: continuations_tx.clone(),
            detached: Arc::clone(&detached),
        };
        let transport = Self {
            stream_id,
            writer,
            incoming,
            outgoing: None,
            content_type: None,
            events_rx: Some(events_rx),
            continuations_rx: Some(continuations_rx),
            continuations_tx,
            detached,
        };
        (transport, handle)
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    fn write_frame(&self, control: &ControlRecord, payload: &[u8]) -> Result<()> {
        let frame = encode_envelope(control, payload)?;
        self.writer
            .send(frame)
            .map_err(|_| GateError::Internal("connection writer closed".into()))
    }
}

impl StreamTransport for WsStreamTransport {
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

        let control = ControlRecord {
            stream_id: Some(self.stream_id),
            is_end: options.end_stream,
            error: options.error,
        };
        let block = encode_header_block(&headers)?;
        self.write_frame(&control, &block)?;

        self.content_type = Some(content_type);
        self.outgoing = Some(headers);
        Ok(())
    }

    fn send_data(&mut self, payload: Payload) -> Result<()> {
        let content_type = self.content_type.as_deref().ok_or(GateError::HeadersNotSent)?;
        let bytes = encode_payload(content_type, &payload)?;
        self.write_frame(&ControlRecord::for_stream(self.stream_id), &bytes)
    }

    fn end(&mut self) -> Result<()> {
        if self.outgoing.is_none() {
            return Err(GateError::HeadersNotSent);
        }
        let control = ControlRecord {
            stream_id: Some(self.stream_id),
            is_end: true,
            error: None,
        };
        self.write_frame(&control, &[])
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
