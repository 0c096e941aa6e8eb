#![allow(clippy::unwrap_used)]
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use streamgate_core::protocol::Headers;
use streamgate_core::{GateError, Result};
use streamgate_gateway::transport::{
    Payload, RespondOptions, StreamEvent, StreamTransport, NOTIFY_CONTINUE,
};

/// Shared append-only log the pipeline tests record step execution into.
#[derive(Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// In-memory transport recording everything a pipeline writes to it.
pub struct MockTransport {
    incoming: Headers,
    outgoing: Option<Headers>,
    pub sent: Vec<Payload>,
    pub ended: bool,
    pub events_tx: mpsc::UnboundedSender<StreamEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    continuations_tx: mpsc::UnboundedSender<Bytes>,
    continuations_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    detached: bool,
}

impl MockTransport {
    pub fn new(incoming: Headers) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (continuations_tx, continuations_rx) = mpsc::unbounded_channel();
        Self {
            incoming,
            outgoing: None,
            sent: Vec::new(),
            ended: false,
            events_tx,
            events_rx: Some(events_rx),
            continuations_tx,
            continuations_rx: Some(continuations_rx),
            detached: false,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(Headers::new())
    }
}

impl StreamTransport for MockTransport {
    fn incoming_headers(&self) -> &Headers {
        &self.incoming
    }

    fn sent_headers(&self) -> Option<&Headers> {
        self.outgoing.as_ref()
    }

    fn respond(&mut self, headers: Headers, _options: RespondOptions) -> Result<()> {
        if self.outgoing.is_some() {
            return Err(GateError::AlreadyResponded);
        }
        self.outgoing = Some(headers);
        Ok(())
    }

    fn send_data(&mut self, payload: Payload) -> Result<()> {
        if self.outgoing.is_none() {
            return Err(GateError::HeadersNotSent);
        }
        self.sent.push(payload);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if self.outgoing.is_none() {
            return Err(GateError::HeadersNotSent);
        }
        self.ended = true;
        Ok(())
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
        self.detached = true;
    }
}
