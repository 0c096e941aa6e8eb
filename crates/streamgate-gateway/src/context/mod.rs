//! Per-stream request context and per-session cursor state.
//!
//! A `SessionContext` lives as long as its owning WebSocket connection or
//! HTTP/2 session and holds one slot per logical path: the query parameters
//! of the last completed call and, when pagination is in flight, the open
//! cursor over the data source. A `RequestContext` is created per logical
//! stream and carries the current call's path and parameters.
//!
//! Cursor continuity rule: a call whose parameters are structurally equal to
//! the slot's recorded parameters (pair order significant) reuses the slot's
//! cursor; any difference discards it and opens a fresh one. The recorded
//! parameters are only committed by `mark_done`, so the next call always
//! compares against the parameters that produced the currently open cursor.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use streamgate_core::Result;

/// Query parameters in arrival order. Equality is order-significant, matching
/// the deep structural comparison the continuity rule calls for.
pub type QueryParams = Vec<(String, String)>;

/// One open cursor over a paginated result sequence. The data source behind
/// it is opaque to the gateway.
#[async_trait]
pub trait Cursor: Send {
    async fn has_next(&mut self) -> Result<bool>;
    async fn next(&mut self) -> Result<serde_json::Value>;
}

/// Cursor shared between a session slot and the handler currently drawing
/// from it. `Arc` identity is what "same cursor" means across calls.
pub type SharedCursor = Arc<tokio::sync::Mutex<Box<dyn Cursor>>>;

#[derive(Default)]
struct PathSlot {
    params: Option<QueryParams>,
    cursor: Option<SharedCursor>,
}

/// Session-scoped state, keyed by logical path. Owned by the connection (WS)
/// or the HTTP/2 session and shared by every stream it carries.
#[derive(Default)]
pub struct SessionContext {
    slots: Mutex<HashMap<String, PathSlot>>,
}

impl SessionContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_slot<R>(&self, path: &str, f: impl FnOnce(&mut PathSlot) -> R) -> R {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(slots.entry(path.to_string()).or_default())
    }
}

/// Per-logical-stream context handed to the command pipeline together with
/// the transport.
pub struct RequestContext {
    path: String,
    params: QueryParams,
    session: Arc<SessionContext>,
    done: bool,
}

impl RequestContext {
    pub fn new(session: Arc<SessionContext>, path: impl Into<String>, params: QueryParams) -> Self {
        let path = path.into();
        // Materialize the slot up front so session reads never miss.
        session.with_slot(&path, |_| ());
        Self {
            path,
            params,
            session,
            done: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Pure read of the completion flag.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Mark this call complete. Monotonic: the flag only ever goes to `true`.
    /// On the false-to-true edge the current call's parameters are committed
    /// into the session slot for this path.
    pub fn mark_done(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.session
            .with_slot(&self.path, |slot| slot.params = Some(self.params.clone()));
    }

    /// Parameters recorded by the last completed call on this path, if any.
    pub fn session_params(&self) -> Option<QueryParams> {
        self.session.with_slot(&self.path, |slot| slot.params.clone())
    }

    /// The session's open cursor for this path, if any.
    pub fn session_cursor(&self) -> Option<SharedCursor> {
        self.session.with_slot(&self.path, |slot| slot.cursor.clone())
    }

    /// Resolve the cursor for this call per the continuity rule: reuse the
    /// session's cursor when this call's parameters structurally equal the
    /// recorded ones, otherwise discard it and open a fresh cursor through
    /// `open`.
    pub async fn cursor_for_call<F, Fut>(&self, open: F) -> Result<SharedCursor>
    where
        F: FnOnce(QueryParams) -> Fut,
        Fut: Future<Output = Result<Box<dyn Cursor>>> + Send,
    {
        let reusable = self.session.with_slot(&self.path, |slot| {
            if slot.params.as_ref() == Some(&self.params) {
                slot.cursor.clone()
            } else {
                slot.cursor = None;
                None
            }
        });
        if let Some(cursor) = reusable {
            return Ok(cursor);
        }

        let opened = open(self.params.clone()).await?;
        let cursor: SharedCursor = Arc::new(tokio::sync::Mutex::new(opened));
        self.session.with_slot(&self.path, |slot| {
            slot.cursor = Some(Arc::clone(&cursor));
        });
        Ok(cursor)
    }
}
