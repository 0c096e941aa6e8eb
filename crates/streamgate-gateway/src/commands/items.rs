//! Paginated item listing.
//!
//! Each call on the path draws exactly one item from the session's cursor
//! and completes; repeated calls with the same query parameters walk the
//! sequence, a changed query starts over. An exhausted cursor stays in the
//! session slot so further identical calls answer with an empty body rather
//! than reopening the source.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use streamgate_core::protocol::Headers;
use streamgate_core::Result;

use crate::context::{Cursor, QueryParams};
use crate::pipeline::{Command, ErrorHandler, Handler};
use crate::transport::{Payload, RespondOptions};

use super::DataSource;

/// Fixed in-memory data source. Opening applies the query parameters as
/// field-equality filters over the items.
pub struct MemoryDataSource {
    items: Vec<serde_json::Value>,
}

impl MemoryDataSource {
    pub fn new(items: Vec<serde_json::Value>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn open(&self, params: &QueryParams) -> Result<Box<dyn Cursor>> {
        let matches = |item: &serde_json::Value| {
            params.iter().all(|(key, want)| match item.get(key) {
                Some(serde_json::Value::String(have)) => have == want,
                Some(other) => other.to_string() == *want,
                None => false,
            })
        };
        let selected: VecDeque<_> = self.items.iter().filter(|i| matches(i)).cloned().collect();
        Ok(Box::new(VecCursor { items: selected }))
    }
}

struct VecCursor {
    items: VecDeque<serde_json::Value>,
}

#[async_trait]
impl Cursor for VecCursor {
    async fn has_next(&mut self) -> Result<bool> {
        Ok(!self.items.is_empty())
    }

    async fn next(&mut self) -> Result<serde_json::Value> {
        self.items
            .pop_front()
            .ok_or_else(|| streamgate_core::GateError::DataSource("cursor exhausted".into()))
    }
}

/// Build the one-item-per-call listing command over the given source.
pub fn list_command(source: Arc<dyn DataSource>) -> Result<Command> {
    let handler: Handler = Arc::new(move |transport, ctx| {
        let source = Arc::clone(&source);
        Box::pin(async move {
            let mut headers = Headers::new();
            headers.insert(":status".into(), "200".into());
            headers.insert("content-type".into(), "application/json".into());
            transport.respond(headers, RespondOptions::default())?;

            let cursor = ctx
                .cursor_for_call(|params| {
                    let source = Arc::clone(&source);
                    async move { source.open(&params).await }
                })
                .await?;

            let mut cursor = cursor.lock().await;
            if cursor.has_next().await? {
                let item = cursor.next().await?;
                transport.send_data(Payload::Json(item))?;
            }
            drop(cursor);

            ctx.mark_done();
            transport.end()
        })
    });

    let error_handler: ErrorHandler = Arc::new(|transport, ctx, error| {
        Box::pin(async move {
            tracing::error!(path = %ctx.path(), error = %error, "item listing failed");
            if transport.sent_headers().is_none() {
                let mut headers = Headers::new();
                headers.insert(":status".into(), "500".into());
                headers.insert("content-type".into(), "text/html".into());
                transport.respond(headers, RespondOptions::default())?;
                transport.send_data(Payload::Text("Internal error".into()))?;
            }
            // terminate either way so the peer never waits on a half-open
            // stream
            transport.end()?;
            Ok(())
        })
    });

    Command::builder()
        .handler(handler)
        .error_handler(error_handler)
        .build()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn source() -> MemoryDataSource {
        MemoryDataSource::new(vec![
            json!({"title": "Alien", "year": 1979}),
            json!({"title": "Blade Runner", "year": 1982}),
            json!({"title": "Stalker", "year": 1979}),
        ])
    }

    #[tokio::test]
    async fn unfiltered_cursor_walks_everything() {
        let mut cursor = source().open(&Vec::new()).await.unwrap();
        let mut seen = Vec::new();
        while cursor.has_next().await.unwrap() {
            seen.push(cursor.next().await.unwrap());
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0]["title"], "Alien");
    }

    #[tokio::test]
    async fn filters_match_string_and_number_fields() {
        let params = vec![("year".to_string(), "1979".to_string())];
        let mut cursor = source().open(&params).await.unwrap();
        let mut titles = Vec::new();
        while cursor.has_next().await.unwrap() {
            titles.push(cursor.next().await.unwrap()["title"].clone());
        }
        assert_eq!(titles, vec![json!("Alien"), json!("Stalker")]);
    }

    #[tokio::test]
    async fn exhausted_cursor_reports_no_next() {
        let params = vec![("title".to_string(), "No Such Film".to_string())];
        let mut cursor = source().open(&params).await.unwrap();
        assert!(!cursor.has_next().await.unwrap());
        assert!(cursor.next().await.is_err());
    }
}
