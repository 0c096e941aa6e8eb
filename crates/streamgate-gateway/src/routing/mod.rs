//! Static command routing.
//!
//! Logical paths are slash-separated segments resolved by walking a tree of
//! registered commands. Resolving to anything but a registered command is a
//! routing error; the dispatcher turns that into a 404 on the offending
//! stream only.

use std::collections::HashMap;
use std::sync::Arc;

use streamgate_core::{GateError, Result};
use url::Url;

use crate::context::QueryParams;
use crate::pipeline::Command;
use streamgate_core::protocol::Headers;

#[derive(Default)]
struct RouteNode {
    command: Option<Arc<Command>>,
    children: HashMap<String, RouteNode>,
}

/// Tree of registered commands, fixed after startup.
#[derive(Default)]
pub struct Router {
    root: RouteNode,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command at a slash-separated path.
    pub fn register(&mut self, path: &str, command: Command) {
        let mut node = &mut self.root;
        for segment in segments(path) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.command = Some(Arc::new(command));
    }

    /// Walk the tree; anything other than a registered command fails.
    pub fn resolve(&self, path: &str) -> Result<Arc<Command>> {
        let mut node = &self.root;
        for segment in segments(path) {
            node = node
                .children
                .get(segment)
                .ok_or_else(|| GateError::Routing(path.to_string()))?;
        }
        node.command
            .clone()
            .ok_or_else(|| GateError::Routing(path.to_string()))
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Extract the dispatch target from a stream's incoming headers.
///
/// Native HTTP/2 streams carry a `:path` pseudo-header whose query string is
/// parsed order-preserving; tunneled WebSocket streams identify their target
/// through the configured service header and carry no query string of their
/// own.
pub fn resolve_target(headers: &Headers, service_header: &str) -> (String, QueryParams) {
    if let Some(path_and_query) = headers.get(":path") {
        if let Ok(url) = Url::parse(&format!("https://streamgate.invalid{path_and_query}")) {
            let params: QueryParams = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let path = url.path().trim_matches('/').to_string();
            return (path, params);
        }
    }
    let path = headers
        .get(service_header)
        .map(|s| s.trim_matches('/').to_string())
        .unwrap_or_default();
    (path, QueryParams::new())
}
