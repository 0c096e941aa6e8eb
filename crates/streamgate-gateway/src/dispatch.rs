//! Service resolution: from a freshly constructed transport to a command.

use async_trait::async_trait;

use streamgate_core::protocol::Headers;
use streamgate_core::{GateError, Result};

use crate::context::RequestContext;
use crate::pipeline::Command;
use crate::routing::Router;
use crate::transport::{Payload, RespondOptions, StreamTransport};

/// Receives every transport the multiplexer constructs, for either channel
/// kind.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn dispatch(
        &self,
        transport: Box<dyn StreamTransport>,
        ctx: RequestContext,
    ) -> Result<()>;
}

/// Resolves the context path against the static route tree and runs the
/// command pipeline. A failure here is fatal to its stream only: the reply
/// goes out on that stream and the owning connection keeps serving.
pub struct CommandDispatcher {
    router: Router,
}

impl CommandDispatcher {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ServiceResolver for CommandDispatcher {
    async fn dispatch(
        &self,
        mut transport: Box<dyn StreamTransport>,
        mut ctx: RequestContext,
    ) -> Result<()> {
        let command: std::sync::Arc<Command> = match self.router.resolve(ctx.path()) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(path = %ctx.path(), "no command registered");
                reply_stream_error(transport.as_mut(), "404", "Not found");
                return Err(err);
            }
        };

        match command.handle(transport.as_mut(), &mut ctx).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(path = %ctx.path(), error = %err, "command failed");
                reply_stream_error(transport.as_mut(), "500", "Internal error");
                Err(err)
            }
        }
    }
}

/// Best-effort error reply on a single stream. Once a response has already
/// been sent the headers cannot be amended, but the stream is still
/// terminated so the peer never waits on a half-open exchange.
fn reply_stream_error(transport: &mut dyn StreamTransport, status: &str, body: &str) {
    let sent = if transport.sent_headers().is_none() {
        let mut headers = Headers::new();
        headers.insert(":status".into(), status.to_string());
        headers.insert("content-type".into(), "text/html".into());
        transport
            .respond(headers, RespondOptions::default())
            .and_then(|_| transport.send_data(Payload::Text(body.to_string())))
            .and_then(|_| transport.end())
    } else {
        transport.end()
    };
    if let Err(err) = sent {
        match err {
            // stream already torn down by the peer; nothing to report
            GateError::Internal(_) => {}
            other => tracing::debug!(error = %other, "error reply failed"),
        }
    }
}
