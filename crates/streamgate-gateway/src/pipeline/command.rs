use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use streamgate_core::{GateError, Result};

use crate::context::RequestContext;
use crate::transport::StreamTransport;

/// Boxed future returned by pipeline handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A pipeline step: pre-handlers prepare data, the primary handler produces
/// the response, post-handlers audit after the fact.
pub type Handler = Arc<
    dyn for<'a> Fn(&'a mut dyn StreamTransport, &'a mut RequestContext) -> HandlerFuture<'a>
        + Send
        + Sync,
>;

/// Invoked with the failed step's error; consuming it keeps the stream's
/// failure contained here.
pub type ErrorHandler = Arc<
    dyn for<'a> Fn(
            &'a mut dyn StreamTransport,
            &'a mut RequestContext,
            &'a GateError,
        ) -> HandlerFuture<'a>
        + Send
        + Sync,
>;

/// One routable command.
///
/// Handler lists are fixed at build time apart from the explicit append and
/// replace operations below. Handler signatures are enforced by the type
/// system; the one dynamic construction rule left — a primary handler must
/// exist — is checked by [`CommandBuilder::build`].
pub struct Command {
    pre_handlers: Vec<Handler>,
    handler: Handler,
    post_handlers: Vec<Handler>,
    error_handler: Option<ErrorHandler>,
}

impl Command {
    pub fn builder() -> CommandBuilder {
        CommandBuilder::default()
    }

    /// Replace the primary handler.
    pub fn set_handler(&mut self, handler: Handler) {
        self.handler = handler;
    }

    /// Replace the error handler.
    pub fn set_error_handler(&mut self, error_handler: ErrorHandler) {
        self.error_handler = Some(error_handler);
    }

    /// Append pre-handlers, keeping list order.
    pub fn add_pre_handlers(&mut self, handlers: impl IntoIterator<Item = Handler>) {
        self.pre_handlers.extend(handlers);
    }

    /// Append post-handlers, keeping list order.
    pub fn add_post_handlers(&mut self, handlers: impl IntoIterator<Item = Handler>) {
        self.post_handlers.extend(handlers);
    }

    /// Run the pipeline for one stream.
    ///
    /// Pre-handlers and the primary run under a lazily re-evaluated guard:
    /// a step is skipped once the context is done or a response has been
    /// sent, so any step can short-circuit the rest of the producing chain.
    /// Post-handlers run unconditionally. The first failing step skips the
    /// remainder of the chain — including later post-handlers — and routes
    /// to the error handler, or propagates when none is configured.
    pub async fn handle(
        &self,
        transport: &mut dyn StreamTransport,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        match self.run_chain(transport, ctx).await {
            Ok(()) => Ok(()),
            Err(error) => match &self.error_handler {
                Some(error_handler) => error_handler(transport, ctx, &error).await,
                None => Err(error),
            },
        }
    }

    async fn run_chain(
        &self,
        transport: &mut dyn StreamTransport,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        for pre in &self.pre_handlers {
            if !ctx.is_done() && transport.sent_headers().is_none() {
                pre(transport, ctx).await?;
            }
        }

        if !ctx.is_done() && transport.sent_headers().is_none() {
            (self.handler)(transport, ctx).await?;
        }

        for post in &self.post_handlers {
            post(transport, ctx).await?;
        }

        Ok(())
    }
}

/// Builder collecting handlers for a [`Command`].
#[derive(Default)]
pub struct CommandBuilder {
    pre_handlers: Vec<Handler>,
    handler: Option<Handler>,
    post_handlers: Vec<Handler>,
    error_handler: Option<ErrorHandler>,
}

impl CommandBuilder {
    pub fn pre_handler(mut self, handler: Handler) -> Self {
        self.pre_handlers.push(handler);
        self
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn post_handler(mut self, handler: Handler) -> Self {
        self.post_handlers.push(handler);
        self
    }

    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Fails at construction when no primary handler was supplied.
    pub fn build(self) -> Result<Command> {
        let handler = self
            .handler
            .ok_or_else(|| GateError::Config("command requires a primary handler".into()))?;
        Ok(Command {
            pre_handlers: self.pre_handlers,
            handler,
            post_handlers: self.post_handlers,
            error_handler: self.error_handler,
        })
    }
}
