//! Command execution pipeline.
//!
//! A command is an ordered pre-handler chain, one primary handler, an ordered
//! post-handler chain, and an optional error handler, all executing against a
//! `(StreamTransport, RequestContext)` pair.

pub mod command;

pub use command::{Command, CommandBuilder, ErrorHandler, Handler, HandlerFuture};
