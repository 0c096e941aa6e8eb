//! streamgate core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the WebSocket sub-protocol envelope codec, the stream
//! identity allocator, and the error surface shared by the gateway and its
//! tests. It intentionally carries no transport or runtime dependencies so it
//! can be reused by client tooling.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `GateError`/`Result` so a gateway
//! process never crashes on malformed frames or bad traffic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{GateError, Result};
