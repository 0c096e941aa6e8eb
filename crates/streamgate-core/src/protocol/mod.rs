//! Wire protocol for the WebSocket sub-protocol lane.
//!
//! Each WebSocket message is one CBOR document: a two-element array of a
//! control record and an opaque payload byte string. The control record is
//! what HTTP/2 gets from its framing layer for free: a stream identity plus
//! an end-of-stream marker, the minimum needed to demultiplex many logical
//! streams over one connection.
//!
//! All parsers are panic-free: malformed input is reported as `GateError`
//! instead of panicking or indexing raw buffers.

pub mod envelope;
pub mod identity;

pub use envelope::{ControlRecord, Envelope, Headers};
pub use identity::allocate_stream_id;
