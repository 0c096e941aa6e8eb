//! streamgate gateway library entry.
//!
//! This crate wires the TLS transport server, the sub-protocol multiplexer,
//! the command pipeline, and the built-in commands into a cohesive gateway
//! stack. It is intended to be consumed by the binary (`main.rs`) and by
//! integration tests.

pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod mux;
pub mod obs;
pub mod pipeline;
pub mod routing;
pub mod server;
pub mod transport;
