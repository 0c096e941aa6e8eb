//! Lightweight in-process metrics.
//!
//! Counters are plain atomics rendered on demand in text exposition format;
//! no scrape endpoint is wired up, callers render when they want a snapshot.

pub mod metrics;

pub use metrics::{Counter, GatewayMetrics};
