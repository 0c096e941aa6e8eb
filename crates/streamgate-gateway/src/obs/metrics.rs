use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increment by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {}", self.get());
    }
}

#[derive(Default)]
pub struct GatewayMetrics {
    pub ws_connections: Counter,
    pub h2_sessions: Counter,
    pub streams_opened: Counter,
    pub frame_errors: Counter,
    pub unknown_streams: Counter,
    pub legacy_rejected: Counter,
}

impl GatewayMetrics {
    /// Render all counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.ws_connections
            .render("streamgate_ws_connections_total", &mut out);
        self.h2_sessions
            .render("streamgate_h2_sessions_total", &mut out);
        self.streams_opened
            .render("streamgate_streams_opened_total", &mut out);
        self.frame_errors
            .render("streamgate_frame_errors_total", &mut out);
        self.unknown_streams
            .render("streamgate_unknown_streams_total", &mut out);
        self.legacy_rejected
            .render("streamgate_legacy_rejected_total", &mut out);
        out
    }
}
