use coord_protocol::CoordStats;
use serde::Serialize;
use std::io::Write;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub nodes: usize,
    pub relays: usize,
    pub duration_s: u64,
    pub tick_ms: u64,
    pub topic: String,
    pub timestamp: String,
}

// ── Protocol events ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventProtocol {
    pub event: &'static str,
    pub node: String,
    pub detail: String,
    pub elapsed_s: f64,
}

// ── Per-node result ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventNodeSummary<'a> {
    pub event: &'static str,
    pub node: &'a str,
    pub relay: bool,
    pub peers: usize,
    pub relays: usize,
    pub messages_received: usize,
    pub stats: &'a CoordStats,
}

// ── Summary ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub nodes: usize,
    pub messages_sent: u32,
    pub messages_acked: u32,
    pub send_failures: u32,
    pub messages_received: usize,
    pub ack_pct: f64,
    pub elapsed_s: f64,
}
