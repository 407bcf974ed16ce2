//! Audit trail emission.
//!
//! Every gateway call produces exactly one [`AuditEvent`], whatever the
//! outcome. Events are write-once: the core hands them to an [`AuditSink`]
//! and never reads them back. Sink failures are logged and swallowed; the
//! audit path must never fail a command request.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::executor::CommandOutcome;

/// One immutable record of a command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u128,
    pub user: String,
    pub device: String,
    pub command: String,
    pub outcome: CommandOutcome,
    /// Truncated raw output; empty when the device was never reached.
    pub raw_excerpt: String,
    /// Whether a structured record accompanied the raw output.
    pub structured: bool,
    /// Execution time, absent for requests rejected before execution.
    pub duration_ms: Option<u64>,
}

impl AuditEvent {
    pub fn new(
        user: &str,
        device: &str,
        command: &str,
        outcome: CommandOutcome,
        raw: &str,
        excerpt_len: usize,
        structured: bool,
        duration_ms: Option<u64>,
    ) -> Self {
        Self {
            ts_ms: now_ms(),
            user: user.to_string(),
            device: device.to_string(),
            command: command.to_string(),
            outcome,
            raw_excerpt: truncate(raw, excerpt_len),
            structured,
            duration_ms,
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn truncate(raw: &str, max: usize) -> String {
    if raw.len() <= max {
        return raw.to_string();
    }
    // Cut on a char boundary at or below the byte budget.
    let mut end = max;
    while end > 0 && !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

/// Destination for audit events. Fire-and-forget from the core's view.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events through the structured logger only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => info!(target: "audit", "{line}"),
            Err(err) => warn!("Failed to serialize audit event: {err}"),
        }
    }
}

/// Appends one JSON line per event to a file, and mirrors it to the
/// structured logger for SIEM collectors.
pub struct JsonlAuditSink {
    path: PathBuf,
    // Serializes appends so concurrent requests do not interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to serialize audit event: {err}");
                return;
            }
        };
        info!(target: "audit", "{line}");

        let guard = self.write_lock.lock();
        let _guard = match guard {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            warn!("Failed to write audit log to {:?}: {err}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: CommandOutcome, raw: &str) -> AuditEvent {
        AuditEvent::new(
            "alice",
            "r1",
            "show version",
            outcome,
            raw,
            16,
            false,
            Some(12),
        )
    }

    #[test]
    fn excerpt_is_truncated_to_budget() {
        let event = event(CommandOutcome::ParseWarning, &"x".repeat(100));
        assert_eq!(event.raw_excerpt.len(), 16);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; cutting at 3 would split the second one.
        assert_eq!(truncate("éé", 3), "é");
        assert_eq!(truncate("éé", 4), "éé");
    }

    #[test]
    fn events_serialize_with_snake_case_outcomes() {
        let json =
            serde_json::to_string(&event(CommandOutcome::AccessDenied, "")).expect("serialize");
        assert!(json.contains("\"outcome\":\"access_denied\""));
        assert!(json.contains("\"user\":\"alice\""));
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.log");
        let sink = JsonlAuditSink::new(&path);

        sink.record(event(CommandOutcome::Success, "output"));
        sink.record(event(CommandOutcome::Timeout, ""));

        let contents = std::fs::read_to_string(&path).expect("read audit log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEvent = serde_json::from_str(lines[0]).expect("first line parses");
        assert_eq!(first.outcome, CommandOutcome::Success);
        let second: AuditEvent = serde_json::from_str(lines[1]).expect("second line parses");
        assert_eq!(second.outcome, CommandOutcome::Timeout);
    }
}
