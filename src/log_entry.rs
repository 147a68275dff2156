//! Canonical log entry shape and the stream line parser that produces it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

/// The five recognized severities. Anything else collapses to the caller's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
    Warning,
    Debug,
    Trace,
}

impl Severity {
    fn from_str(s: &str) -> Option<Severity> {
        match s {
            "info" => Some(Severity::Info),
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "debug" => Some(Severity::Debug),
            "trace" => Some(Severity::Trace),
            _ => None,
        }
    }
}

/// Canonical in-memory shape of a delivered log entry. `extra` carries any
/// top-level JSON fields from the source line that were not consumed while
/// computing `severity`/`message`/`timestamp`, and passes them through
/// unchanged on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub message: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `LogEntry` plus the instant it was enqueued, used to age it out of the
/// retention buffer.
#[derive(Debug, Clone)]
pub struct BufferedEntry {
    pub entry: LogEntry,
    pub enqueued_at: Instant,
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

/// Parses a single line of intercepted stream output into a `LogEntry`.
///
/// Attempts to decode `line` as a JSON object first; on success, `severity`
/// is taken from `level` then `type` then `default`, `message` from `message`
/// then `msg` then the trimmed line, and `timestamp` from `timestamp` then
/// `time` then now. All other top-level fields pass through unchanged. On
/// decode failure (or if the JSON value is not an object), the whole trimmed
/// line becomes `message` under `default` severity.
pub fn parse_line(line: &str, default: Severity) -> LogEntry {
    let trimmed = line.trim();

    if let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(trimmed) {
        let severity = fields
            .get("level")
            .or_else(|| fields.get("type"))
            .and_then(Value::as_str)
            .and_then(Severity::from_str)
            .unwrap_or(default);
        let message = fields
            .get("message")
            .or_else(|| fields.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string());
        let timestamp = fields
            .get("timestamp")
            .or_else(|| fields.get("time"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(now_iso8601);

        // Only drop the keys that would otherwise collide with the struct's
        // own field names in the flattened output; `level`/`msg`/`time` are
        // distinct keys and remain in `extra`.
        fields.remove("type");
        fields.remove("message");
        fields.remove("timestamp");

        return LogEntry {
            severity,
            message,
            timestamp,
            extra: fields,
        };
    }

    LogEntry {
        severity: default,
        message: trimmed.to_string(),
        timestamp: now_iso8601(),
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line_passthrough() {
        let entry = parse_line(r#"{"level":"error","msg":"boom","code":42}"#, Severity::Info);
        assert!(matches!(entry.severity, Severity::Error));
        assert_eq!(entry.message, "boom");
        assert_eq!(entry.extra.get("level").unwrap(), "error");
        assert_eq!(entry.extra.get("msg").unwrap(), "boom");
        assert_eq!(entry.extra.get("code").unwrap(), 42);
        assert!(!entry.timestamp.is_empty());
    }

    #[test]
    fn plain_text_line_uses_default_severity() {
        let entry = parse_line("segfault", Severity::Error);
        assert!(matches!(entry.severity, Severity::Error));
        assert_eq!(entry.message, "segfault");
        assert!(entry.extra.is_empty());
    }

    #[test]
    fn unrecognized_level_collapses_to_default() {
        let entry = parse_line(r#"{"level":"fatal","message":"oh no"}"#, Severity::Info);
        assert!(matches!(entry.severity, Severity::Info));
        assert_eq!(entry.message, "oh no");
    }

    #[test]
    fn trims_whitespace() {
        let entry = parse_line("   hello world   ", Severity::Info);
        assert_eq!(entry.message, "hello world");
    }

    #[test]
    fn empty_line_yields_empty_message() {
        let entry = parse_line("   ", Severity::Info);
        assert_eq!(entry.message, "");
    }
}
