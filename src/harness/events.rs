//! Stream event normalization
//!
//! The agent CLI emits one JSON object per stdout line. Each complete line
//! is normalized to one of five event kinds; non-JSON lines are kept in the
//! byte log but produce no event.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    Heartbeat,
    Reasoning,
    Tool,
    Status,
    Message,
}

impl StreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventKind::Heartbeat => "heartbeat",
            StreamEventKind::Reasoning => "reasoning",
            StreamEventKind::Tool => "tool",
            StreamEventKind::Status => "status",
            StreamEventKind::Message => "message",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub payload: Value,
}

impl StreamEvent {
    pub fn heartbeat() -> Self {
        Self {
            kind: StreamEventKind::Heartbeat,
            payload: serde_json::json!({ "type": "heartbeat", "synthetic": true }),
        }
    }

    /// A short human-readable line for logging.
    pub fn summary(&self) -> String {
        let detail = self
            .payload
            .get("message")
            .or_else(|| self.payload.get("text"))
            .or_else(|| self.payload.get("label"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        match detail {
            Some(detail) => format!("{}: {detail}", self.kind.as_str()),
            None => self.kind.as_str().to_string(),
        }
    }
}

/// Normalize one stdout line. Returns `None` for blank or non-JSON lines.
pub fn normalize_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let payload: Value = serde_json::from_str(trimmed).ok()?;
    if !payload.is_object() {
        return None;
    }

    let type_name = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();

    let kind = if type_name.contains("heartbeat") {
        StreamEventKind::Heartbeat
    } else if type_name.contains("reasoning") || type_name.contains("thinking") {
        StreamEventKind::Reasoning
    } else if type_name.contains("tool")
        || type_name.contains("command")
        || type_name.contains("exec")
        || type_name.contains("patch")
    {
        StreamEventKind::Tool
    } else if type_name.contains("message") {
        StreamEventKind::Message
    } else {
        StreamEventKind::Status
    };

    Some(StreamEvent { kind, payload })
}
