use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Lifecycle of a chat session. Only metadata is recorded; prompt and answer
/// text never reach the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    SessionStarted {
        model: String,
        max_output_tokens: u32,
    },
    RequestStarted {
        request_id: u64,
        prompt_chars: usize,
        reference: String,
    },
    RequestCancelled {
        request_id: u64,
    },
    ImageTranscoded {
        request_id: u64,
        image_path: String,
        thumbnail_path: String,
        mime_type: String,
        payload_bytes: usize,
    },
    ImageFailed {
        request_id: u64,
        image_path: String,
        message: String,
    },
    StreamCompleted {
        request_id: u64,
        fragments: usize,
        chars: usize,
        cancelled: bool,
    },
    ActionOffered {
        request_id: u64,
        kind: String,
        body_chars: usize,
    },
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - the event's own fields are merged last
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &ChatEvent) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));
        if let Value::Object(fields) = serde_json::to_value(event)? {
            record.extend(fields);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&record)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(record))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let emitted = writer.emit(&ChatEvent::RequestStarted {
            request_id: 1,
            prompt_chars: 12,
            reference: "text_marker".to_string(),
        })?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("request_started"));
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["request_id"], json!(1));
        assert_eq!(parsed["reference"], json!("text_marker"));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn emit_creates_missing_parent_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested/logs/events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.emit(&ChatEvent::RequestCancelled { request_id: 7 })?;

        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn emit_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.emit(&ChatEvent::SessionStarted {
            model: "gpt-4o".to_string(),
            max_output_tokens: 700,
        })?;
        writer.emit(&ChatEvent::ActionOffered {
            request_id: 1,
            kind: "preview-html".to_string(),
            body_chars: 8,
        })?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], json!("session_started"));
        assert_eq!(first["max_output_tokens"], json!(700));
        assert_eq!(second["type"], json!("action_offered"));
        assert_eq!(second["kind"], json!("preview-html"));
        Ok(())
    }
}
