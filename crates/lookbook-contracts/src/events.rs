use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only request event log (`events.jsonl`).
///
/// - default fields are `type`, `request_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Clones share the file lock, so concurrent requests never interleave
/// partial lines.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Scope the log to one request so every emitted line carries its id.
    pub fn for_request(&self, request_id: impl Into<String>) -> RequestEvents {
        RequestEvents {
            log: self.clone(),
            request_id: request_id.into(),
        }
    }

    pub fn emit(
        &self,
        event_type: &str,
        request_id: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "request_id".to_string(),
            Value::String(request_id.to_string()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Event sink bound to a single request id.
#[derive(Debug, Clone)]
pub struct RequestEvents {
    log: EventLog,
    request_id: String,
}

impl RequestEvents {
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        self.log.emit(event_type, &self.request_id, payload)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path);

        let mut payload = EventPayload::new();
        payload.insert(
            "endpoint".to_string(),
            Value::String("analyze-fashion".to_string()),
        );
        let emitted = log.emit("request_started", "req-123", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("request_started".to_string()));
        assert_eq!(parsed["request_id"], Value::String("req-123".to_string()));
        assert_eq!(
            parsed["endpoint"],
            Value::String("analyze-fashion".to_string())
        );

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"));

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        payload.insert(
            "request_id".to_string(),
            Value::String("override-req".to_string()),
        );
        let emitted = log.emit("request_started", "req-123", payload)?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        assert_eq!(
            emitted["request_id"],
            Value::String("override-req".to_string())
        );
        Ok(())
    }

    #[test]
    fn request_scoped_events_share_one_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let log = EventLog::new(&path);
        let first = log.for_request("req-a");
        let second = log.for_request("req-b");

        first.emit("one", EventPayload::new())?;
        second.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let one: Value = serde_json::from_str(lines[0])?;
        let two: Value = serde_json::from_str(lines[1])?;
        assert_eq!(one["request_id"], Value::String("req-a".to_string()));
        assert_eq!(two["type"], Value::String("two".to_string()));
        assert_eq!(two["request_id"], Value::String("req-b".to_string()));
        Ok(())
    }
}
