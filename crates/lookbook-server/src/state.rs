use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use lookbook_contracts::events::{EventLog, EventPayload};
use lookbook_contracts::geometry::BoxUnits;
use lookbook_contracts::models::TaskModels;
use lookbook_engine::GenerativeGateway;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn GenerativeGateway>,
    pub models: Arc<TaskModels>,
    pub events: Option<EventSink>,
    pub thumbnail_concurrency: usize,
    pub box_units: BoxUnits,
    pub max_upload_bytes: usize,
}

struct PendingEvent {
    request_id: String,
    event_type: String,
    payload: EventPayload,
}

/// Queue in front of an [`EventLog`]. A dedicated thread owns the file, so
/// handlers on the async runtime never block on disk.
#[derive(Clone)]
pub struct EventSink {
    path: PathBuf,
    sender: Sender<PendingEvent>,
}

impl EventSink {
    /// Start the writer thread. It drains the queue and exits once every
    /// clone of the returned sink is dropped.
    pub fn spawn(log: EventLog) -> Result<(Self, JoinHandle<()>)> {
        let (sink, receiver) = Self::channel(log.path());
        let handle = thread::Builder::new()
            .name("lookbook-events".to_string())
            .spawn(move || {
                for event in receiver {
                    if let Err(err) = log.emit(&event.event_type, &event.request_id, event.payload) {
                        tracing::warn!(
                            request_id = %event.request_id,
                            event_type = %event.event_type,
                            error = %format!("{err:#}"),
                            "event log write failed"
                        );
                    }
                }
            })
            .context("failed to start event log writer")?;
        Ok((sink, handle))
    }

    fn channel(path: &Path) -> (Self, Receiver<PendingEvent>) {
        let (sender, receiver) = mpsc::channel();
        let sink = Self {
            path: path.to_path_buf(),
            sender,
        };
        (sink, receiver)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn send(&self, request_id: &str, event_type: &str, payload: EventPayload) {
        let event = PendingEvent {
            request_id: request_id.to_string(),
            event_type: event_type.to_string(),
            payload,
        };
        if self.sender.send(event).is_err() {
            tracing::warn!(request_id, event_type, "event log writer has stopped");
        }
    }
}

/// Lifecycle events for one request. Event log writes never fail the
/// request; they are reported through `tracing` instead.
pub struct Audit {
    events: Option<EventSink>,
    request_id: String,
    endpoint: &'static str,
    started: Instant,
}

impl Audit {
    pub fn start(events: Option<&EventSink>, endpoint: &'static str) -> Self {
        let audit = Self {
            events: events.cloned(),
            request_id: Uuid::new_v4().to_string(),
            endpoint,
            started: Instant::now(),
        };
        tracing::debug!(request_id = %audit.request_id, endpoint, "request started");
        audit.emit("request_started", json!({ "endpoint": endpoint }));
        audit
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Queue an event; returns without touching the filesystem.
    pub fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        events.send(&self.request_id, event_type, payload);
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Record how the request ended and pass the result through.
    pub fn conclude<T>(self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        match &result {
            Ok(_) => {
                self.emit(
                    "request_finished",
                    json!({
                        "endpoint": self.endpoint,
                        "status": 200,
                        "elapsed_ms": self.elapsed_ms(),
                    }),
                );
            }
            Err(err) => {
                let status = err.status().as_u16();
                if err.status().is_server_error() {
                    tracing::error!(
                        request_id = %self.request_id,
                        endpoint = self.endpoint,
                        status,
                        error = err.summary(),
                        message = err.message(),
                        "request failed"
                    );
                } else {
                    tracing::info!(
                        request_id = %self.request_id,
                        endpoint = self.endpoint,
                        status,
                        error = err.summary(),
                        "request rejected"
                    );
                }
                self.emit(
                    "request_failed",
                    json!({
                        "endpoint": self.endpoint,
                        "status": status,
                        "error": err.summary(),
                        "message": err.message(),
                        "elapsed_ms": self.elapsed_ms(),
                    }),
                );
            }
        }
        result
    }
}
