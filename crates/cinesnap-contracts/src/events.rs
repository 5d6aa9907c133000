use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Lifecycle records written to `events.jsonl`.
///
/// Prompts are identified by digest only. Image payloads never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StudioEvent {
    GenerationStarted {
        client: String,
        prompt_sha256: String,
        prompt_chars: usize,
        aspect_ratio: String,
        quality_preset: String,
        camera_view: String,
        has_negative_prompt: bool,
    },
    GenerationSucceeded {
        id: String,
        image_bytes: usize,
        history_saved: bool,
    },
    GenerationFailed {
        kind: String,
        message: String,
    },
    HistoryAppended {
        id: String,
        size: usize,
    },
    HistoryPersistFailed {
        id: String,
        error: String,
    },
    HistoryCleared,
}

impl StudioEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GenerationStarted { .. } => "generation_started",
            Self::GenerationSucceeded { .. } => "generation_succeeded",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::HistoryAppended { .. } => "history_appended",
            Self::HistoryPersistFailed { .. } => "history_persist_failed",
            Self::HistoryCleared => "history_cleared",
        }
    }
}

/// Append-only JSONL sink for [`StudioEvent`]s, one compact object per line with
/// `session_id` and an RFC3339 `ts` added.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
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

    /// Writes one line and returns the object as written.
    pub fn append(&self, event: &StudioEvent) -> anyhow::Result<Value> {
        let Value::Object(mut row) = serde_json::to_value(event)? else {
            bail!("{} did not serialize to an object", event.event_type());
        };
        row.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        row.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        let line = serde_json::to_string(&row)?;

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(Value::Object(row))
    }

    /// Like [`EventLog::append`], but failures only reach the diagnostic log.
    pub fn record(&self, event: &StudioEvent) {
        if let Err(err) = self.append(event) {
            tracing::warn!(
                event_type = event.event_type(),
                path = %self.inner.path.display(),
                "event log write failed: {err:#}"
            );
        }
    }
}
