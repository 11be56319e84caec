use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::asset::PersistedAsset;
use crate::progress::ProgressEvent;

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL log of one CLI run.
///
/// Every line carries `type`, `run_id` and `ts`; those keys are written last
/// so a payload cannot overwrite them.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventLog>,
}

#[derive(Debug)]
struct EventLog {
    path: PathBuf,
    run_id: String,
    file: Mutex<File>,
}

impl EventWriter {
    /// Creates parent directories and opens `path` for appending.
    pub fn open(path: impl Into<PathBuf>, run_id: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            inner: Arc::new(EventLog {
                path,
                run_id: run_id.into(),
                file: Mutex::new(file),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, mut payload: EventPayload) -> anyhow::Result<Value> {
        payload.insert("type".to_string(), Value::from(event_type));
        payload.insert("run_id".to_string(), Value::from(self.inner.run_id.as_str()));
        payload.insert("ts".to_string(), Value::from(now_utc_iso()));

        let mut line = serde_json::to_vec(&payload)?;
        line.push(b'\n');
        let mut file = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        file.write_all(&line)?;
        Ok(Value::Object(payload))
    }

    /// One `progress` line tagged with the request it belongs to.
    pub fn record_progress(&self, request_id: &str, event: &ProgressEvent) -> anyhow::Result<Value> {
        let mut payload = object(serde_json::to_value(event)?);
        payload.insert("request_id".to_string(), Value::from(request_id));
        self.emit("progress", payload)
    }

    /// One `asset_result` line per finished request, keyed by input position.
    pub fn record_asset(&self, request_index: usize, asset: &PersistedAsset) -> anyhow::Result<Value> {
        let mut payload = object(serde_json::to_value(asset)?);
        payload.insert("request_index".to_string(), Value::from(request_index));
        self.emit("asset_result", payload)
    }
}

fn object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
