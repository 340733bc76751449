//! Operator-facing log of notable OBS events.
//!
//! Entries are kept in a bounded in-memory ring and, when a directory is
//! configured, appended as JSON lines to a daily file
//! (`obs-ops-YYYY-MM-DD.log`) by a background writer task.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::event::ObsEvent;

/// Entries kept in memory.
pub const DEFAULT_CAPACITY: usize = 2000;

/// One operator log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsEntry {
    pub t: DateTime<Local>,
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

enum WriterCommand {
    Append(OpsEntry),
    Flush(oneshot::Sender<()>),
}

/// Bounded operator log with optional daily files.
pub struct OpsLog {
    entries: Mutex<VecDeque<OpsEntry>>,
    capacity: usize,
    dir: Option<PathBuf>,
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
}

impl OpsLog {
    /// In-memory log only.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
            dir: None,
            writer: None,
        }
    }

    /// Log that also appends to daily files under `dir`.
    ///
    /// Spawns the writer task, so it must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn persistent(capacity: usize, dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_entries(dir.clone(), rx));

        let mut log = Self::new(capacity);
        log.dir = Some(dir);
        log.writer = Some(tx);
        Ok(log)
    }

    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Path of the file for the given day.
    #[must_use]
    pub fn file_for(&self, t: &DateTime<Local>) -> Option<PathBuf> {
        self.dir.as_deref().map(|dir| daily_file(dir, t))
    }

    /// Append an entry.
    pub fn push(&self, kind: &str, msg: impl Into<String>, data: Value) -> OpsEntry {
        let entry = OpsEntry { t: Local::now(), kind: kind.to_string(), msg: msg.into(), data };

        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        if let Some(writer) = &self.writer
            && writer.send(WriterCommand::Append(entry.clone())).is_err()
        {
            warn!("Ops log writer has stopped; entry kept in memory only");
        }
        entry
    }

    /// Wait until every entry pushed so far has been written to disk.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(WriterCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Record an OBS event if it is one operators care about.
    pub fn record(&self, event: &ObsEvent) -> Option<OpsEntry> {
        let (kind, msg, data) = describe(event)?;
        Some(self.push(kind, msg, data))
    }

    /// The most recent `limit` entries, oldest first.
    #[must_use]
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<OpsEntry> {
        let entries = self.entries.lock();
        let skip = limit.map_or(0, |limit| entries.len().saturating_sub(limit));
        entries.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for OpsLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn daily_file(dir: &Path, t: &DateTime<Local>) -> PathBuf {
    dir.join(format!("obs-ops-{}.log", t.format("%Y-%m-%d")))
}

async fn append(dir: &Path, entry: &OpsEntry) -> io::Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file =
        tokio::fs::OpenOptions::new().create(true).append(true).open(daily_file(dir, &entry.t)).await?;
    file.write_all(line.as_bytes()).await
}

/// Append entries in order until every sender is gone.
async fn write_entries(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Append(entry) => {
                if let Err(e) = append(&dir, &entry).await {
                    warn!(error = %e, "Failed to write ops log entry");
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn output_transition(state: &str) -> Option<&'static str> {
    if state.ends_with("_STARTED") {
        Some("started")
    } else if state.ends_with("_STOPPED") {
        Some("stopped")
    } else {
        None
    }
}

fn describe(event: &ObsEvent) -> Option<(&'static str, String, Value)> {
    let described = match event {
        ObsEvent::StreamStateChanged { state, .. } => {
            let verb = output_transition(state)?;
            ("stream", format!("Stream {verb}"), json!({ "state": state }))
        }
        ObsEvent::RecordStateChanged { state, path, .. } => {
            let verb = output_transition(state)?;
            ("record", format!("Recording {verb}"), json!({ "state": state, "path": path }))
        }
        ObsEvent::VirtualcamStateChanged { state, .. } => {
            let verb = output_transition(state)?;
            ("virtualcam", format!("Virtual Camera {verb}"), json!({ "state": state }))
        }
        ObsEvent::CurrentProgramSceneChanged { scene } => {
            ("scene", format!("Switched Program scene → {scene}"), json!({ "scene": scene }))
        }
        ObsEvent::CurrentPreviewSceneChanged { scene } => {
            ("scene", format!("Switched Preview scene → {scene}"), json!({ "scene": scene }))
        }
        ObsEvent::SceneCreated { scene, .. } => ("scene", format!("Scene created: {scene}"), json!({ "scene": scene })),
        ObsEvent::SceneRemoved { scene, .. } => ("scene", format!("Scene removed: {scene}"), json!({ "scene": scene })),
        ObsEvent::CurrentSceneCollectionChanged { name } => {
            ("collection", format!("Scene Collection changed → {name}"), json!({ "collection": name }))
        }
        ObsEvent::InputMuteStateChanged { input, muted } => {
            let verb = if *muted { "Muted" } else { "Unmuted" };
            ("audio", format!("{verb}: {input}"), json!({ "input": input, "muted": muted }))
        }
        ObsEvent::InputVolumeChanged { input, volume_mul, volume_db } => (
            "audio",
            format!("Volume changed: {input} → {volume_mul:.3}"),
            json!({ "input": input, "mul": volume_mul, "db": volume_db }),
        ),
        ObsEvent::InputActiveStateChanged { input, active } => {
            let verb = if *active { "active" } else { "inactive" };
            ("source", format!("Source {verb}: {input}"), json!({ "input": input, "active": active }))
        }
        ObsEvent::SourceFilterEnableStateChanged { source, filter, enabled } => {
            let verb = if *enabled { "Enabled" } else { "Disabled" };
            (
                "filter",
                format!("{verb} filter '{filter}' on {source}"),
                json!({ "source": source, "filter": filter, "enabled": enabled }),
            )
        }
        ObsEvent::StudioModeStateChanged { enabled } => {
            let verb = if *enabled { "enabled" } else { "disabled" };
            ("studio", format!("Studio Mode {verb}"), json!({ "enabled": enabled }))
        }
        ObsEvent::CurrentSceneTransitionChanged { transition } => {
            ("transition", format!("Transition changed → {transition}"), json!({ "transition": transition }))
        }
        ObsEvent::SceneTransitionEnded { transition, from, to } => {
            let from = from.as_deref().unwrap_or("?");
            let to = to.as_deref().unwrap_or("?");
            (
                "transition",
                format!("Transition '{transition}' ended: {from} → {to}"),
                json!({ "transition": transition, "from": from, "to": to }),
            )
        }
        _ => return None,
    };
    Some(described)
}
