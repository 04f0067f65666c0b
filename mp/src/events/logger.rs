//! Event Logger - persists events to JSONL files
//!
//! Subscribes to the EventBus and appends every event to
//! `<events-dir>/<session-id>/events.jsonl`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, PlanEvent};

pub struct EventLogger {
    events_dir: PathBuf,
    /// Open file writers per session
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(events_dir: impl AsRef<Path>) -> Self {
        let events_dir = events_dir.as_ref().to_path_buf();
        debug!(?events_dir, "EventLogger::new: creating logger");
        Self {
            events_dir,
            writers: HashMap::new(),
        }
    }

    /// Append one event to its session's log file
    pub fn write_event(&mut self, event: &PlanEvent) -> eyre::Result<()> {
        let session_id = event.session_id().to_string();
        debug!(%session_id, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(&session_id) {
            let session_dir = self.events_dir.join(&session_id);
            fs::create_dir_all(&session_dir)
                .with_context(|| format!("Failed to create event directory {}", session_dir.display()))?;
            let log_path = session_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open {}", log_path.display()))?;
            self.writers.insert(session_id.clone(), BufWriter::new(file));
        }

        let Some(writer) = self.writers.get_mut(&session_id) else {
            return Ok(());
        };
        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events until the bus closes; meant to be spawned
    pub async fn run(mut self, mut rx: broadcast::Receiver<PlanEvent>) {
        debug!("EventLogger::run: starting event logger");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let session_id = event.session_id().to_string();
                    if let Err(e) = self.write_event(&event) {
                        error!(%session_id, error = %e, "EventLogger: failed to write event");
                    }
                    if matches!(event, PlanEvent::SessionClosed { .. }) {
                        self.close_session(&session_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (session_id, mut writer) in self.writers.drain() {
            debug!(%session_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read back a session's event log; missing logs read as empty
pub fn read_session_events(events_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = events_dir.as_ref().join(session_id).join("events.jsonl");
    debug!(?log_path, "read_session_events: called");
    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content =
        fs::read_to_string(&log_path).with_context(|| format!("Failed to read {}", log_path.display()))?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_session_events: failed to parse line"),
        }
    }
    debug!(count = entries.len(), "read_session_events: loaded entries");
    Ok(entries)
}

/// Spawn the logger as a background task writing under `events_dir`
pub fn spawn_event_logger(event_bus: Arc<EventBus>, events_dir: PathBuf) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(events_dir);
    let rx = event_bus.subscribe();
    tokio::spawn(logger.run(rx))
}
