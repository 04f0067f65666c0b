//! SessionStore - one JSON snapshot per planning record
//!
//! Snapshots are written to a temp file and renamed into place, so a crash
//! mid-write never leaves a truncated record behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{PipelineStep, PlanningRecord, Stage};

/// One line of `mp sessions list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub plan_name: String,
    pub stage: Stage,
    pub run_step: Option<PipelineStep>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PlanningRecord> for SessionSummary {
    fn from(record: &PlanningRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            plan_name: record.plan_name(),
            stage: record.stage,
            run_step: record.agent_run.as_ref().map(|run| run.step),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        debug!(?dir, "SessionStore::new: called");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids are restricted to `[A-Za-z0-9_-]` so they can never leave the directory
    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        if !is_valid_session_id(session_id) {
            bail!("invalid session id {:?}", session_id);
        }
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    pub fn save(&self, record: &PlanningRecord) -> Result<()> {
        debug!(session_id = %record.session_id, "SessionStore::save: called");
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create sessions directory {}", self.dir.display()))?;
        let path = self.path_for(&record.session_id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record).context("Failed to serialize planning record")?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
        Ok(())
    }

    /// `None` when no snapshot exists for the id
    pub fn load(&self, session_id: &str) -> Result<Option<PlanningRecord>> {
        debug!(%session_id, "SessionStore::load: called");
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session snapshot {}", path.display()))?;
        Ok(Some(record))
    }

    /// Every readable snapshot, most recently updated first
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        debug!(dir = ?self.dir, "SessionStore::list: called");
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("Failed to read {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(session_id) {
                Ok(Some(record)) => summaries.push(SessionSummary::from(&record)),
                Ok(None) => {}
                Err(e) => warn!(?path, error = %e, "SessionStore::list: skipping unreadable snapshot"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Returns whether a snapshot was deleted
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        debug!(%session_id, "SessionStore::delete: called");
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
        Ok(true)
    }
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
