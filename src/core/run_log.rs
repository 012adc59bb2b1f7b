//! Append-only per-run logs with file-based persistence.
//!
//! Each run writes newline-delimited JSON (JSONL) stage events to
//! `<runs_dir>/<run_id>.jsonl`, plus the final summary as its last
//! event. The `status` and `runs` commands replay these files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{RunStage, RunSummary};

/// One entry in a run's JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,

    pub stage: RunStage,

    pub at: DateTime<Utc>,

    /// Free-form stage detail, e.g. counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,

    /// Present only on the final event of a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl RunEvent {
    pub fn stage(run_id: Uuid, stage: RunStage) -> Self {
        Self {
            run_id,
            stage,
            at: Utc::now(),
            detail: None,
            summary: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_summary(mut self, summary: RunSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// File-based run log using JSONL format.
pub struct RunLog {
    runs_dir: PathBuf,
}

impl RunLog {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(format!("{}.jsonl", run_id))
    }

    /// Append an event to the run's log.
    pub async fn append(&self, event: &RunEvent) -> Result<()> {
        fs::create_dir_all(&self.runs_dir)
            .await
            .with_context(|| format!("Failed to create runs directory: {}", self.runs_dir.display()))?;

        let path = self.path_for(event.run_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open run log: {}", path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize run event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write run event")?;
        file.flush().await.context("Failed to flush run event")?;

        Ok(())
    }

    /// Replay all events for a run in order. Missing log: empty vec.
    pub async fn replay(&self, run_id: Uuid) -> Result<Vec<RunEvent>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open run log: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: RunEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse run event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// The final summary of a run, if it reached one.
    pub async fn summary(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let events = self.replay(run_id).await?;
        Ok(events.into_iter().rev().find_map(|e| e.summary))
    }

    /// Recent run ids, newest first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Uuid>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<(Uuid, std::time::SystemTime)> = Vec::new();
        let mut entries = fs::read_dir(&self.runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".jsonl")) else {
                continue;
            };
            let Ok(run_id) = Uuid::parse_str(stem) else {
                continue;
            };

            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            runs.push((run_id, modified));
        }

        runs.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(runs.into_iter().take(limit).map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunStatus, Trigger};
    use serde_json::json;
    use tempfile::TempDir;

    fn summary(run_id: Uuid) -> RunSummary {
        RunSummary {
            run_id,
            status: RunStatus::Success,
            trigger: Trigger::Scheduled,
            location: Some("Mumbai".to_string()),
            total_targeted: 2,
            campaigns_created: 2,
            campaigns_sent: 2,
            campaigns_failed: 0,
            skipped: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 42,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let log = RunLog::new(temp.path());
        let run_id = Uuid::new_v4();

        log.append(&RunEvent::stage(run_id, RunStage::CollectingContext))
            .await
            .unwrap();
        log.append(
            &RunEvent::stage(run_id, RunStage::Targeting).with_detail(json!({"targets": 2})),
        )
        .await
        .unwrap();
        log.append(&RunEvent::stage(run_id, RunStage::Complete).with_summary(summary(run_id)))
            .await
            .unwrap();

        let events = log.replay(run_id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].stage, RunStage::CollectingContext);
        assert_eq!(events[1].detail, Some(json!({"targets": 2})));

        let found = log.summary(run_id).await.unwrap().unwrap();
        assert_eq!(found.campaigns_sent, 2);
    }

    #[tokio::test]
    async fn test_replay_missing_run_is_empty() {
        let temp = TempDir::new().unwrap();
        let log = RunLog::new(temp.path());

        let events = log.replay(Uuid::new_v4()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_list_runs_limit() {
        let temp = TempDir::new().unwrap();
        let log = RunLog::new(temp.path());

        for _ in 0..3 {
            let run_id = Uuid::new_v4();
            log.append(&RunEvent::stage(run_id, RunStage::Complete))
                .await
                .unwrap();
        }

        assert_eq!(log.list_runs(10).await.unwrap().len(), 3);
        assert_eq!(log.list_runs(2).await.unwrap().len(), 2);
    }
}
