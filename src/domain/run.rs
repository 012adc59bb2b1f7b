//! Workflow run requests, stages, and summaries.
//!
//! A run is one pass of the pipeline for a (location, trigger) pair. The
//! coordinator is the only owner of run-level state; stages consume and
//! return data without touching it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::campaign::Trigger;

/// Caller-facing request for a campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Target location, or None for a lifecycle-wide sweep
    pub location: Option<String>,

    pub trigger: Trigger,

    /// When set, one run is executed per location in order
    pub locations: Option<Vec<String>>,

    /// Execute all stages but simulate the send call
    pub dry_run: bool,
}

impl RunRequest {
    pub fn new(location: Option<String>, trigger: Trigger) -> Self {
        Self {
            location,
            trigger,
            locations: None,
            dry_run: false,
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    CollectingContext,
    Targeting,
    Composing,
    Personalizing,
    Dispatching,
    Complete,
    Failed,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectingContext => "collecting_context",
            Self::Targeting => "targeting",
            Self::Composing => "composing",
            Self::Personalizing => "personalizing",
            Self::Dispatching => "dispatching",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final disposition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All targeted campaigns dispatched without errors
    Success,

    /// The run completed but some items failed or were skipped
    PartialSuccess,

    /// An infrastructure failure aborted the run
    Failed,
}

/// A per-item failure captured into the run summary.
///
/// These never abort the run; they exist so an operator can see which
/// customer/campaign failed at which stage and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub stage: RunStage,

    /// Customer or campaign identifier the error relates to, if any
    pub subject: Option<String>,

    pub reason: String,
}

impl RunError {
    pub fn new(stage: RunStage, subject: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            subject,
            reason: reason.into(),
        }
    }
}

/// Aggregated outcome of one run, always returned to the caller even when
/// items failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub status: RunStatus,

    pub trigger: Trigger,

    pub location: Option<String>,

    pub total_targeted: usize,

    pub campaigns_created: usize,

    pub campaigns_sent: usize,

    pub campaigns_failed: usize,

    /// Targets excluded during personalization
    pub skipped: usize,

    pub errors: Vec<RunError>,

    pub started_at: DateTime<Utc>,

    pub elapsed_ms: u64,

    /// True when sends were simulated
    pub dry_run: bool,
}

impl RunSummary {
    /// Derive the final status from the counters: any per-item failure or
    /// skip downgrades success to partial.
    pub fn finalize_status(&mut self) {
        self.status = if self.campaigns_failed == 0 && self.errors.is_empty() && self.skipped == 0 {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            status: RunStatus::Success,
            trigger: Trigger::Scheduled,
            location: Some("Mumbai".to_string()),
            total_targeted: 3,
            campaigns_created: 3,
            campaigns_sent: 3,
            campaigns_failed: 0,
            skipped: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 10,
            dry_run: false,
        }
    }

    #[test]
    fn test_status_success_when_clean() {
        let mut s = summary();
        s.finalize_status();
        assert_eq!(s.status, RunStatus::Success);
    }

    #[test]
    fn test_status_partial_on_failures() {
        let mut s = summary();
        s.campaigns_failed = 1;
        s.campaigns_sent = 2;
        s.errors.push(RunError::new(
            RunStage::Dispatching,
            Some("cmp-1".to_string()),
            "recipient rejected",
        ));
        s.finalize_status();
        assert_eq!(s.status, RunStatus::PartialSuccess);
    }
}
