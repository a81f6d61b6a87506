//! Run report - the complete, ordered record of a run

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{TaskOutcome, TaskResult};

/// Overall status of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed {
        /// First failing task in declaration order, if any task failed
        failed_task: Option<String>,
        /// The run was cancelled before every task was dispatched
        cancelled: bool,
    },
}

/// Ordered outcomes plus overall status
///
/// Outcomes follow declaration order, not completion order. Tasks that
/// were never dispatched (after a failure or cancellation) have no
/// outcome and are listed in `not_run`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
    pub not_run: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Counts by result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub not_run: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn failed_task(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Failed { failed_task, .. } => failed_task.as_deref(),
            RunStatus::Succeeded => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, RunStatus::Failed { cancelled: true, .. })
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            not_run: self.not_run.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match outcome.result {
                TaskResult::Changed => summary.changed += 1,
                TaskResult::Unchanged => summary.unchanged += 1,
                TaskResult::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Machine-readable form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&JsonReport::from(self))
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    status: &'static str,
    failed_task: Option<&'a str>,
    cancelled: bool,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration_ms: i64,
    summary: RunSummary,
    tasks: Vec<JsonOutcome<'a>>,
    not_run: &'a [String],
}

#[derive(Serialize)]
struct JsonOutcome<'a> {
    task_name: &'a str,
    result: TaskResult,
    detail: &'a str,
    duration_ms: i64,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
}

impl<'a> From<&'a RunReport> for JsonReport<'a> {
    fn from(report: &'a RunReport) -> Self {
        Self {
            status: if report.is_success() {
                "succeeded"
            } else {
                "failed"
            },
            failed_task: report.failed_task(),
            cancelled: report.is_cancelled(),
            started_at: report.started_at,
            ended_at: report.ended_at,
            duration_ms: report.duration_ms(),
            summary: report.summary(),
            tasks: report
                .outcomes
                .iter()
                .map(|o| JsonOutcome {
                    task_name: &o.task_name,
                    result: o.result,
                    detail: &o.detail,
                    duration_ms: o.duration_ms(),
                    started_at: o.started_at,
                    ended_at: o.ended_at,
                })
                .collect(),
            not_run: &report.not_run,
        }
    }
}
