use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::block::ReasonCode;
use crate::models::input::TriggeredBy;

/// Lifecycle state of a scheduling run. `Completed` and `Failed` are terminal
/// and never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(AppError::validation(format!("Invalid run status: {}", s))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total order over runs of one user. Larger keys are strictly newer and win
/// supersession. The sequence number is assigned atomically by the persistence
/// layer at insert time, so the order is strict even for timestamp ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOrderKey {
    pub started_at: DateTime<Utc>,
    pub sequence_number: i64,
    pub id: String,
}

impl Ord for RunOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.started_at
            .cmp(&other.started_at)
            .then_with(|| self.sequence_number.cmp(&other.sequence_number))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for RunOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A persisted scheduling run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingRun {
    pub id: String,
    pub sequence_number: i64,
    pub user_id: String,
    pub triggered_by: TriggeredBy,
    pub status: RunStatus,
    #[serde(default)]
    pub reason: Option<ReasonCode>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub summary: Option<RunSummary>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SchedulingRun {
    pub fn order_key(&self) -> RunOrderKey {
        RunOrderKey {
            started_at: self.started_at,
            sequence_number: self.sequence_number,
            id: self.id.clone(),
        }
    }
}

/// Caller-facing completion summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub tasks_scheduled: usize,
    pub habit_occurrences_scheduled: usize,
    pub feasible_on_time: bool,
    pub feasible_hard: bool,
    pub objective_score: f64,
    pub late_task_count: usize,
    pub habit_shortfall_count: usize,
    pub dropped_habit_count: usize,
    #[serde(default)]
    pub reason: Option<ReasonCode>,
}
