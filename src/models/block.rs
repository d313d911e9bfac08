use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::input::BlockSource;

/// One contiguous scheduled interval in the solver's output plan.
///
/// Invariants: blocks for one user never overlap, and the blocks of a task sum
/// to exactly its required duration (otherwise the task is reported infeasible
/// and contributes no blocks at all).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBlock {
    pub source: BlockSource,
    pub source_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub priority: String,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Terminal reason codes attached to a solver result or failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    #[serde(rename = "INFEASIBLE_HARD")]
    InfeasibleHard,
    #[serde(rename = "UNSATISFIABLE_CHUNKS")]
    UnsatisfiableChunks,
    #[serde(rename = "TASKS_LATE")]
    TasksLate,
    #[serde(rename = "SUPERSEDED_BY_NEWER_RUN")]
    SupersededByNewerRun,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::InfeasibleHard => "INFEASIBLE_HARD",
            ReasonCode::UnsatisfiableChunks => "UNSATISFIABLE_CHUNKS",
            ReasonCode::TasksLate => "TASKS_LATE",
            ReasonCode::SupersededByNewerRun => "SUPERSEDED_BY_NEWER_RUN",
        }
    }
}

/// Why a task with a deadline still finishes late.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatenessReason {
    /// Allowed, non-busy capacity before the deadline is short by `missingSlots`.
    InsufficientCapacity { missing_slots: usize },
    /// Capacity exists but fragmentation or ordering prevented on-time placement.
    PlacementConflictsOrChunkConstraints,
}

impl LatenessReason {
    pub fn code(&self) -> String {
        match self {
            LatenessReason::InsufficientCapacity { missing_slots } => {
                format!("insufficient_capacity_missing_{}_slots", missing_slots)
            }
            LatenessReason::PlacementConflictsOrChunkConstraints => {
                "placement_conflicts_or_chunk_constraints".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateTaskDiagnostic {
    pub task_id: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub finishes_at: DateTime<Utc>,
    pub late_slots: usize,
    pub reason: LatenessReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitShortfallDiagnostic {
    pub habit_id: String,
    pub title: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub target_count: u32,
    pub placed_count: u32,
}

/// A habit excluded from the run entirely, e.g. for an unsupported rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedHabitDiagnostic {
    pub habit_id: String,
    pub title: String,
    pub reason: String,
}

/// Complete output of one solver invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverResult {
    pub horizon_start: DateTime<Utc>,
    pub horizon_end: DateTime<Utc>,
    /// Every hard deadline can be met.
    pub feasible_on_time: bool,
    /// Every task fits somewhere in the horizon, deadlines ignored.
    pub feasible_hard: bool,
    pub objective_score: f64,
    pub blocks: Vec<ScheduledBlock>,
    pub late_tasks: Vec<LateTaskDiagnostic>,
    pub habit_shortfalls: Vec<HabitShortfallDiagnostic>,
    pub dropped_habits: Vec<DroppedHabitDiagnostic>,
    #[serde(default)]
    pub reason: Option<ReasonCode>,
}

impl SolverResult {
    pub fn tasks_scheduled(&self) -> usize {
        let mut ids: Vec<&str> = self
            .blocks
            .iter()
            .filter(|b| b.source == BlockSource::Task)
            .map(|b| b.source_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn habit_occurrences_scheduled(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.source == BlockSource::Habit)
            .count()
    }
}
