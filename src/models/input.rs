use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};

/// Task priority tiers. `Blocker` sits strictly above `Critical` and receives
/// additional early-start pressure in the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
    Blocker,
}

impl Priority {
    /// Exponential weight: 2^level.
    pub fn weight(self) -> f64 {
        match self {
            Priority::Low => 1.0,
            Priority::Medium => 2.0,
            Priority::High => 4.0,
            Priority::Critical => 8.0,
            Priority::Blocker => 16.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
            Priority::Blocker => "blocker",
        }
    }
}

impl FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            "blocker" => Ok(Priority::Blocker),
            _ => Err(AppError::validation(format!("Invalid priority: {}", s))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Habit priority tiers. Habits have no blocker tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl HabitPriority {
    pub fn weight(self) -> f64 {
        match self {
            HabitPriority::Low => 1.0,
            HabitPriority::Medium => 2.0,
            HabitPriority::High => 4.0,
            HabitPriority::Critical => 8.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HabitPriority::Low => "low",
            HabitPriority::Medium => "medium",
            HabitPriority::High => "high",
            HabitPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for HabitPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement strategy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Earliest available slot wins.
    Fastest,
    /// Candidates ranked by a caller-supplied score (e.g. hug the deadline).
    Balanced,
    /// Latest available slot wins.
    Packed,
}

impl SchedulingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulingMode::Fastest => "fastest",
            SchedulingMode::Balanced => "balanced",
            SchedulingMode::Packed => "packed",
        }
    }
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a habit does about a missed occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Missed occurrences are dropped silently.
    Skip,
    /// Missed occurrences count as a shortfall to minimize.
    Recover,
}

impl RecoveryPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryPolicy::Skip => "skip",
            RecoveryPolicy::Recover => "recover",
        }
    }
}

/// Origin of a scheduled block or persisted placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    Task,
    Habit,
}

impl BlockSource {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockSource::Task => "task",
            BlockSource::Habit => "habit",
        }
    }
}

impl FromStr for BlockSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(BlockSource::Task),
            "habit" => Ok(BlockSource::Habit),
            _ => Err(AppError::validation(format!("Invalid block source: {}", s))),
        }
    }
}

impl fmt::Display for BlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a scheduling run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    TaskChange,
    HabitChange,
    HoursChange,
    CalendarChange,
    Cron,
}

impl TriggeredBy {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::TaskChange => "task_change",
            TriggeredBy::HabitChange => "habit_change",
            TriggeredBy::HoursChange => "hours_change",
            TriggeredBy::CalendarChange => "calendar_change",
            TriggeredBy::Cron => "cron",
        }
    }
}

impl FromStr for TriggeredBy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggeredBy::Manual),
            "task_change" => Ok(TriggeredBy::TaskChange),
            "habit_change" => Ok(TriggeredBy::HabitChange),
            "hours_change" => Ok(TriggeredBy::HoursChange),
            "calendar_change" => Ok(TriggeredBy::CalendarChange),
            "cron" => Ok(TriggeredBy::Cron),
            _ => Err(AppError::validation(format!("Invalid trigger: {}", s))),
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One weekly availability window. `day` is 0-6 with 0 = Sunday; minutes are
/// measured from local midnight. Windows crossing midnight are declared as two
/// explicit entries, one per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourWindow {
    pub day: u8,
    pub start_minute: u16,
    pub end_minute: u16,
}

/// Externally-occupied time (calendar events, manual blocks, pinned items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A previously committed placement, consumed for stability scoring only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingPlacement {
    pub source: BlockSource,
    pub source_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Min/max chunk bounds for a splittable task, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRange {
    pub min_chunk_minutes: i64,
    pub max_chunk_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub priority: Priority,
    #[serde(default)]
    pub blocker: bool,
    pub status: TaskStatus,
    pub estimated_minutes: i64,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub earliest_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub split: Option<SplitRange>,
    #[serde(default)]
    pub rest_minutes: Option<i64>,
    #[serde(default)]
    pub travel_minutes: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub hours_set_id: Option<String>,
    pub mode: SchedulingMode,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl TaskInput {
    /// Blocker treatment applies with either the dedicated flag or the tier.
    pub fn is_blocker(&self) -> bool {
        self.blocker || self.priority == Priority::Blocker
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitInput {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub priority: HabitPriority,
    pub recovery: RecoveryPolicy,
    /// Recurrence rule string, e.g. `FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE`.
    pub rule: String,
    #[serde(default)]
    pub starts_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_on: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    #[serde(default)]
    pub min_duration_minutes: Option<i64>,
    #[serde(default)]
    pub max_duration_minutes: Option<i64>,
    pub repeats_per_period: u32,
    /// Preferred time of day, minutes from local midnight.
    #[serde(default)]
    pub ideal_minute_of_day: Option<u16>,
    /// Preferred weekdays, 0-6 with 0 = Sunday.
    #[serde(default)]
    pub preferred_days: Option<Vec<u8>>,
    #[serde(default)]
    pub hours_set_id: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Immutable snapshot of everything one solver invocation needs. Assembled and
/// validated by the data-access layer; the solver performs no I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingInput {
    pub user_id: String,
    pub timezone: Tz,
    pub horizon_weeks: u32,
    pub downtime_minutes: i64,
    pub default_mode: SchedulingMode,
    pub tasks: Vec<TaskInput>,
    pub habits: Vec<HabitInput>,
    #[serde(default)]
    pub busy: Vec<BusyInterval>,
    #[serde(default)]
    pub hour_sets: HashMap<String, Vec<HourWindow>>,
    #[serde(default)]
    pub default_hours_set_id: Option<String>,
    #[serde(default)]
    pub existing_placements: Vec<ExistingPlacement>,
    pub now: DateTime<Utc>,
}

impl SchedulingInput {
    /// Boundary validation: runs once before the snapshot reaches the solver.
    pub fn validate(&self) -> AppResult<()> {
        for task in &self.tasks {
            if task.estimated_minutes <= 0 {
                return Err(AppError::validation_with_details(
                    "Task estimated minutes must be positive",
                    json!({"taskId": task.id, "estimatedMinutes": task.estimated_minutes}),
                ));
            }
            if let Some(split) = &task.split {
                if split.min_chunk_minutes <= 0 || split.max_chunk_minutes <= 0 {
                    return Err(AppError::validation_with_details(
                        "Chunk bounds must be positive",
                        json!({"taskId": task.id}),
                    ));
                }
            }
        }
        for habit in &self.habits {
            if habit.duration_minutes <= 0 {
                return Err(AppError::validation_with_details(
                    "Habit duration must be positive",
                    json!({"habitId": habit.id, "durationMinutes": habit.duration_minutes}),
                ));
            }
            if habit.repeats_per_period == 0 {
                return Err(AppError::validation_with_details(
                    "Habit repeats per period must be at least 1",
                    json!({"habitId": habit.id}),
                ));
            }
        }
        for (set_id, windows) in &self.hour_sets {
            for window in windows {
                if window.day > 6 || window.end_minute <= window.start_minute {
                    return Err(AppError::validation_with_details(
                        "Invalid hour window",
                        json!({"hoursSetId": set_id, "window": window}),
                    ));
                }
            }
        }
        for interval in &self.busy {
            if interval.end <= interval.start {
                return Err(AppError::validation("Busy interval end must be after start"));
            }
        }
        Ok(())
    }

    /// Resolve the weekly windows for an optional hours-set override:
    /// override id, else the default set, else always-open.
    pub fn resolve_hours(&self, override_id: Option<&str>) -> Vec<HourWindow> {
        let resolved = override_id
            .and_then(|id| self.hour_sets.get(id))
            .or_else(|| {
                self.default_hours_set_id
                    .as_deref()
                    .and_then(|id| self.hour_sets.get(id))
            });

        match resolved {
            Some(windows) => windows.clone(),
            None => always_open_windows(),
        }
    }
}

/// Fallback availability: every day, the full 24 hours.
pub fn always_open_windows() -> Vec<HourWindow> {
    (0..7)
        .map(|day| HourWindow {
            day,
            start_minute: 0,
            end_minute: 1440,
        })
        .collect()
}
