use serde::{Deserialize, Serialize};

/// Tunables for the run lifecycle. Solver behavior itself is driven entirely by
/// the `SchedulingInput` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Repeated same-category triggers within this window coalesce into the
    /// already-running run.
    pub debounce_seconds: i64,
    /// When false, enqueue never spawns a worker; callers execute runs
    /// explicitly (tests, embedded use).
    pub background_dispatch: bool,
    pub min_horizon_weeks: u32,
    pub max_horizon_weeks: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            debounce_seconds: 30,
            background_dispatch: true,
            min_horizon_weeks: 4,
            max_horizon_weeks: 12,
        }
    }
}
