use std::sync::Arc;

use chrono::{Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::db::repositories::run_repository::RunRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::block::{ReasonCode, SolverResult};
use crate::models::input::{SchedulingInput, TriggeredBy};
use crate::models::run::{RunStatus, RunSummary, SchedulingRun};
use crate::models::settings::SchedulerSettings;
use crate::services::plan_apply::{apply_plan, ApplyOutcome};
use crate::services::solver;

/// Boundary to the data-access layer: assembles the immutable solver snapshot
/// from persisted tasks, habits, calendar events, and hours-set configuration.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self, user_id: &str) -> AppResult<SchedulingInput>;
}

/// What one `execute_run` call produced. `result` and `apply` are present only
/// when this call actually computed and applied a plan.
#[derive(Debug, Clone)]
pub struct RunExecution {
    pub run: SchedulingRun,
    pub result: Option<SolverResult>,
    pub apply: Option<ApplyOutcome>,
}

/// Debounced, supersession-aware run execution around the solver. All writes
/// to runs and placements flow through here; enqueue is fire-and-forget for
/// callers.
#[derive(Clone)]
pub struct RunService {
    db: DbPool,
    provider: Arc<dyn SnapshotProvider>,
    settings: SchedulerSettings,
}

impl RunService {
    pub fn new(db: DbPool, provider: Arc<dyn SnapshotProvider>, settings: SchedulerSettings) -> Self {
        Self {
            db,
            provider,
            settings,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Request a scheduling run for a user. Coalesces into an existing pending
    /// run, or into a running run of the same trigger category started within
    /// the debounce window, unless `force` is set. Otherwise creates a pending
    /// run and (when background dispatch is on) signals a worker.
    pub fn enqueue_run(
        &self,
        user_id: &str,
        triggered_by: TriggeredBy,
        force: bool,
    ) -> AppResult<SchedulingRun> {
        let conn = self.db.get_connection()?;
        let now = Utc::now();

        if !force {
            if let Some(pending) = RunRepository::find_pending_for_user(&conn, user_id)? {
                debug!(
                    target: "app::runs",
                    run_id = %pending.id,
                    trigger = %triggered_by,
                    "coalescing request into pending run"
                );
                return Ok(pending);
            }

            let debounce = Duration::seconds(self.settings.debounce_seconds);
            let active = RunRepository::list_active_for_user(&conn, user_id)?;
            if let Some(running) = active.into_iter().rev().find(|run| {
                run.status == RunStatus::Running
                    && run.triggered_by == triggered_by
                    && now.signed_duration_since(run.started_at) <= debounce
            }) {
                debug!(
                    target: "app::runs",
                    run_id = %running.id,
                    trigger = %triggered_by,
                    "coalescing request into running run within debounce window"
                );
                return Ok(running);
            }
        }

        let run = RunRepository::insert_pending(&conn, user_id, triggered_by, now)?;
        info!(
            target: "app::runs",
            run_id = %run.id,
            user_id = %user_id,
            trigger = %triggered_by,
            force,
            "scheduling run enqueued"
        );

        if self.settings.background_dispatch {
            self.dispatch(run.id.clone());
        }
        Ok(run)
    }

    fn dispatch(&self, run_id: String) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = self.clone();
                handle.spawn_blocking(move || {
                    if let Err(err) = service.execute_run(&run_id) {
                        error!(target: "app::runs", run_id = %run_id, error = %err, "run worker failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    target: "app::runs",
                    run_id = %run_id,
                    "no async runtime; run stays pending until executed explicitly"
                );
            }
        }
    }

    /// Execute one run to a terminal state. Idempotent: a run that is no
    /// longer pending is returned as-is with no side effects. Supersession is
    /// checked at start and again immediately before writing placements; a
    /// superseded run fails cleanly with zero writes.
    pub fn execute_run(&self, run_id: &str) -> AppResult<RunExecution> {
        let mut conn = self.db.get_connection()?;
        let run = RunRepository::get_by_id(&conn, run_id)?;

        if !RunRepository::mark_running_if_pending(&conn, run_id)? {
            debug!(target: "app::runs", run_id = %run_id, status = %run.status, "run not pending; no-op");
            return Ok(RunExecution {
                run,
                result: None,
                apply: None,
            });
        }

        if let Some(newer) = self.newer_active_run(&conn, &run)? {
            self.fail_superseded(&conn, &run, &newer)?;
            return Ok(RunExecution {
                run: RunRepository::get_by_id(&conn, run_id)?,
                result: None,
                apply: None,
            });
        }

        match self.compute_and_apply(&mut conn, &run) {
            Ok(execution) => Ok(execution),
            Err(err) => {
                warn!(target: "app::runs", run_id = %run_id, error = %err, "run failed");
                if let Err(mark_err) = RunRepository::mark_failed(
                    &conn,
                    run_id,
                    None,
                    Some(&err.to_string()),
                    Utc::now(),
                ) {
                    debug!(target: "app::runs", run_id = %run_id, error = %mark_err, "run already terminal");
                }
                Ok(RunExecution {
                    run: RunRepository::get_by_id(&conn, run_id)?,
                    result: None,
                    apply: None,
                })
            }
        }
    }

    fn compute_and_apply(
        &self,
        conn: &mut Connection,
        run: &SchedulingRun,
    ) -> AppResult<RunExecution> {
        let input = self.provider.snapshot(&run.user_id)?;
        let result = solver::solve(&input, &self.settings)?;

        if !result.feasible_hard {
            // Failed run, zero placement writes: the previous schedule stays
            // valid and visible.
            RunRepository::mark_failed(
                conn,
                &run.id,
                result.reason,
                Some("no feasible placement within the horizon"),
                Utc::now(),
            )?;
            return Ok(RunExecution {
                run: RunRepository::get_by_id(conn, &run.id)?,
                result: Some(result),
                apply: None,
            });
        }

        let tx = conn.transaction()?;
        if let Some(newer) = self.newer_active_run(&tx, run)? {
            drop(tx);
            self.fail_superseded(conn, run, &newer)?;
            return Ok(RunExecution {
                run: RunRepository::get_by_id(conn, &run.id)?,
                result: Some(result),
                apply: None,
            });
        }
        let apply = apply_plan(&tx, &run.user_id, &result, Utc::now())?;
        tx.commit()?;

        let summary = RunSummary {
            tasks_scheduled: result.tasks_scheduled(),
            habit_occurrences_scheduled: result.habit_occurrences_scheduled(),
            feasible_on_time: result.feasible_on_time,
            feasible_hard: result.feasible_hard,
            objective_score: result.objective_score,
            late_task_count: result.late_tasks.len(),
            habit_shortfall_count: result.habit_shortfalls.len(),
            dropped_habit_count: result.dropped_habits.len(),
            reason: result.reason,
        };
        RunRepository::mark_completed(conn, &run.id, &summary, Utc::now())?;
        info!(
            target: "app::runs",
            run_id = %run.id,
            user_id = %run.user_id,
            tasks = summary.tasks_scheduled,
            habit_occurrences = summary.habit_occurrences_scheduled,
            on_time = summary.feasible_on_time,
            "scheduling run completed"
        );

        Ok(RunExecution {
            run: RunRepository::get_by_id(conn, &run.id)?,
            result: Some(result),
            apply: Some(apply),
        })
    }

    /// The strictly-newest active run for the user, when it is not this one.
    fn newer_active_run(
        &self,
        conn: &Connection,
        run: &SchedulingRun,
    ) -> AppResult<Option<SchedulingRun>> {
        let active = RunRepository::list_active_for_user(conn, &run.user_id)?;
        Ok(active
            .into_iter()
            .filter(|other| other.id != run.id && other.order_key() > run.order_key())
            .max_by_key(|other| other.order_key()))
    }

    fn fail_superseded(
        &self,
        conn: &Connection,
        run: &SchedulingRun,
        newer: &SchedulingRun,
    ) -> AppResult<()> {
        let err = AppError::superseded(&run.id, &newer.id);
        RunRepository::mark_failed(
            conn,
            &run.id,
            Some(ReasonCode::SupersededByNewerRun),
            Some(&err.to_string()),
            Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::input::SchedulingMode;
    use chrono::{DateTime, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FixedProvider {
        input: Mutex<SchedulingInput>,
    }

    impl FixedProvider {
        fn new(input: SchedulingInput) -> Self {
            Self {
                input: Mutex::new(input),
            }
        }
    }

    impl SnapshotProvider for FixedProvider {
        fn snapshot(&self, _user_id: &str) -> AppResult<SchedulingInput> {
            Ok(self.input.lock().unwrap().clone())
        }
    }

    struct FailingProvider;

    impl SnapshotProvider for FailingProvider {
        fn snapshot(&self, _user_id: &str) -> AppResult<SchedulingInput> {
            Err(AppError::other("snapshot assembly failed"))
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn empty_input() -> SchedulingInput {
        SchedulingInput {
            user_id: "user-1".into(),
            timezone: chrono_tz::UTC,
            horizon_weeks: 4,
            downtime_minutes: 0,
            default_mode: SchedulingMode::Fastest,
            tasks: Vec::new(),
            habits: Vec::new(),
            busy: Vec::new(),
            hour_sets: HashMap::new(),
            default_hours_set_id: None,
            existing_placements: Vec::new(),
            now: utc(2025, 3, 3, 9, 0),
        }
    }

    fn foreground_settings() -> SchedulerSettings {
        SchedulerSettings {
            background_dispatch: false,
            ..SchedulerSettings::default()
        }
    }

    fn service_with(input: SchedulingInput) -> (RunService, tempfile::TempDir) {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("runs.sqlite")).expect("pool");
        let service = RunService::new(
            pool,
            Arc::new(FixedProvider::new(input)),
            foreground_settings(),
        );
        (service, dir)
    }

    #[test]
    fn pending_runs_coalesce_unless_forced() {
        let (service, _dir) = service_with(empty_input());
        let first = service
            .enqueue_run("user-1", TriggeredBy::TaskChange, false)
            .unwrap();
        let second = service
            .enqueue_run("user-1", TriggeredBy::CalendarChange, false)
            .unwrap();
        assert_eq!(first.id, second.id);

        let forced = service
            .enqueue_run("user-1", TriggeredBy::Manual, true)
            .unwrap();
        assert_ne!(forced.id, first.id);
    }

    #[test]
    fn running_runs_coalesce_same_trigger_within_debounce() {
        let (service, _dir) = service_with(empty_input());
        let run = service
            .enqueue_run("user-1", TriggeredBy::TaskChange, false)
            .unwrap();
        let conn = service.pool().get_connection().unwrap();
        assert!(RunRepository::mark_running_if_pending(&conn, &run.id).unwrap());

        // Same trigger category: coalesced.
        let again = service
            .enqueue_run("user-1", TriggeredBy::TaskChange, false)
            .unwrap();
        assert_eq!(again.id, run.id);

        // Different trigger category: a new run.
        let other = service
            .enqueue_run("user-1", TriggeredBy::CalendarChange, false)
            .unwrap();
        assert_ne!(other.id, run.id);
    }

    #[test]
    fn execute_is_idempotent_once_terminal() {
        let (service, _dir) = service_with(empty_input());
        let run = service
            .enqueue_run("user-1", TriggeredBy::Manual, false)
            .unwrap();
        let first = service.execute_run(&run.id).unwrap();
        assert_eq!(first.run.status, RunStatus::Completed);
        assert!(first.result.is_some());

        let second = service.execute_run(&run.id).unwrap();
        assert_eq!(second.run.status, RunStatus::Completed);
        assert!(second.result.is_none());
        assert!(second.apply.is_none());
    }

    #[test]
    fn stale_run_is_superseded_by_a_newer_one() {
        let (service, _dir) = service_with(empty_input());
        let old = service
            .enqueue_run("user-1", TriggeredBy::TaskChange, false)
            .unwrap();
        let newer = service
            .enqueue_run("user-1", TriggeredBy::TaskChange, true)
            .unwrap();

        let execution = service.execute_run(&old.id).unwrap();
        assert_eq!(execution.run.status, RunStatus::Failed);
        assert_eq!(
            execution.run.reason,
            Some(ReasonCode::SupersededByNewerRun)
        );
        assert!(execution.apply.is_none());

        let newer_execution = service.execute_run(&newer.id).unwrap();
        assert_eq!(newer_execution.run.status, RunStatus::Completed);
    }

    #[test]
    fn provider_failure_marks_the_run_failed() {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("runs.sqlite")).expect("pool");
        let service = RunService::new(pool, Arc::new(FailingProvider), foreground_settings());
        let run = service
            .enqueue_run("user-1", TriggeredBy::Cron, false)
            .unwrap();
        let execution = service.execute_run(&run.id).unwrap();
        assert_eq!(execution.run.status, RunStatus::Failed);
        assert!(execution
            .run
            .error
            .as_deref()
            .unwrap()
            .contains("snapshot assembly failed"));
        assert_eq!(execution.run.reason, None);
    }
}
