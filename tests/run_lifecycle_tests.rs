use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cadence_core::db::repositories::placement_repository::PlacementRepository;
use cadence_core::db::repositories::run_repository::RunRepository;
use cadence_core::db::DbPool;
use cadence_core::error::AppResult;
use cadence_core::models::block::ReasonCode;
use cadence_core::models::input::{
    HourWindow, Priority, SchedulingInput, SchedulingMode, TaskInput, TaskStatus, TriggeredBy,
};
use cadence_core::models::run::RunStatus;
use cadence_core::models::settings::SchedulerSettings;
use cadence_core::services::run_service::{RunService, SnapshotProvider};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::tempdir;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn task(id: &str, minutes: i64) -> TaskInput {
    TaskInput {
        id: id.into(),
        created_at: utc(2025, 3, 1, 0, 0),
        title: format!("Task {}", id),
        priority: Priority::Medium,
        blocker: false,
        status: TaskStatus::Queued,
        estimated_minutes: minutes,
        deadline: None,
        earliest_start: None,
        split: None,
        rest_minutes: None,
        travel_minutes: None,
        location: None,
        hours_set_id: None,
        mode: SchedulingMode::Fastest,
        calendar_id: None,
        color: None,
    }
}

fn input_with_tasks(tasks: Vec<TaskInput>) -> SchedulingInput {
    SchedulingInput {
        user_id: "user-1".into(),
        timezone: chrono_tz::UTC,
        horizon_weeks: 4,
        downtime_minutes: 0,
        default_mode: SchedulingMode::Fastest,
        tasks,
        habits: Vec::new(),
        busy: Vec::new(),
        hour_sets: HashMap::new(),
        default_hours_set_id: None,
        existing_placements: Vec::new(),
        now: utc(2025, 3, 3, 9, 0),
    }
}

/// Mutable snapshot source so tests can change the world between runs.
#[derive(Clone)]
struct SharedProvider {
    input: Arc<Mutex<SchedulingInput>>,
}

impl SharedProvider {
    fn new(input: SchedulingInput) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
        }
    }

    fn set(&self, input: SchedulingInput) {
        *self.input.lock().unwrap() = input;
    }
}

impl SnapshotProvider for SharedProvider {
    fn snapshot(&self, _user_id: &str) -> AppResult<SchedulingInput> {
        Ok(self.input.lock().unwrap().clone())
    }
}

fn foreground_service(
    provider: SharedProvider,
) -> (RunService, tempfile::TempDir) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("lifecycle.sqlite")).expect("pool");
    let settings = SchedulerSettings {
        background_dispatch: false,
        ..SchedulerSettings::default()
    };
    (RunService::new(pool, Arc::new(provider), settings), dir)
}

#[test]
fn debounce_coalesces_repeat_triggers_into_the_running_run() {
    let provider = SharedProvider::new(input_with_tasks(vec![task("a", 60)]));
    let (service, _dir) = foreground_service(provider);

    let run = service
        .enqueue_run("user-1", TriggeredBy::TaskChange, false)
        .unwrap();
    let conn = service.pool().get_connection().unwrap();
    assert!(RunRepository::mark_running_if_pending(&conn, &run.id).unwrap());

    // Same user, same trigger category, within the debounce window of the
    // running run's own start: same run id back.
    let coalesced = service
        .enqueue_run("user-1", TriggeredBy::TaskChange, false)
        .unwrap();
    assert_eq!(coalesced.id, run.id);
}

#[test]
fn reapplying_an_unchanged_world_writes_nothing() {
    let provider = SharedProvider::new(input_with_tasks(vec![
        task("a", 60),
        task("b", 90),
    ]));
    let (service, _dir) = foreground_service(provider);

    let first = service
        .enqueue_run("user-1", TriggeredBy::Manual, false)
        .unwrap();
    let first_execution = service.execute_run(&first.id).unwrap();
    assert_eq!(first_execution.run.status, RunStatus::Completed);
    let first_apply = first_execution.apply.unwrap();
    assert_eq!(first_apply.inserted, 2);
    assert_eq!(first_apply.deleted, 0);

    // A fresh run over the identical snapshot finds nothing to change.
    let second = service
        .enqueue_run("user-1", TriggeredBy::Cron, false)
        .unwrap();
    let second_execution = service.execute_run(&second.id).unwrap();
    assert_eq!(second_execution.run.status, RunStatus::Completed);
    let second_apply = second_execution.apply.unwrap();
    assert_eq!(second_apply.inserted, 0);
    assert_eq!(second_apply.updated, 0);
    assert_eq!(second_apply.deleted, 0);
    assert!(second_apply.unchanged > 0);
}

#[test]
fn superseded_run_never_touches_placements() {
    let provider = SharedProvider::new(input_with_tasks(vec![task("a", 60)]));
    let (service, _dir) = foreground_service(provider);

    let old = service
        .enqueue_run("user-1", TriggeredBy::TaskChange, false)
        .unwrap();
    let newer = service
        .enqueue_run("user-1", TriggeredBy::TaskChange, true)
        .unwrap();
    assert_ne!(old.id, newer.id);

    let stale = service.execute_run(&old.id).unwrap();
    assert_eq!(stale.run.status, RunStatus::Failed);
    assert_eq!(stale.run.reason, Some(ReasonCode::SupersededByNewerRun));
    assert!(stale.apply.is_none());

    let conn = service.pool().get_connection().unwrap();
    assert!(PlacementRepository::list_for_user(&conn, "user-1")
        .unwrap()
        .is_empty());

    let fresh = service.execute_run(&newer.id).unwrap();
    assert_eq!(fresh.run.status, RunStatus::Completed);
    assert!(!PlacementRepository::list_for_user(&conn, "user-1")
        .unwrap()
        .is_empty());
}

#[test]
fn infeasible_run_fails_and_leaves_the_previous_schedule_intact() {
    let provider = SharedProvider::new(input_with_tasks(vec![task("a", 60)]));
    let (service, _dir) = foreground_service(provider.clone());

    let good = service
        .enqueue_run("user-1", TriggeredBy::Manual, false)
        .unwrap();
    service.execute_run(&good.id).unwrap();
    let conn = service.pool().get_connection().unwrap();
    let before = PlacementRepository::list_for_user(&conn, "user-1").unwrap();
    assert_eq!(before.len(), 1);

    // The world shrinks to a single weekly hour; a ten-hour task cannot fit.
    let mut impossible = input_with_tasks(vec![task("monster", 600)]);
    impossible.hour_sets.insert(
        "narrow".into(),
        vec![HourWindow {
            day: 1,
            start_minute: 540,
            end_minute: 600,
        }],
    );
    impossible.default_hours_set_id = Some("narrow".into());
    provider.set(impossible);

    let bad = service
        .enqueue_run("user-1", TriggeredBy::TaskChange, false)
        .unwrap();
    let execution = service.execute_run(&bad.id).unwrap();
    assert_eq!(execution.run.status, RunStatus::Failed);
    assert_eq!(execution.run.reason, Some(ReasonCode::InfeasibleHard));
    assert!(execution.apply.is_none());

    // Prior placements survive untouched.
    let after = PlacementRepository::list_for_user(&conn, "user-1").unwrap();
    assert_eq!(before, after);
}

#[test]
fn task_edits_update_placements_in_place() {
    let provider = SharedProvider::new(input_with_tasks(vec![task("a", 60)]));
    let (service, _dir) = foreground_service(provider.clone());

    let first = service
        .enqueue_run("user-1", TriggeredBy::Manual, false)
        .unwrap();
    service.execute_run(&first.id).unwrap();

    // The task grows; its single block stretches rather than being replaced.
    let mut grown = input_with_tasks(vec![task("a", 120)]);
    grown.now = utc(2025, 3, 3, 9, 0);
    provider.set(grown);

    let second = service
        .enqueue_run("user-1", TriggeredBy::TaskChange, false)
        .unwrap();
    let execution = service.execute_run(&second.id).unwrap();
    let apply = execution.apply.unwrap();
    assert_eq!(apply.updated, 1);
    assert_eq!(apply.inserted, 0);
    assert_eq!(apply.deleted, 0);

    let conn = service.pool().get_connection().unwrap();
    let rows = PlacementRepository::list_for_user(&conn, "user-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].end_at, utc(2025, 3, 3, 11, 0).to_rfc3339());

    let window = apply
        .task_windows
        .iter()
        .find(|w| w.task_id == "a")
        .unwrap();
    assert_eq!(window.scheduled_start, Some(utc(2025, 3, 3, 9, 0)));
    assert_eq!(window.scheduled_end, Some(utc(2025, 3, 3, 11, 0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn background_dispatch_completes_the_run() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("dispatch.sqlite")).expect("pool");
    let provider = SharedProvider::new(input_with_tasks(vec![task("a", 60)]));
    let service = RunService::new(pool, Arc::new(provider), SchedulerSettings::default());

    let run = service
        .enqueue_run("user-1", TriggeredBy::Manual, false)
        .unwrap();

    // The worker runs on the blocking pool; poll until it lands.
    let mut status = RunStatus::Pending;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let conn = service.pool().get_connection().unwrap();
        status = RunRepository::get_by_id(&conn, &run.id).unwrap().status;
        if status.is_terminal() {
            break;
        }
    }
    assert_eq!(status, RunStatus::Completed);

    let conn = service.pool().get_connection().unwrap();
    let placements = PlacementRepository::list_for_user(&conn, "user-1").unwrap();
    assert_eq!(placements.len(), 1);
}
