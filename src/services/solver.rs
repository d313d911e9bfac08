use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::block::{
    DroppedHabitDiagnostic, HabitShortfallDiagnostic, LateTaskDiagnostic, LatenessReason,
    ReasonCode, ScheduledBlock, SolverResult,
};
use crate::models::input::{BlockSource, HabitInput, RecoveryPolicy, SchedulingInput, TaskInput};
use crate::models::settings::SchedulerSettings;
use crate::services::candidates::{
    chunk_plan_for_task, habit_occurrence_candidates, minutes_to_slots,
};
use crate::services::objective;
use crate::services::placement::{find_start_slot, fits_at};
use crate::services::recurrence::{build_habit_periods, RecurrenceRule};
use crate::services::slot_grid::{SlotGrid, SLOT_MINUTES};

/// Everything the passes need about one task, resolved once.
struct TaskContext<'a> {
    task: &'a TaskInput,
    chunks: Vec<usize>,
    required_slots: usize,
    allowed: Vec<bool>,
    earliest_slot: usize,
    /// Exclusive end bound derived from the deadline, clamped to the horizon.
    deadline_slot: Option<usize>,
    buffer_slots: usize,
    travel_slots: usize,
}

#[derive(Debug, Clone, Copy)]
struct PlacedChunk {
    start: usize,
    duration: usize,
}

struct TaskPassOutcome {
    placements: HashMap<String, Vec<PlacedChunk>>,
    occupancy: Vec<bool>,
    fully_placed: bool,
}

/// Compute a complete placement for one user from an immutable snapshot.
/// Pure and synchronous: no I/O, no clocks, no randomness.
pub fn solve(input: &SchedulingInput, settings: &SchedulerSettings) -> AppResult<SolverResult> {
    input.validate()?;

    let grid = SlotGrid::new(
        input.now,
        input.horizon_weeks,
        settings.min_horizon_weeks,
        settings.max_horizon_weeks,
        input.timezone,
    );
    let busy_mask = grid.build_busy_mask(&input.busy);
    let global_buffer_slots = buffer_slots_for(input.downtime_minutes);

    // Chunk plans first: an unsatisfiable split fails the whole run before any
    // placement work happens.
    let mut contexts = Vec::with_capacity(input.tasks.len());
    for task in &input.tasks {
        let chunks = match chunk_plan_for_task(task) {
            Some(chunks) => chunks,
            None => {
                debug!(target: "app::solver", task_id = %task.id, "split constraints unsatisfiable");
                return Ok(infeasible_result(&grid, ReasonCode::UnsatisfiableChunks));
            }
        };
        contexts.push(build_task_context(task, chunks, input, &grid));
    }
    sort_task_contexts(&mut contexts);

    // Pass 1: deadlines enforced. Only the feasibility flag survives.
    let on_time = run_task_pass(&contexts, &busy_mask, &grid, true);
    let feasible_on_time = on_time.fully_placed;

    // Pass 2: deadlines ignored for feasibility; its placements are the plan.
    let unconstrained = run_task_pass(&contexts, &busy_mask, &grid, false);
    if !unconstrained.fully_placed {
        debug!(target: "app::solver", user_id = %input.user_id, "no feasible placement in horizon");
        return Ok(infeasible_result(&grid, ReasonCode::InfeasibleHard));
    }

    let mut occupancy = unconstrained.occupancy;
    let mut blocks = Vec::new();
    let mut score = 0.0;

    let existing = group_existing_placements(input, &grid);

    // Task blocks, lateness diagnostics, and task objective terms.
    let mut late_tasks = Vec::new();
    for ctx in &contexts {
        let placed = &unconstrained.placements[&ctx.task.id];
        let prior = existing.get(&(BlockSource::Task, ctx.task.id.clone()));
        for (index, chunk) in placed.iter().enumerate() {
            blocks.push(block_for_task(ctx.task, &grid, chunk));
            if let Some(prior_slots) = prior {
                if let Some(&old_slot) = prior_slots.get(index) {
                    let distance = (chunk.start as i64 - old_slot).unsigned_abs() as usize;
                    score += objective::move_penalty(
                        ctx.task.priority.weight(),
                        ctx.task.mode,
                        distance,
                    );
                }
            }
            score +=
                objective::mode_placement_bias(ctx.task.mode, chunk.start, grid.slot_count());
        }

        if ctx.task.is_blocker() {
            if let Some(first) = placed.first() {
                score += objective::blocker_start_penalty(ctx.task.priority, first.start);
            }
        }

        if let Some(deadline) = ctx.task.deadline {
            let end_slot = placed
                .iter()
                .map(|c| c.start + c.duration)
                .max()
                .unwrap_or(0);
            let deadline_slot = grid.slot_for_timestamp(deadline);
            let late_slots = end_slot as i64 - deadline_slot;
            if late_slots > 0 {
                let late_slots = late_slots as usize;
                score += objective::task_lateness_penalty(
                    ctx.task.priority,
                    ctx.task.is_blocker(),
                    late_slots,
                );
                late_tasks.push(late_task_diagnostic(
                    ctx,
                    &busy_mask,
                    &grid,
                    deadline,
                    end_slot,
                    late_slots,
                ));
            }
        }
    }

    // Habits go onto the unconstrained occupancy.
    let mut habit_order: Vec<&HabitInput> = input.habits.iter().filter(|h| h.active).collect();
    habit_order.sort_by(|a, b| {
        let a_recover = a.recovery != RecoveryPolicy::Recover;
        let b_recover = b.recovery != RecoveryPolicy::Recover;
        a_recover
            .cmp(&b_recover)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let mut habit_shortfalls = Vec::new();
    let mut dropped_habits = Vec::new();
    for habit in habit_order {
        match schedule_habit(
            habit,
            input,
            &grid,
            &mut occupancy,
            global_buffer_slots,
            &existing,
            &mut blocks,
            &mut habit_shortfalls,
        ) {
            Ok(habit_score) => score += habit_score,
            Err(AppError::UnsupportedRecurrence { .. }) => {
                dropped_habits.push(DroppedHabitDiagnostic {
                    habit_id: habit.id.clone(),
                    title: habit.title.clone(),
                    reason: "unsupported_rrule".to_string(),
                });
            }
            Err(other) => return Err(other),
        }
    }

    let reason = if late_tasks.is_empty() {
        None
    } else {
        Some(ReasonCode::TasksLate)
    };

    Ok(SolverResult {
        horizon_start: grid.start(),
        horizon_end: grid.end(),
        feasible_on_time,
        feasible_hard: true,
        objective_score: score,
        blocks,
        late_tasks,
        habit_shortfalls,
        dropped_habits,
        reason,
    })
}

fn buffer_slots_for(minutes: i64) -> usize {
    if minutes <= 0 {
        0
    } else {
        minutes_to_slots(minutes)
    }
}

fn infeasible_result(grid: &SlotGrid, reason: ReasonCode) -> SolverResult {
    SolverResult {
        horizon_start: grid.start(),
        horizon_end: grid.end(),
        feasible_on_time: false,
        feasible_hard: false,
        objective_score: f64::INFINITY,
        blocks: Vec::new(),
        late_tasks: Vec::new(),
        habit_shortfalls: Vec::new(),
        dropped_habits: Vec::new(),
        reason: Some(reason),
    }
}

fn build_task_context<'a>(
    task: &'a TaskInput,
    chunks: Vec<usize>,
    input: &SchedulingInput,
    grid: &SlotGrid,
) -> TaskContext<'a> {
    let windows = input.resolve_hours(task.hours_set_id.as_deref());
    let allowed = grid.build_allowed_mask(&windows);
    let earliest_slot = task
        .earliest_start
        .map(|ts| grid.slot_for_timestamp(crate::services::slot_grid::ceil_to_slot(ts)).max(0) as usize)
        .unwrap_or(0);
    let deadline_slot = task
        .deadline
        .map(|ts| grid.slot_for_timestamp(ts).clamp(0, grid.slot_count() as i64) as usize);
    let required_slots = chunks.iter().sum();
    let buffer_slots = buffer_slots_for(task.rest_minutes.unwrap_or(input.downtime_minutes));
    let travel_slots = match (&task.location, task.travel_minutes) {
        (Some(_), Some(minutes)) if minutes > 0 => minutes_to_slots(minutes),
        _ => 0,
    };
    TaskContext {
        task,
        chunks,
        required_slots,
        allowed,
        earliest_slot,
        deadline_slot,
        buffer_slots,
        travel_slots,
    }
}

/// Blocker-first, then earliest-deadline-first (undated last), then priority
/// weight descending, then creation time ascending.
fn sort_task_contexts(contexts: &mut [TaskContext<'_>]) {
    contexts.sort_by(|a, b| {
        let a_task = a.task;
        let b_task = b.task;
        (!a_task.is_blocker())
            .cmp(&!b_task.is_blocker())
            .then_with(|| match (a_task.deadline, b_task.deadline) {
                (Some(a_dl), Some(b_dl)) => a_dl.cmp(&b_dl),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| b_task.priority.cmp(&a_task.priority))
            .then_with(|| a_task.created_at.cmp(&b_task.created_at))
    });
}

/// One full pass over the sorted tasks against a private occupancy buffer
/// seeded from the busy mask. The buffer is owned here for the pass's duration
/// and never shared across passes.
fn run_task_pass(
    contexts: &[TaskContext<'_>],
    busy_mask: &[bool],
    grid: &SlotGrid,
    enforce_deadlines: bool,
) -> TaskPassOutcome {
    let mut occupancy = busy_mask.to_vec();
    let mut placements: HashMap<String, Vec<PlacedChunk>> = HashMap::new();
    let mut fully_placed = true;

    for ctx in contexts {
        let mut placed = Vec::with_capacity(ctx.chunks.len());
        let mut failed = false;

        for &duration in &ctx.chunks {
            let latest_end = if enforce_deadlines {
                ctx.deadline_slot
            } else {
                None
            };
            let balanced_target = balanced_target_slot(ctx, duration, grid);
            let score = move |slot: usize| (slot as i64 - balanced_target).abs();
            let start = find_start_slot(
                &ctx.allowed,
                &occupancy,
                duration,
                ctx.earliest_slot,
                latest_end,
                ctx.task.mode,
                ctx.buffer_slots,
                Some(&score),
            );
            match start {
                Some(start) => {
                    occupy(&mut occupancy, start, duration);
                    occupy_travel(&mut occupancy, start, duration, ctx.travel_slots);
                    placed.push(PlacedChunk { start, duration });
                }
                None => {
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            // Roll the task's partial chunks back out; a task is never
            // partially placed.
            for chunk in &placed {
                release(&mut occupancy, chunk.start, chunk.duration);
            }
            fully_placed = false;
            placements.insert(ctx.task.id.clone(), Vec::new());
        } else {
            placements.insert(ctx.task.id.clone(), placed);
        }
    }

    TaskPassOutcome {
        placements,
        occupancy,
        fully_placed,
    }
}

/// Balanced mode biases toward the latest feasible start when a deadline
/// exists ("just before the deadline"), toward the earliest bound otherwise.
fn balanced_target_slot(ctx: &TaskContext<'_>, duration: usize, grid: &SlotGrid) -> i64 {
    match ctx.deadline_slot {
        Some(deadline_slot) if deadline_slot >= duration => {
            ((grid.slot_count() - duration).min(deadline_slot - duration)) as i64
        }
        _ => ctx.earliest_slot as i64,
    }
}

fn occupy(occupancy: &mut [bool], start: usize, duration: usize) {
    for slot in start..(start + duration).min(occupancy.len()) {
        occupancy[slot] = true;
    }
}

fn release(occupancy: &mut [bool], start: usize, duration: usize) {
    for slot in start..(start + duration).min(occupancy.len()) {
        occupancy[slot] = false;
    }
}

/// Travel padding occupies the adjacent slots on both sides without emitting
/// blocks of its own.
fn occupy_travel(occupancy: &mut [bool], start: usize, duration: usize, travel_slots: usize) {
    if travel_slots == 0 {
        return;
    }
    let before = start.saturating_sub(travel_slots);
    for slot in before..start {
        occupancy[slot] = true;
    }
    let after_end = (start + duration + travel_slots).min(occupancy.len());
    for slot in start + duration..after_end {
        occupancy[slot] = true;
    }
}

fn block_for_task(task: &TaskInput, grid: &SlotGrid, chunk: &PlacedChunk) -> ScheduledBlock {
    ScheduledBlock {
        source: BlockSource::Task,
        source_id: task.id.clone(),
        title: task.title.clone(),
        start: grid.timestamp_for_slot(chunk.start),
        end: grid.timestamp_for_slot(chunk.start + chunk.duration),
        priority: task.priority.to_string(),
        calendar_id: task.calendar_id.clone(),
        color: task.color.clone(),
        location: task.location.clone(),
    }
}

fn late_task_diagnostic(
    ctx: &TaskContext<'_>,
    busy_mask: &[bool],
    grid: &SlotGrid,
    deadline: DateTime<Utc>,
    end_slot: usize,
    late_slots: usize,
) -> LateTaskDiagnostic {
    let deadline_slot = grid
        .slot_for_timestamp(deadline)
        .clamp(0, grid.slot_count() as i64) as usize;
    let capacity = (ctx.earliest_slot..deadline_slot)
        .filter(|&slot| ctx.allowed[slot] && !busy_mask[slot])
        .count();
    let reason = if capacity < ctx.required_slots {
        LatenessReason::InsufficientCapacity {
            missing_slots: ctx.required_slots - capacity,
        }
    } else {
        LatenessReason::PlacementConflictsOrChunkConstraints
    };
    LateTaskDiagnostic {
        task_id: ctx.task.id.clone(),
        title: ctx.task.title.clone(),
        deadline,
        finishes_at: grid.timestamp_for_slot(end_slot),
        late_slots,
        reason,
    }
}

fn group_existing_placements(
    input: &SchedulingInput,
    grid: &SlotGrid,
) -> HashMap<(BlockSource, String), Vec<i64>> {
    let mut groups: HashMap<(BlockSource, String), Vec<(DateTime<Utc>, i64)>> = HashMap::new();
    for placement in &input.existing_placements {
        groups
            .entry((placement.source, placement.source_id.clone()))
            .or_default()
            .push((placement.start, grid.slot_for_timestamp(placement.start)));
    }
    groups
        .into_iter()
        .map(|(key, mut entries)| {
            entries.sort_by_key(|(start, _)| *start);
            (key, entries.into_iter().map(|(_, slot)| slot).collect())
        })
        .collect()
}

/// Place every occurrence of one habit; returns the habit's objective
/// contribution. An unsupported rule propagates as a typed error for the
/// caller to downgrade into a drop diagnostic.
#[allow(clippy::too_many_arguments)]
fn schedule_habit(
    habit: &HabitInput,
    input: &SchedulingInput,
    grid: &SlotGrid,
    occupancy: &mut Vec<bool>,
    global_buffer_slots: usize,
    existing: &HashMap<(BlockSource, String), Vec<i64>>,
    blocks: &mut Vec<ScheduledBlock>,
    shortfalls: &mut Vec<HabitShortfallDiagnostic>,
) -> AppResult<f64> {
    let rule: RecurrenceRule = habit.rule.parse()?;
    let periods = build_habit_periods(
        grid.start(),
        grid.end(),
        habit.starts_on,
        habit.ends_on,
        &rule,
        habit.repeats_per_period,
    )?;

    let windows = input.resolve_hours(habit.hours_set_id.as_deref());
    let allowed = grid.build_allowed_mask(&windows);

    let full_slots = minutes_to_slots(
        habit
            .max_duration_minutes
            .unwrap_or(habit.duration_minutes),
    );
    let min_slots = habit
        .min_duration_minutes
        .map(minutes_to_slots)
        .filter(|&m| m < full_slots);

    let prior = existing.get(&(BlockSource::Habit, habit.id.clone()));
    let mut occurrence_index = 0usize;
    let mut score = 0.0;

    for period in &periods {
        let mut placed_count = 0u32;
        for index in 0..period.target_count {
            let candidates = habit_occurrence_candidates(grid, habit, period, index);
            let mut committed: Option<(usize, usize)> = None;
            for candidate in &candidates {
                if fits_at(&allowed, occupancy, candidate.slot, full_slots, global_buffer_slots) {
                    committed = Some((candidate.slot, full_slots));
                    break;
                }
                if let Some(min_slots) = min_slots {
                    if fits_at(&allowed, occupancy, candidate.slot, min_slots, global_buffer_slots)
                    {
                        committed = Some((candidate.slot, min_slots));
                        break;
                    }
                }
            }

            match committed {
                Some((slot, duration)) => {
                    occupy(occupancy, slot, duration);
                    blocks.push(block_for_habit(habit, grid, slot, duration));
                    placed_count += 1;

                    score += objective::habit_keep_reward(habit.priority, habit.recovery, duration);
                    let parts = grid.zoned_parts(grid.timestamp_for_slot(slot));
                    if let Some(ideal) = habit.ideal_minute_of_day {
                        let distance =
                            ((parts.minute_of_day as i64 - ideal as i64).abs() / SLOT_MINUTES) as usize;
                        score += objective::ideal_time_penalty(habit.priority, distance);
                    }
                    if let Some(days) = habit.preferred_days.as_ref().filter(|d| !d.is_empty()) {
                        score += objective::preferred_day_penalty(
                            habit.priority,
                            days.contains(&parts.weekday),
                        );
                    }
                    if let Some(prior_slots) = prior {
                        if let Some(&old_slot) = prior_slots.get(occurrence_index) {
                            let distance = (slot as i64 - old_slot).unsigned_abs() as usize;
                            score += objective::move_penalty(
                                habit.priority.weight(),
                                input.default_mode,
                                distance,
                            );
                        }
                    }
                    occurrence_index += 1;
                }
                None => {
                    debug!(
                        target: "app::solver",
                        habit_id = %habit.id,
                        period_start = %period.start,
                        "habit occurrence could not be placed"
                    );
                }
            }
        }

        if placed_count < period.target_count {
            let missed = period.target_count - placed_count;
            score += objective::habit_shortfall_penalty(habit.priority, habit.recovery, missed);
            shortfalls.push(HabitShortfallDiagnostic {
                habit_id: habit.id.clone(),
                title: habit.title.clone(),
                period_start: period.start,
                period_end: period.end,
                target_count: period.target_count,
                placed_count,
            });
        }
    }

    Ok(score)
}

fn block_for_habit(
    habit: &HabitInput,
    grid: &SlotGrid,
    slot: usize,
    duration: usize,
) -> ScheduledBlock {
    ScheduledBlock {
        source: BlockSource::Habit,
        source_id: habit.id.clone(),
        title: habit.title.clone(),
        start: grid.timestamp_for_slot(slot),
        end: grid.timestamp_for_slot(slot + duration),
        priority: habit.priority.to_string(),
        calendar_id: habit.calendar_id.clone(),
        color: habit.color.clone(),
        location: None,
    }
}
