//! Pure scoring terms for the solver. Lower totals are better; rewards are
//! negative. Nothing here mutates state - the solver sums these for the run
//! report and for diagnostics.

use crate::models::input::{HabitPriority, Priority, RecoveryPolicy, SchedulingMode};
use crate::services::slot_grid::SLOTS_PER_DAY;

const LATE_SLOT_PENALTY: f64 = 1.0;
const LATE_DAY_PENALTY_BASE: f64 = 24.0;
const BLOCKER_LATE_MULTIPLIER: f64 = 4.0;
const BLOCKER_START_PENALTY_PER_SLOT: f64 = 0.05;
const HABIT_KEEP_REWARD_PER_SLOT: f64 = 2.0;
const RECOVER_KEEP_MULTIPLIER: f64 = 3.0;
const SKIP_KEEP_MULTIPLIER: f64 = 1.0;
const HABIT_SHORTFALL_PENALTY: f64 = 400.0;
const IDEAL_DISTANCE_PENALTY_PER_SLOT: f64 = 0.5;
const NON_PREFERRED_DAY_PENALTY: f64 = 25.0;
const MOVE_PENALTY_PER_SLOT: f64 = 0.2;
const MODE_BIAS_PER_SLOT: f64 = 0.01;

/// Convex lateness penalty: a linear per-slot term plus an escalating per-day
/// term where each additional late day multiplies the per-day base by that
/// day's index. Scaled by priority weight and by an extra multiplier for hard
/// blockers.
pub fn task_lateness_penalty(priority: Priority, is_blocker: bool, late_slots: usize) -> f64 {
    if late_slots == 0 {
        return 0.0;
    }
    let mut penalty = LATE_SLOT_PENALTY * late_slots as f64;
    let full_days_late = late_slots / SLOTS_PER_DAY;
    for day in 1..=full_days_late {
        penalty += LATE_DAY_PENALTY_BASE * day as f64;
    }
    penalty *= priority.weight();
    if is_blocker {
        penalty *= BLOCKER_LATE_MULTIPLIER;
    }
    penalty
}

/// Blockers pay for every slot between the horizon start and their start,
/// late or not, so they drift as early as the mask allows.
pub fn blocker_start_penalty(priority: Priority, start_slot: usize) -> f64 {
    BLOCKER_START_PENALTY_PER_SLOT * start_slot as f64 * priority.weight()
}

/// Negative cost for a kept habit occurrence. Recover-policy habits are worth
/// more to keep than skip-policy habits.
pub fn habit_keep_reward(
    priority: HabitPriority,
    policy: RecoveryPolicy,
    duration_slots: usize,
) -> f64 {
    let policy_multiplier = match policy {
        RecoveryPolicy::Recover => RECOVER_KEEP_MULTIPLIER,
        RecoveryPolicy::Skip => SKIP_KEEP_MULTIPLIER,
    };
    -(HABIT_KEEP_REWARD_PER_SLOT * duration_slots as f64 * priority.weight() * policy_multiplier)
}

/// Large penalty per missed recover occurrence. Skip habits never accrue
/// shortfall; their missed occurrences just forfeit the keep reward.
pub fn habit_shortfall_penalty(
    priority: HabitPriority,
    policy: RecoveryPolicy,
    missed: u32,
) -> f64 {
    match policy {
        RecoveryPolicy::Recover => HABIT_SHORTFALL_PENALTY * missed as f64 * priority.weight(),
        RecoveryPolicy::Skip => 0.0,
    }
}

pub fn ideal_time_penalty(priority: HabitPriority, distance_slots: usize) -> f64 {
    IDEAL_DISTANCE_PENALTY_PER_SLOT * distance_slots as f64 * priority.weight()
}

pub fn preferred_day_penalty(priority: HabitPriority, on_preferred_day: bool) -> f64 {
    if on_preferred_day {
        0.0
    } else {
        NON_PREFERRED_DAY_PENALTY * priority.weight()
    }
}

fn mode_move_weight(mode: SchedulingMode) -> f64 {
    // Fastest schedules churn the most when they move; packed and balanced
    // tolerate more movement.
    match mode {
        SchedulingMode::Fastest => 1.0,
        SchedulingMode::Balanced => 0.6,
        SchedulingMode::Packed => 0.3,
    }
}

/// Stability term: moving a block away from its previously committed slot
/// costs per slot of distance, scaled by mode and priority weight.
pub fn move_penalty(priority_weight: f64, mode: SchedulingMode, distance_slots: usize) -> f64 {
    MOVE_PENALTY_PER_SLOT * distance_slots as f64 * mode_move_weight(mode) * priority_weight
}

/// Small placement bias: fastest favors early starts, packed favors late
/// starts, balanced is neutral (its bias lives in the placement-search score).
pub fn mode_placement_bias(mode: SchedulingMode, start_slot: usize, slot_count: usize) -> f64 {
    match mode {
        SchedulingMode::Fastest => MODE_BIAS_PER_SLOT * start_slot as f64,
        SchedulingMode::Packed => {
            MODE_BIAS_PER_SLOT * slot_count.saturating_sub(start_slot) as f64
        }
        SchedulingMode::Balanced => 0.0,
    }
}
