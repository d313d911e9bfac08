use chrono::Duration;

use crate::models::input::{HabitInput, TaskInput};
use crate::services::recurrence::HabitPeriod;
use crate::services::slot_grid::{SlotGrid, SLOT_MINUTES, SLOTS_PER_DAY};

/// Penalty added to a candidate landing outside the preferred-day set.
const NON_PREFERRED_DAY_SCORE: i64 = 1000;

pub fn minutes_to_slots(minutes: i64) -> usize {
    ((minutes + SLOT_MINUTES - 1) / SLOT_MINUTES).max(1) as usize
}

/// A remainder is representable when some combination of chunks within
/// [min, max] sums to exactly r.
fn representable(r: usize, min: usize, max: usize) -> bool {
    if r == 0 {
        return true;
    }
    let needed = (r + max - 1) / max; // ceil(r / max)
    let allowed = r / min; // floor(r / min)
    needed <= allowed
}

/// Greedy chunk sizing: take the largest permissible chunk each step and
/// require the remainder to stay representable. Returns `None` when the split
/// constraints cannot cover the total exactly; the task is then reported
/// hard-infeasible rather than partially planned.
pub fn split_into_chunk_sizes(total: usize, min: usize, max: usize) -> Option<Vec<usize>> {
    let max = max.max(min);
    let mut sizes = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let chunk = max.min(remaining);
        if chunk < min {
            return None;
        }
        let rest = remaining - chunk;
        if !representable(rest, min, max) {
            return None;
        }
        sizes.push(chunk);
        remaining = rest;
    }
    Some(sizes)
}

/// Slot-count chunks for one task: a single chunk when splitting is off,
/// otherwise the greedy plan over the derived slot bounds.
pub fn chunk_plan_for_task(task: &TaskInput) -> Option<Vec<usize>> {
    let total = minutes_to_slots(task.estimated_minutes);
    match &task.split {
        None => Some(vec![total]),
        Some(range) => {
            let min = minutes_to_slots(range.min_chunk_minutes);
            let max = minutes_to_slots(range.max_chunk_minutes).max(min);
            split_into_chunk_sizes(total, min, max)
        }
    }
}

/// One scored start slot for a habit occurrence. Lower scores are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceCandidate {
    pub slot: usize,
    pub score: i64,
}

/// Candidate start slots for occurrence `index` of a period, scanned over a
/// ±(drift + 1)-day window around the evenly-spaced expected timestamp and
/// scored by ideal-time distance, preferred-day membership, and distance from
/// the expected slot. Sorted best-first, stable on slot index.
pub fn habit_occurrence_candidates(
    grid: &SlotGrid,
    habit: &HabitInput,
    period: &HabitPeriod,
    index: u32,
) -> Vec<OccurrenceCandidate> {
    let expected_secs = (index as f64 * period.expected_spacing_days * 86_400.0) as i64;
    let expected_ts = period.start + Duration::seconds(expected_secs);
    let expected_slot = grid.slot_for_timestamp(expected_ts);

    let window_slots = (period.drift_days + 1) * SLOTS_PER_DAY as i64;
    let period_first = grid.slot_for_timestamp(period.start);
    let period_last = grid.slot_for_timestamp(period.end); // exclusive

    let first = (expected_slot - window_slots).max(period_first).max(0);
    let last = (expected_slot + window_slots + 1)
        .min(period_last)
        .min(grid.slot_count() as i64);

    let preferred = habit
        .preferred_days
        .as_ref()
        .filter(|days| !days.is_empty());

    let mut candidates = Vec::new();
    for slot in first..last {
        let parts = grid.zoned_parts(grid.timestamp_for_slot(slot as usize));
        let mut score = (slot - expected_slot).abs();
        if let Some(ideal) = habit.ideal_minute_of_day {
            score += ((parts.minute_of_day as i64) - ideal as i64).abs() / SLOT_MINUTES;
        }
        if let Some(days) = preferred {
            if !days.contains(&parts.weekday) {
                score += NON_PREFERRED_DAY_SCORE;
            }
        }
        candidates.push(OccurrenceCandidate {
            slot: slot as usize,
            score,
        });
    }

    candidates.sort_by_key(|c| (c.score, c.slot));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::input::{
        HabitPriority, Priority, RecoveryPolicy, SchedulingMode, SplitRange, TaskInput, TaskStatus,
    };
    use crate::services::recurrence::RecurrenceRule;
    use crate::services::slot_grid::SlotGrid;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn task(estimated_minutes: i64, split: Option<SplitRange>) -> TaskInput {
        TaskInput {
            id: "task-1".into(),
            created_at: utc(2025, 3, 1, 0, 0),
            title: "Write report".into(),
            priority: Priority::Medium,
            blocker: false,
            status: TaskStatus::Queued,
            estimated_minutes,
            deadline: None,
            earliest_start: None,
            split,
            rest_minutes: None,
            travel_minutes: None,
            location: None,
            hours_set_id: None,
            mode: SchedulingMode::Fastest,
            calendar_id: None,
            color: None,
        }
    }

    fn habit(ideal: Option<u16>, preferred: Option<Vec<u8>>) -> HabitInput {
        HabitInput {
            id: "habit-1".into(),
            created_at: utc(2025, 3, 1, 0, 0),
            title: "Morning run".into(),
            priority: HabitPriority::Medium,
            recovery: RecoveryPolicy::Skip,
            rule: "FREQ=DAILY".into(),
            starts_on: None,
            ends_on: None,
            duration_minutes: 30,
            min_duration_minutes: None,
            max_duration_minutes: None,
            repeats_per_period: 1,
            ideal_minute_of_day: ideal,
            preferred_days: preferred,
            hours_set_id: None,
            active: true,
            calendar_id: None,
            color: None,
        }
    }

    #[test]
    fn unsplittable_task_is_one_chunk() {
        assert_eq!(chunk_plan_for_task(&task(100, None)), Some(vec![7]));
    }

    #[test]
    fn exact_split_covers_total_within_bounds() {
        // 150 minutes, chunks of 30-60 minutes: 10 slots, bounds [2, 4].
        let plan = chunk_plan_for_task(&task(
            150,
            Some(SplitRange {
                min_chunk_minutes: 30,
                max_chunk_minutes: 60,
            }),
        ))
        .expect("plan");
        assert_eq!(plan.iter().sum::<usize>(), 10);
        assert!(plan.iter().all(|&c| (2..=4).contains(&c)));
    }

    #[test]
    fn unsatisfiable_split_fails_cleanly() {
        // 150 minutes, chunks of 75-90 minutes: the first max-size chunk
        // leaves a remainder no chunk combination can cover.
        let plan = chunk_plan_for_task(&task(
            150,
            Some(SplitRange {
                min_chunk_minutes: 75,
                max_chunk_minutes: 90,
            }),
        ));
        assert_eq!(plan, None);
    }

    #[test]
    fn split_smaller_than_min_chunk_fails() {
        assert_eq!(split_into_chunk_sizes(3, 4, 6), None);
    }

    #[test]
    fn max_clamped_to_min() {
        assert_eq!(split_into_chunk_sizes(8, 4, 2), Some(vec![4, 4]));
    }

    fn daily_period(grid: &SlotGrid) -> HabitPeriod {
        let rule: RecurrenceRule = "FREQ=DAILY".parse().unwrap();
        crate::services::recurrence::build_habit_periods(
            grid.start(),
            grid.end(),
            None,
            None,
            &rule,
            1,
        )
        .unwrap()
        .into_iter()
        .next()
        .unwrap()
    }

    #[test]
    fn candidates_prefer_the_ideal_time_of_day() {
        let grid = SlotGrid::new(utc(2025, 3, 3, 0, 0), 4, 4, 12, chrono_tz::UTC);
        let period = daily_period(&grid);
        // Ideal 09:00; expected slot is period start (midnight).
        let candidates =
            habit_occurrence_candidates(&grid, &habit(Some(540), None), &period, 0);
        assert!(!candidates.is_empty());
        let best = candidates[0];
        let parts = grid.zoned_parts(grid.timestamp_for_slot(best.slot));
        // The winner balances ideal-time distance against expected distance;
        // it must land between midnight and 09:00.
        assert!(parts.minute_of_day <= 540);
        // Strictly better than a candidate at the far end of the day.
        let worst = candidates.last().unwrap();
        assert!(best.score < worst.score);
    }

    #[test]
    fn non_preferred_days_are_heavily_penalized() {
        let grid = SlotGrid::new(utc(2025, 3, 3, 0, 0), 4, 4, 12, chrono_tz::UTC);
        let rule: RecurrenceRule = "FREQ=WEEKLY".parse().unwrap();
        let period = crate::services::recurrence::build_habit_periods(
            grid.start(),
            grid.end(),
            None,
            None,
            &rule,
            1,
        )
        .unwrap()[0]
            .clone();
        // Only Wednesdays preferred.
        let candidates =
            habit_occurrence_candidates(&grid, &habit(None, Some(vec![3])), &period, 0);
        let best = candidates[0];
        let parts = grid.zoned_parts(grid.timestamp_for_slot(best.slot));
        assert_eq!(parts.weekday, 3);
        assert!(best.score < NON_PREFERRED_DAY_SCORE);
    }

    #[test]
    fn candidates_stay_inside_the_period() {
        let grid = SlotGrid::new(utc(2025, 3, 3, 0, 0), 4, 4, 12, chrono_tz::UTC);
        let period = daily_period(&grid);
        let candidates = habit_occurrence_candidates(&grid, &habit(None, None), &period, 0);
        let period_first = grid.slot_for_timestamp(period.start) as usize;
        let period_last = grid.slot_for_timestamp(period.end) as usize;
        assert!(candidates
            .iter()
            .all(|c| c.slot >= period_first && c.slot < period_last));
    }
}
