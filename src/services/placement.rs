use crate::models::input::SchedulingMode;

/// Acceptance test shared by the search and by pre-scored habit candidates:
/// every slot of the placement must be allowed and unoccupied, and the
/// downtime buffer on both sides must be unoccupied (the buffer itself does
/// not need to fall inside working hours).
pub fn fits_at(
    allowed: &[bool],
    occupancy: &[bool],
    start: usize,
    duration: usize,
    buffer_slots: usize,
) -> bool {
    if duration == 0 || start + duration > allowed.len() {
        return false;
    }
    for slot in start..start + duration {
        if !allowed[slot] || occupancy[slot] {
            return false;
        }
    }
    let before = start.saturating_sub(buffer_slots);
    for slot in before..start {
        if occupancy[slot] {
            return false;
        }
    }
    let after_end = (start + duration + buffer_slots).min(occupancy.len());
    for slot in start + duration..after_end {
        if occupancy[slot] {
            return false;
        }
    }
    true
}

/// Find one start slot for a placement of `duration_slots`, or `None`.
///
/// Candidate starts are `[earliest_slot, latest_feasible_start]` where the
/// latest feasible start respects the mask length and the optional exclusive
/// `latest_end_slot` bound. Ordering: `fastest` scans ascending, `packed`
/// descending, `balanced` by the caller-supplied per-slot score (stable on
/// slot index). The first acceptable candidate wins; there is no backtracking.
pub fn find_start_slot(
    allowed: &[bool],
    occupancy: &[bool],
    duration_slots: usize,
    earliest_slot: usize,
    latest_end_slot: Option<usize>,
    mode: SchedulingMode,
    buffer_slots: usize,
    score: Option<&dyn Fn(usize) -> i64>,
) -> Option<usize> {
    let len = allowed.len();
    if duration_slots == 0 || duration_slots > len {
        return None;
    }
    let mut latest_start = len - duration_slots;
    if let Some(latest_end) = latest_end_slot {
        if latest_end < duration_slots {
            return None;
        }
        latest_start = latest_start.min(latest_end - duration_slots);
    }
    if latest_start < earliest_slot {
        return None;
    }

    let accepts =
        |slot: usize| fits_at(allowed, occupancy, slot, duration_slots, buffer_slots);

    match mode {
        SchedulingMode::Fastest => (earliest_slot..=latest_start).find(|&s| accepts(s)),
        SchedulingMode::Packed => (earliest_slot..=latest_start).rev().find(|&s| accepts(s)),
        SchedulingMode::Balanced => {
            let mut candidates: Vec<usize> = (earliest_slot..=latest_start).collect();
            if let Some(score) = score {
                candidates.sort_by_key(|&s| (score(s), s));
            }
            candidates.into_iter().find(|&s| accepts(s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(len: usize) -> Vec<bool> {
        vec![true; len]
    }

    fn empty(len: usize) -> Vec<bool> {
        vec![false; len]
    }

    #[test]
    fn fastest_takes_the_earliest_fit() {
        let allowed = open(20);
        let mut occupancy = empty(20);
        occupancy[0] = true;
        occupancy[1] = true;
        let slot = find_start_slot(
            &allowed,
            &occupancy,
            3,
            0,
            None,
            SchedulingMode::Fastest,
            0,
            None,
        );
        assert_eq!(slot, Some(2));
    }

    #[test]
    fn packed_takes_the_latest_fit() {
        let allowed = open(20);
        let occupancy = empty(20);
        let slot = find_start_slot(
            &allowed,
            &occupancy,
            3,
            0,
            None,
            SchedulingMode::Packed,
            0,
            None,
        );
        assert_eq!(slot, Some(17));
    }

    #[test]
    fn balanced_follows_the_caller_score() {
        let allowed = open(20);
        let occupancy = empty(20);
        // Bias toward slot 10.
        let score = |s: usize| (s as i64 - 10).abs();
        let slot = find_start_slot(
            &allowed,
            &occupancy,
            2,
            0,
            None,
            SchedulingMode::Balanced,
            0,
            Some(&score),
        );
        assert_eq!(slot, Some(10));
    }

    #[test]
    fn deadline_bound_caps_the_latest_start() {
        let allowed = open(20);
        let occupancy = empty(20);
        let slot = find_start_slot(
            &allowed,
            &occupancy,
            4,
            0,
            Some(8),
            SchedulingMode::Packed,
            0,
            None,
        );
        assert_eq!(slot, Some(4));
        // Bound tighter than the duration: no placement.
        let slot = find_start_slot(
            &allowed,
            &occupancy,
            4,
            0,
            Some(3),
            SchedulingMode::Fastest,
            0,
            None,
        );
        assert_eq!(slot, None);
    }

    #[test]
    fn earliest_bound_is_respected() {
        let allowed = open(20);
        let occupancy = empty(20);
        let slot = find_start_slot(
            &allowed,
            &occupancy,
            2,
            5,
            None,
            SchedulingMode::Fastest,
            0,
            None,
        );
        assert_eq!(slot, Some(5));
    }

    #[test]
    fn buffer_requires_unoccupied_neighbors_but_not_availability() {
        // Slots 0-3 unavailable (outside working hours), everything else open.
        let mut allowed = open(20);
        for slot in 0..4 {
            allowed[slot] = false;
        }
        let mut occupancy = empty(20);
        occupancy[7] = true;

        assert!(!fits_at(&allowed, &occupancy, 3, 2, 1)); // body unavailable
        assert!(!fits_at(&allowed, &occupancy, 5, 2, 1)); // buffer hits 7
        assert!(!fits_at(&allowed, &occupancy, 6, 2, 1)); // body hits 7
        assert!(fits_at(&allowed, &occupancy, 9, 2, 1)); // leading buffer at 8 is free
        // Leading buffer slots may be unavailable as long as they are free:
        // start at 4 puts the leading buffer on unavailable slot 3.
        assert!(fits_at(&allowed, &occupancy, 4, 2, 1));
    }

    #[test]
    fn zero_duration_and_oversize_requests_fail() {
        let allowed = open(4);
        let occupancy = empty(4);
        assert_eq!(
            find_start_slot(&allowed, &occupancy, 0, 0, None, SchedulingMode::Fastest, 0, None),
            None
        );
        assert_eq!(
            find_start_slot(&allowed, &occupancy, 5, 0, None, SchedulingMode::Fastest, 0, None),
            None
        );
    }
}
