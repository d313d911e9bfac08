use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;

use crate::models::input::{BusyInterval, HourWindow};

/// Width of one scheduling slot.
pub const SLOT_MINUTES: i64 = 15;
pub const SLOT_SECONDS: i64 = SLOT_MINUTES * 60;
pub const SLOTS_PER_DAY: usize = (24 * 60 / SLOT_MINUTES) as usize;

/// Round a timestamp up to the next slot boundary (identity on boundaries).
pub fn ceil_to_slot(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let rem = secs.rem_euclid(SLOT_SECONDS);
    if rem == 0 && ts.timestamp_subsec_nanos() == 0 {
        ts
    } else {
        DateTime::from_timestamp(secs - rem + SLOT_SECONDS, 0).unwrap_or(ts)
    }
}

/// Round a timestamp down to the previous slot boundary.
pub fn floor_to_slot(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let rem = secs.rem_euclid(SLOT_SECONDS);
    DateTime::from_timestamp(secs - rem, 0).unwrap_or(ts)
}

/// Wall-clock coordinates of an instant in the grid's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedParts {
    /// 0-6 with 0 = Sunday.
    pub weekday: u8,
    /// 0-1439, minutes since local midnight.
    pub minute_of_day: u16,
}

/// Fixed-width slot grid over the scheduling horizon. Slot 0 starts at the
/// horizon start ("now" rounded up to the next boundary); all availability and
/// occupancy state is indexed by slot.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    start: DateTime<Utc>,
    slot_count: usize,
    timezone: Tz,
}

impl SlotGrid {
    pub fn new(
        now: DateTime<Utc>,
        horizon_weeks: u32,
        min_weeks: u32,
        max_weeks: u32,
        timezone: Tz,
    ) -> Self {
        let weeks = horizon_weeks.clamp(min_weeks, max_weeks);
        let slot_count = weeks as usize * 7 * SLOTS_PER_DAY;
        Self {
            start: ceil_to_slot(now),
            slot_count,
            timezone,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.slot_count as i64 * SLOT_SECONDS)
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Slot index containing `ts`, relative to the horizon start. May be
    /// negative or past the end; callers clamp as needed.
    pub fn slot_for_timestamp(&self, ts: DateTime<Utc>) -> i64 {
        (ts - self.start).num_seconds().div_euclid(SLOT_SECONDS)
    }

    pub fn timestamp_for_slot(&self, slot: usize) -> DateTime<Utc> {
        self.start + Duration::seconds(slot as i64 * SLOT_SECONDS)
    }

    /// Wall-clock weekday/minute of an instant, computed through the grid's
    /// IANA timezone so DST transitions (both the repeated fall-back hour and
    /// the skipped spring-forward hour) resolve to real local times.
    pub fn zoned_parts(&self, ts: DateTime<Utc>) -> ZonedParts {
        let local = ts.with_timezone(&self.timezone);
        ZonedParts {
            weekday: local.weekday().num_days_from_sunday() as u8,
            minute_of_day: (local.hour() * 60 + local.minute()) as u16,
        }
    }

    /// True at every slot whose zoned weekday/minute falls inside one of the
    /// supplied weekly windows.
    pub fn build_allowed_mask(&self, windows: &[HourWindow]) -> Vec<bool> {
        let mut mask = vec![false; self.slot_count];
        for (slot, allowed) in mask.iter_mut().enumerate() {
            let parts = self.zoned_parts(self.timestamp_for_slot(slot));
            *allowed = windows.iter().any(|w| {
                w.day == parts.weekday
                    && w.start_minute <= parts.minute_of_day
                    && parts.minute_of_day < w.end_minute
            });
        }
        mask
    }

    /// True at every slot overlapped by a busy interval, clipped to the horizon.
    pub fn build_busy_mask(&self, intervals: &[BusyInterval]) -> Vec<bool> {
        let mut mask = vec![false; self.slot_count];
        for interval in intervals {
            let first = self.slot_for_timestamp(interval.start).max(0);
            // Ceil on the end so a partial slot counts as occupied.
            let end_offset = (interval.end - self.start).num_seconds();
            let last = end_offset.div_euclid(SLOT_SECONDS)
                + if end_offset.rem_euclid(SLOT_SECONDS) > 0 {
                    1
                } else {
                    0
                };
            let last = last.min(self.slot_count as i64);
            for slot in first..last {
                mask[slot as usize] = true;
            }
        }
        mask
    }
}
