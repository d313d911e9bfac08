use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, AppResult};

/// Hard cap on how far an occurrence may drift from its expected time.
pub const MAX_DRIFT_DAYS: i64 = 30;

/// Supported recurrence frequencies. Anything else a rule string carries is a
/// typed `UnsupportedRecurrence` error, which the solver downgrades to a
/// per-habit drop diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Base period length in days, before the interval multiplier. Calendar
    /// months are approximated at a fixed 30 days.
    pub fn base_period_days(self) -> i64 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Monthly => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed recurrence rule: a frequency, an interval, and an optional weekday
/// filter. The filter never affects period sizing; candidate scoring reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub freq: Frequency,
    pub interval: u32,
    /// 0-6 with 0 = Sunday.
    pub by_day: Option<Vec<u8>>,
}

impl RecurrenceRule {
    pub fn period_days(&self) -> i64 {
        self.freq.base_period_days() * self.interval as i64
    }
}

impl FromStr for RecurrenceRule {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix("RRULE:").unwrap_or(trimmed);
        if body.is_empty() {
            return Err(AppError::unsupported_recurrence(raw, "empty rule"));
        }

        let mut params = HashMap::new();
        for part in body.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut split = part.splitn(2, '=');
            let key = split
                .next()
                .ok_or_else(|| AppError::unsupported_recurrence(raw, "malformed parameter"))?;
            let value = split
                .next()
                .ok_or_else(|| AppError::unsupported_recurrence(raw, "malformed parameter"))?;
            params.insert(key.to_uppercase(), value.to_string());
        }

        let freq = match params.get("FREQ").map(|s| s.to_uppercase()) {
            Some(ref f) if f == "DAILY" => Frequency::Daily,
            Some(ref f) if f == "WEEKLY" => Frequency::Weekly,
            Some(ref f) if f == "MONTHLY" => Frequency::Monthly,
            Some(other) => {
                return Err(AppError::unsupported_recurrence(
                    raw,
                    format!("unsupported FREQ {}", other),
                ))
            }
            None => {
                return Err(AppError::unsupported_recurrence(raw, "FREQ is required"));
            }
        };

        let interval = match params.get("INTERVAL") {
            Some(value) => {
                let parsed: u32 = value.parse().map_err(|_| {
                    AppError::unsupported_recurrence(raw, format!("invalid INTERVAL {}", value))
                })?;
                if parsed == 0 {
                    return Err(AppError::unsupported_recurrence(
                        raw,
                        "INTERVAL must be at least 1",
                    ));
                }
                parsed
            }
            None => 1,
        };

        let by_day = match params.get("BYDAY") {
            Some(value) => {
                let mut days = Vec::new();
                for code in value.split(',') {
                    days.push(parse_weekday_code(code.trim()).ok_or_else(|| {
                        AppError::unsupported_recurrence(
                            raw,
                            format!("invalid BYDAY entry {}", code),
                        )
                    })?);
                }
                Some(days)
            }
            None => None,
        };

        Ok(RecurrenceRule {
            freq,
            interval,
            by_day,
        })
    }
}

fn parse_weekday_code(code: &str) -> Option<u8> {
    match code.to_uppercase().as_str() {
        "SU" => Some(0),
        "MO" => Some(1),
        "TU" => Some(2),
        "WE" => Some(3),
        "TH" => Some(4),
        "FR" => Some(5),
        "SA" => Some(6),
        _ => None,
    }
}

/// A bounded sub-range of the horizon with a target occurrence count.
#[derive(Debug, Clone, PartialEq)]
pub struct HabitPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub target_count: u32,
    pub expected_spacing_days: f64,
    pub drift_days: i64,
}

/// Clip a habit's active window to the horizon and carve it into consecutive,
/// non-overlapping periods of the rule's length, the last one truncated at the
/// clipped end.
pub fn build_habit_periods(
    horizon_start: DateTime<Utc>,
    horizon_end: DateTime<Utc>,
    habit_start: Option<DateTime<Utc>>,
    habit_end: Option<DateTime<Utc>>,
    rule: &RecurrenceRule,
    target_count: u32,
) -> AppResult<Vec<HabitPeriod>> {
    if target_count == 0 {
        return Err(AppError::validation("Target occurrence count must be at least 1"));
    }

    let start = match habit_start {
        Some(s) if s > horizon_start => s,
        _ => horizon_start,
    };
    let end = match habit_end {
        Some(e) if e < horizon_end => e,
        _ => horizon_end,
    };
    if end <= start {
        return Ok(Vec::new());
    }

    let period_days = rule.period_days();
    let expected_spacing_days = period_days as f64 / target_count as f64;
    let drift_days = ((expected_spacing_days - 1.0).round() as i64).clamp(0, MAX_DRIFT_DAYS);

    let mut periods = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let period_end = (cursor + Duration::days(period_days)).min(end);
        periods.push(HabitPeriod {
            start: cursor,
            end: period_end,
            target_count,
            expected_spacing_days,
            drift_days,
        });
        cursor = cursor + Duration::days(period_days);
    }

    Ok(periods)
}
