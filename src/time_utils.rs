// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and sync windows.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Inclusive calendar-day window used for every fetch and query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The last `days` calendar days ending today (UTC), today included.
    pub fn last_days(days: u32) -> Self {
        Self::last_days_from(Utc::now().date_naive(), days)
    }

    /// The last `days` calendar days ending on `end`, `end` included.
    ///
    /// Zero days is treated as one. The start saturates at the earliest
    /// representable date.
    pub fn last_days_from(end: NaiveDate, days: u32) -> Self {
        let back = Days::new(u64::from(days.saturating_sub(1)));
        Self {
            start: end.checked_sub_days(back).unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    /// First instant of the range.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// Exclusive upper bound: midnight after the last day.
    pub fn end_time_exclusive(&self) -> DateTime<Utc> {
        match self.end.succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN).and_utc(),
            None => DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start_time() && instant < self.end_time_exclusive()
    }

    /// Number of calendar days covered (inclusive).
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}
