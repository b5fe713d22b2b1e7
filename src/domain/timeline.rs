//! Time-bucket windowing for the aggregation passes.
//!
//! Monthly buckets are half-open `[first-of-month, first-of-next-month)`.
//! Yearly buckets ("epochs") are anchored to August 1, the community
//! anniversary, so a date on July 31 belongs to the previous year's epoch.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// Build a UTC midnight datetime. Falls back to the minimum datetime for
/// out-of-range components, which callers never produce.
#[must_use]
pub fn ymd_utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(DateTime::<Utc>::MIN_UTC, |dt| Utc.from_utc_datetime(&dt))
}

/// Snap to the first of the month, shifted by `delta` months.
#[must_use]
pub fn adjust_month(d: DateTime<Utc>, delta: i32) -> DateTime<Utc> {
    let total = d.year() * 12 + d.month() as i32 - 1 + delta;
    let (year, month) = (total.div_euclid(12), total.rem_euclid(12) + 1);
    ymd_utc(year, month as u32, 1)
}

/// Yield `(month_start, next_month_start)` for every month from the one
/// containing `start` through the one containing `end`.
pub fn months_in_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> impl Iterator<Item = (DateTime<Utc>, DateTime<Utc>)> {
    let mut cursor = adjust_month(start, 0);
    let last = adjust_month(end, 0);
    std::iter::from_fn(move || {
        if cursor > last {
            return None;
        }
        let next = adjust_month(cursor, 1);
        let window = (cursor, next);
        cursor = next;
        Some(window)
    })
}

/// Snap back to August 1 of this year, or of the previous year for dates
/// before the anniversary.
#[must_use]
pub fn prev_epoch(d: DateTime<Utc>) -> DateTime<Utc> {
    let aug = ymd_utc(d.year(), 8, 1);
    if d >= aug {
        aug
    } else {
        ymd_utc(d.year() - 1, 8, 1)
    }
}

/// Snap forward to the first August 1 strictly after `d`'s epoch start.
#[must_use]
pub fn next_epoch(d: DateTime<Utc>) -> DateTime<Utc> {
    let aug = ymd_utc(d.year(), 8, 1);
    if d >= aug {
        ymd_utc(d.year() + 1, 8, 1)
    } else {
        aug
    }
}

/// Yield `(epoch_start, next_epoch_start)` pairs covering the range.
pub fn epochs_in_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> impl Iterator<Item = (DateTime<Utc>, DateTime<Utc>)> {
    let mut cursor = prev_epoch(start);
    let stop = next_epoch(end);
    std::iter::from_fn(move || {
        if cursor >= stop {
            return None;
        }
        let next = next_epoch(cursor);
        let window = (cursor, next);
        cursor = next;
        Some(window)
    })
}
