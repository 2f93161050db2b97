//! Refill schedule derivation.
//!
//! A prescription's end date is derived from its line items: the item with
//! the longest stated duration determines how far the prescription runs.
//! The derivation is pure and is computed exactly once, immediately before
//! the prescription is persisted; it is never recomputed afterwards.

use chrono::{Days, NaiveDate};

/// Derives a prescription's end date from its start date and the per-item
/// durations.
///
/// Returns `start_date + max(duration_days)` over the items that specify a
/// duration, or `None` if no item does.
///
/// # Arguments
///
/// * `start_date` - The prescription's start date.
/// * `duration_days` - One entry per prescription item; `None` for items
///   without a stated duration.
pub fn end_date(start_date: NaiveDate, duration_days: &[Option<u32>]) -> Option<NaiveDate> {
    let longest = duration_days.iter().flatten().copied().max()?;

    // NaiveDate + u64 days only fails far outside any clinical date range.
    start_date.checked_add_days(Days::new(u64::from(longest)))
}
