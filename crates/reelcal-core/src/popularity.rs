//! Minimum-popularity thresholds by distance from the current month.
//!
//! Past and current months have abundant listings, so they are filtered
//! aggressively. Future months have sparse listings, so the bar drops.

use chrono::NaiveDate;

use crate::month::YearMonth;

/// Threshold for the current month and anything before it.
pub const MIN_POPULARITY_PAST: f64 = 15.0;

/// Threshold for one or two months ahead.
pub const MIN_POPULARITY_NEAR_FUTURE: f64 = 3.0;

/// Threshold for three or more months ahead.
pub const MIN_POPULARITY_FAR_FUTURE: f64 = 0.5;

/// Step function over months ahead with breakpoints at 0 and 2 (inclusive).
pub fn threshold_for_months_ahead(months_ahead: i64) -> f64 {
    match months_ahead {
        i64::MIN..=0 => MIN_POPULARITY_PAST,
        1..=2 => MIN_POPULARITY_NEAR_FUTURE,
        _ => MIN_POPULARITY_FAR_FUTURE,
    }
}

/// Minimum popularity a release in `target` must reach to be kept.
pub fn min_popularity(target: YearMonth, today: NaiveDate) -> f64 {
    threshold_for_months_ahead(target.months_ahead_of(today))
}
