//! Query window correction
//!
//! Every trace query window is pulled into the corridor
//! `[today_start - earliest_days, today_end]` before it reaches the store.

use chrono::{DateTime, Utc};

use crate::domain::error::ServiceError;
use crate::utils::time::{MILLIS_PER_DAY, day_end_ms, day_start_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct DateValidator {
    earliest_days: i64,
}

impl DateValidator {
    pub fn new(earliest_days: i64) -> Self {
        Self {
            earliest_days: earliest_days.max(0),
        }
    }

    pub fn correct(&self, start_ms: i64, end_ms: i64) -> Result<DateWindow, ServiceError> {
        correct_date(start_ms, end_ms, self.earliest_days, Utc::now())
    }
}

/// Clamp `[start_ms, end_ms]` into the corridor ending today
///
/// Rejects non-positive bounds, inverted windows and windows lying entirely
/// on one side of the corridor.
pub fn correct_date(
    start_ms: i64,
    end_ms: i64,
    earliest_days: i64,
    now: DateTime<Utc>,
) -> Result<DateWindow, ServiceError> {
    if start_ms <= 0 || end_ms <= 0 {
        return Err(ServiceError::invalid_param(
            "start_time and end_time must be positive",
        ));
    }
    if start_ms > end_ms {
        return Err(ServiceError::invalid_param(
            "start_time must not be after end_time",
        ));
    }

    let lower = day_start_ms(now) - earliest_days.saturating_mul(MILLIS_PER_DAY);
    let upper = day_end_ms(now);
    if (start_ms < lower && end_ms < lower) || (start_ms > upper && end_ms > upper) {
        return Err(ServiceError::invalid_param(format!(
            "time window is outside the last {} days",
            earliest_days
        )));
    }

    Ok(DateWindow {
        start_ms: start_ms.max(lower),
        end_ms: end_ms.min(upper),
    })
}
