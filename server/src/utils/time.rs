//! Time utility functions
//!
//! API surfaces speak milliseconds, the span store speaks microseconds and
//! OTLP speaks nanoseconds. Conversions live here so every boundary agrees.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

pub const MICROS_PER_MILLI: i64 = 1_000;
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;
pub const MICROS_PER_DAY: i64 = MILLIS_PER_DAY * MICROS_PER_MILLI;

/// Current wall clock in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current wall clock in microseconds since Unix epoch
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Milliseconds to microseconds (saturating)
pub fn ms_to_us(ms: i64) -> i64 {
    ms.saturating_mul(MICROS_PER_MILLI)
}

/// Microseconds to milliseconds (truncating toward zero)
pub fn us_to_ms(us: i64) -> i64 {
    us / MICROS_PER_MILLI
}

/// Nanoseconds since Unix epoch to microseconds
pub fn nanos_to_micros(nanos: u64) -> i64 {
    (nanos / 1_000) as i64
}

/// Day bucket (days since Unix epoch, UTC) of a microsecond timestamp
pub fn day_bucket(micros: i64) -> i32 {
    micros.div_euclid(MICROS_PER_DAY) as i32
}

/// First millisecond of the UTC day containing `now`
pub fn day_start_ms(now: DateTime<Utc>) -> i64 {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
        .timestamp_millis()
}

/// Last millisecond of the UTC day containing `now`
pub fn day_end_ms(now: DateTime<Utc>) -> i64 {
    day_start_ms(now) + MILLIS_PER_DAY - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_us_round_trip() {
        for ms in [0_i64, 1, 1000, 1_704_067_200_123] {
            assert_eq!(us_to_ms(ms_to_us(ms)), ms);
        }
        assert_eq!(us_to_ms(1_999), 1);
        assert_eq!(ms_to_us(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_nanos_to_micros() {
        assert_eq!(nanos_to_micros(1_500_000_000), 1_500_000);
        assert_eq!(nanos_to_micros(999), 0);
    }

    #[test]
    fn test_day_bucket() {
        assert_eq!(day_bucket(0), 0);
        assert_eq!(day_bucket(MICROS_PER_DAY - 1), 0);
        assert_eq!(day_bucket(MICROS_PER_DAY), 1);
        assert_eq!(day_bucket(-1), -1);
    }

    #[test]
    fn test_day_bounds() {
        // 2024-01-01 05:00 UTC
        let now = DateTime::from_timestamp_millis(1_704_067_200_000 + 5 * 3_600_000).unwrap();
        let start = day_start_ms(now);
        assert_eq!(start, 1_704_067_200_000);
        assert_eq!(day_end_ms(now), start + MILLIS_PER_DAY - 1);
    }
}
