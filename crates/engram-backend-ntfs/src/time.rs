//! FILETIME conversion.
//!
//! Windows stamps USN records in 100-nanosecond ticks since 1601-01-01
//! UTC. Conversion is exact to the tick; round-tripping through
//! [`datetime_to_filetime`] and back is the identity within 100 ns.
//!
//! Pre-1970 filetimes convert to negative Unix timestamps and are kept
//! as-is rather than clamped: forensically interesting records (reset
//! clocks, crafted journals) should survive into the activity stream.

use chrono::{DateTime, TimeZone, Utc};

/// 100-ns ticks between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_EPOCH_DELTA: i64 = 116_444_736_000_000_000;

/// 100-ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert a FILETIME tick count to a UTC timestamp.
pub fn filetime_to_datetime(filetime: i64) -> DateTime<Utc> {
    let unix_ticks = filetime - FILETIME_UNIX_EPOCH_DELTA;
    // Euclidean division keeps the nanosecond part non-negative for
    // pre-1970 values.
    let seconds = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;

    Utc.timestamp_opt(seconds, nanos).single().unwrap_or_default()
}

/// Convert a UTC timestamp back to FILETIME ticks.
pub fn datetime_to_filetime(dt: DateTime<Utc>) -> i64 {
    let seconds = dt.timestamp();
    let nanos = dt.timestamp_subsec_nanos() as i64;
    seconds * TICKS_PER_SECOND + nanos / 100 + FILETIME_UNIX_EPOCH_DELTA
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn known_timestamp() {
        // January 1, 2020 00:00:00 UTC
        let dt = filetime_to_datetime(132_223_104_000_000_000);
        assert_eq!(dt.year(), 2020);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
    }

    #[test]
    fn unix_epoch_is_zero() {
        let dt = filetime_to_datetime(FILETIME_UNIX_EPOCH_DELTA);
        assert_eq!(dt.timestamp(), 0);
        assert_eq!(dt.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn pre_1970_is_preserved() {
        // One hour before the Unix epoch.
        let ft = FILETIME_UNIX_EPOCH_DELTA - 3600 * TICKS_PER_SECOND;
        let dt = filetime_to_datetime(ft);
        assert_eq!(dt.timestamp(), -3600);

        // 1601-01-01 itself survives.
        let origin = filetime_to_datetime(0);
        assert_eq!(origin.year(), 1601);
    }

    #[test]
    fn round_trip_within_one_tick() {
        for ft in [
            0i64,
            FILETIME_UNIX_EPOCH_DELTA,
            132_223_104_000_000_000,
            132_223_104_000_000_123,
            FILETIME_UNIX_EPOCH_DELTA - 12_345,
        ] {
            let back = datetime_to_filetime(filetime_to_datetime(ft));
            assert!((back - ft).abs() <= 1, "ft={} back={}", ft, back);
        }
    }
}
