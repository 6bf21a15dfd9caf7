//! Timestamp helpers.
//!
//! All telemetry timestamps are nanoseconds since the Unix epoch.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Convert nanoseconds since Unix epoch to SystemTime.
#[inline(always)]
pub fn nanos_to_system_time(nanos: u64) -> SystemTime {
    let secs = nanos / 1_000_000_000;
    let subsec_nanos = (nanos % 1_000_000_000) as u32;
    UNIX_EPOCH + Duration::new(secs, subsec_nanos)
}

/// Convert SystemTime to nanoseconds since Unix epoch.
#[inline(always)]
pub fn system_time_to_nanos(time: SystemTime) -> u64 {
    u64::try_from(time.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos())
        .unwrap_or(u64::MAX)
}

/// Current wall-clock time in nanoseconds since Unix epoch.
#[inline(always)]
pub fn now_nanos() -> u64 {
    system_time_to_nanos(SystemTime::now())
}

/// Time left until `deadline`, zero once it has passed.
#[inline]
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Deadline `timeout` from now, saturating far in the future on overflow.
#[inline]
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_conversion() {
        let nanos = 1_700_000_000_123_456_789;
        let time = nanos_to_system_time(nanos);
        assert_eq!(system_time_to_nanos(time), nanos);
    }

    #[test]
    fn test_remaining_saturates() {
        let past = Instant::now() - Duration::from_millis(10);
        assert_eq!(remaining(past), Duration::ZERO);
        assert!(remaining(deadline_after(Duration::from_secs(5))) > Duration::from_secs(4));
    }

    #[test]
    fn test_deadline_after_huge_timeout() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now());
    }
}
