//! Kernel time representation
//!
//! All scheduler timestamps and durations are signed nanoseconds. Signed
//! arithmetic keeps laxity (`deadline - remaining`) meaningful once a
//! reservation is already late.

/// Nanoseconds since boot, or a duration in nanoseconds.
pub type Time = i64;

/// "Never": an unbounded timeout or an empty queue's next event.
pub const TIME_INFINITE: Time = Time::MAX;

pub const NS_PER_US: Time = 1_000;
pub const NS_PER_MS: Time = 1_000_000;
pub const NS_PER_SEC: Time = 1_000_000_000;

/// Convert microseconds to nanoseconds
#[inline]
pub const fn us_to_ns(us: i64) -> Time {
    us.saturating_mul(NS_PER_US)
}

/// Convert milliseconds to nanoseconds
#[inline]
pub const fn ms_to_ns(ms: i64) -> Time {
    ms.saturating_mul(NS_PER_MS)
}

/// Convert nanoseconds to whole microseconds (for logging)
#[inline]
pub const fn ns_to_us(ns: Time) -> i64 {
    ns / NS_PER_US
}

#[inline]
pub const fn is_infinite(t: Time) -> bool {
    t == TIME_INFINITE
}

/// Add a duration to a timestamp, pinning at [`TIME_INFINITE`].
#[inline]
pub const fn deadline_after(now: Time, duration: Time) -> Time {
    if is_infinite(duration) {
        TIME_INFINITE
    } else {
        now.saturating_add(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(us_to_ns(1), 1_000);
        assert_eq!(ms_to_ns(10), 10_000_000);
        assert_eq!(ns_to_us(ms_to_ns(3)), 3_000);
    }

    #[test]
    fn test_deadline_after_saturates() {
        assert_eq!(deadline_after(5, 10), 15);
        assert_eq!(deadline_after(5, TIME_INFINITE), TIME_INFINITE);
        assert_eq!(deadline_after(Time::MAX - 1, 10), TIME_INFINITE);
    }
}
