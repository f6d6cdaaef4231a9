//! Scheduler tunables
//!
//! Defaults are compiled in; the kernel may override them from the command
//! line (`sched.robin_ms=5 sched.afew_us=100 ...`) before constructing the
//! scheduler.

use crate::error::SchedError;
use crate::time::{ms_to_ns, us_to_ns, Time};

/// Round-robin quantum granted to an activity
pub const DEFAULT_ROBIN_SLICE: Time = ms_to_ns(10);

/// Guard interval: reservations starting sooner than this are treated as
/// starting now, and sleepers due within it are woken early.
pub const DEFAULT_A_FEW_SLICE: Time = us_to_ns(200);

/// Shortest slice ever programmed into the timer
pub const DEFAULT_MIN_SLICE: Time = us_to_ns(50);

/// Reservations preallocated for constraint admission
pub const DEFAULT_RESERVATION_POOL: usize = 256;

pub const DEFAULT_MAX_THREADS: usize = 1024;
pub const DEFAULT_MAX_ACTIVITIES: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    /// Round-robin slice per activity turn (`RobinSlice`)
    pub robin_slice: Time,
    /// Start-time guard and wake slop (`AFewSlice`)
    pub a_few_slice: Time,
    /// Lower bound for any programmed slice
    pub min_slice: Time,
    /// Capacity of the reservation pool
    pub reservation_pool: usize,
    pub max_threads: usize,
    pub max_activities: usize,
}

impl SchedConfig {
    pub const DEFAULT: SchedConfig = SchedConfig {
        robin_slice: DEFAULT_ROBIN_SLICE,
        a_few_slice: DEFAULT_A_FEW_SLICE,
        min_slice: DEFAULT_MIN_SLICE,
        reservation_pool: DEFAULT_RESERVATION_POOL,
        max_threads: DEFAULT_MAX_THREADS,
        max_activities: DEFAULT_MAX_ACTIVITIES,
    };

    pub const fn with_robin_slice(mut self, slice: Time) -> Self {
        self.robin_slice = slice;
        self
    }

    pub const fn with_a_few_slice(mut self, slice: Time) -> Self {
        self.a_few_slice = slice;
        self
    }

    pub const fn with_min_slice(mut self, slice: Time) -> Self {
        self.min_slice = slice;
        self
    }

    pub const fn with_reservation_pool(mut self, entries: usize) -> Self {
        self.reservation_pool = entries;
        self
    }

    pub const fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    pub const fn with_max_activities(mut self, activities: usize) -> Self {
        self.max_activities = activities;
        self
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.robin_slice <= 0 || self.min_slice <= 0 || self.a_few_slice < 0 {
            return Err(SchedError::InvalidConfig);
        }
        if self.min_slice > self.robin_slice {
            return Err(SchedError::InvalidConfig);
        }
        if self.reservation_pool == 0 || self.max_threads == 0 || self.max_activities == 0 {
            return Err(SchedError::InvalidConfig);
        }
        // Arena keys are 32-bit.
        if self.reservation_pool > u32::MAX as usize
            || self.max_threads > u32::MAX as usize
            || self.max_activities > u32::MAX as usize
        {
            return Err(SchedError::InvalidConfig);
        }
        Ok(())
    }

    /// Apply `sched.*` directives from a kernel command line on top of the
    /// defaults. Unknown keys and malformed values are ignored.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::DEFAULT;
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let Some(key) = key.strip_prefix("sched.") else {
                continue;
            };
            let Ok(number) = value.parse::<u64>() else {
                crate::kwarn!("sched: ignoring malformed directive {}", token);
                continue;
            };
            let signed = number.min(i64::MAX as u64) as i64;

            match key {
                "robin_ms" => config.robin_slice = ms_to_ns(signed),
                "afew_us" => config.a_few_slice = us_to_ns(signed),
                "min_slice_us" => config.min_slice = us_to_ns(signed),
                "pool" => config.reservation_pool = number as usize,
                "threads" => config.max_threads = number as usize,
                "activities" => config.max_activities = number as usize,
                _ => crate::kdebug!("sched: unknown directive {}", token),
            }
        }
        config
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(SchedConfig::default().validate(), Ok(()));
        assert_eq!(SchedConfig::DEFAULT.robin_slice, ms_to_ns(10));
    }

    #[test]
    fn test_from_cmdline_overrides() {
        let config = SchedConfig::from_cmdline(
            "console=ttyS0 sched.robin_ms=5 sched.afew_us=100 sched.pool=32 loglevel=debug",
        );
        assert_eq!(config.robin_slice, ms_to_ns(5));
        assert_eq!(config.a_few_slice, us_to_ns(100));
        assert_eq!(config.reservation_pool, 32);
        assert_eq!(config.min_slice, DEFAULT_MIN_SLICE);
    }

    #[test]
    fn test_from_cmdline_ignores_garbage() {
        let config = SchedConfig::from_cmdline("sched.robin_ms=fast sched.bogus=1 sched.pool");
        assert_eq!(config, SchedConfig::DEFAULT);
    }

    #[test]
    fn test_validate_rejects_bad_slices() {
        let zero_robin = SchedConfig::DEFAULT.with_robin_slice(0);
        assert_eq!(zero_robin.validate(), Err(SchedError::InvalidConfig));

        let min_above_robin = SchedConfig::DEFAULT
            .with_robin_slice(ms_to_ns(1))
            .with_min_slice(ms_to_ns(2));
        assert_eq!(min_above_robin.validate(), Err(SchedError::InvalidConfig));

        let negative_guard = SchedConfig::DEFAULT.with_a_few_slice(-1);
        assert_eq!(negative_guard.validate(), Err(SchedError::InvalidConfig));

        let empty_pool = SchedConfig::DEFAULT.with_reservation_pool(0);
        assert_eq!(empty_pool.validate(), Err(SchedError::InvalidConfig));
    }
}
