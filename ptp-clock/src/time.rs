use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub(crate) const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A time as exchanged with the PTP driver: seconds and nanoseconds since
/// the clock's epoch, or a signed duration with the same layout.
///
/// The nanoseconds are always within `[0, 1_000_000_000)`, a negative value
/// is expressed with negative seconds, e.g. -0.25s is `(-1, 750_000_000)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct PtpTime {
    seconds: i64,
    nanos: u32,
}

impl PtpTime {
    pub const ZERO: Self = Self {
        seconds: 0,
        nanos: 0,
    };

    /// Carries whole seconds out of `nanos`, saturating at the largest
    /// representable second.
    pub const fn new(seconds: i64, nanos: u32) -> Self {
        Self {
            seconds: seconds.saturating_add((nanos / NANOS_PER_SECOND) as i64),
            nanos: nanos % NANOS_PER_SECOND,
        }
    }

    pub fn from_nanos(nanos: i128) -> Self {
        // euclidean division keeps the nanoseconds non-negative
        Self {
            seconds: nanos.div_euclid(NANOS_PER_SECOND as i128) as i64,
            nanos: nanos.rem_euclid(NANOS_PER_SECOND as i128) as u32,
        }
    }

    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    pub const fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn total_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SECOND as i128 + self.nanos as i128
    }

    /// `None` when negative.
    pub fn to_duration(&self) -> Option<Duration> {
        let seconds = u64::try_from(self.seconds).ok()?;
        Some(Duration::new(seconds, self.nanos))
    }

    /// Interpret this time as an offset from the unix epoch.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        match self.to_duration() {
            Some(duration) => UNIX_EPOCH.checked_add(duration),
            None => {
                let before = Duration::from_nanos(u64::try_from(-self.total_nanos()).ok()?);
                UNIX_EPOCH.checked_sub(before)
            }
        }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self::from(after),
            Err(before) => Self::from_nanos(-(before.duration().as_nanos() as i128)),
        }
    }

    pub(crate) fn from_timespec(timespec: libc::timespec) -> Self {
        Self::from_nanos(
            timespec.tv_sec as i128 * NANOS_PER_SECOND as i128 + timespec.tv_nsec as i128,
        )
    }

    pub(crate) fn to_timespec(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.seconds as libc::time_t,
            tv_nsec: self.nanos as _,
        }
    }
}

impl From<Duration> for PtpTime {
    fn from(duration: Duration) -> Self {
        Self {
            seconds: duration.as_secs() as i64,
            nanos: duration.subsec_nanos(),
        }
    }
}

impl std::fmt::Display for PtpTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}
