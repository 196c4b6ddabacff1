// Note on unsafe usage.
//
// This module uses unsafe code to call clock_gettime, clock_settime and
// clock_adjtime. Every pointer handed to the kernel refers to a live local
// or exclusively borrowed value. An invalid clock id is rejected by the
// kernel with EINVAL, so the public functions are safe for any argument.

use std::{io, os::unix::io::RawFd};

use crate::{time::PtpTime, timex::Timex, Error};

const CLOCKFD: libc::clockid_t = 3;

/// A POSIX clock id, either a system clock or a dynamic clock derived from
/// the descriptor of an open PTP device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PosixClock {
    clock: libc::clockid_t,
}

impl PosixClock {
    pub fn realtime() -> Self {
        Self::from_id(libc::CLOCK_REALTIME)
    }

    pub fn from_id(id: libc::clockid_t) -> Self {
        Self { clock: id }
    }

    /// The dynamic clock of an open character device (`FD_TO_CLOCKID`).
    pub fn from_file_descriptor(fd: RawFd) -> Self {
        Self::from_id(((!(fd as libc::clockid_t)) << 3) | CLOCKFD)
    }

    /// The descriptor this clock was derived from (`CLOCKID_TO_FD`), `None`
    /// for clocks that are not dynamic.
    pub fn file_descriptor(&self) -> Option<RawFd> {
        if self.clock & 0b111 != CLOCKFD {
            return None;
        }

        Some(!(self.clock >> 3) as RawFd)
    }

    pub fn id(&self) -> libc::clockid_t {
        self.clock
    }

    pub fn now(&self) -> Result<PtpTime, Error> {
        let mut timespec = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        // Safety:
        // timespec is a valid, writable timespec for the duration of the call
        if unsafe { libc::clock_gettime(self.clock, &mut timespec) } == -1 {
            return Err(syscall_error("clock_gettime"));
        }

        Ok(PtpTime::from_timespec(timespec))
    }

    /// Step the clock to `time`.
    pub fn set(&self, time: PtpTime) -> Result<(), Error> {
        let timespec = time.to_timespec();

        // Safety:
        // timespec is a valid timespec that outlives the call
        if unsafe { libc::clock_settime(self.clock, &timespec) } == -1 {
            return Err(syscall_error("clock_settime"));
        }

        Ok(())
    }

    /// Apply the adjustment selected by the modes of `timex`. On success the
    /// kernel has written the current clock state back into `timex` and the
    /// clock state (e.g. `TIME_OK`) is returned.
    pub fn adjtime(&self, timex: &mut Timex) -> Result<libc::c_int, Error> {
        // Safety:
        // timex is exclusively borrowed and a properly initialized libc::timex
        let state = unsafe { libc::clock_adjtime(self.clock, timex.as_mut_ptr()) };
        if state == -1 {
            return Err(syscall_error("clock_adjtime"));
        }

        Ok(state)
    }
}

fn syscall_error(call: &'static str) -> Error {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
    Error::ClockSyscall { call, errno }
}
