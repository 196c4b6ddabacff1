use std::{io, path::PathBuf};

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("failed to open PTP device {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to obtain device capabilities: {0}")]
    CapabilityQuery(io::Error),
    #[error("failed to obtain clock name through {}: {source}", .path.display())]
    NameRead { path: PathBuf, source: io::Error },
    #[error("failed to start the event loop: {0}")]
    EventLoop(io::Error),
    #[error("{request} failed: {source}")]
    ControlCall {
        request: &'static str,
        source: io::Error,
    },
    #[error("{call} failed: {}", os_error(.errno))]
    ClockSyscall { call: &'static str, errno: i32 },
    #[error("pin {index} does not exist, the device has {pins} pins")]
    PinOutOfRange { index: u32, pins: u32 },
    #[error("{requested} samples requested, at most {max} are supported")]
    TooManySamples { requested: u32, max: u32 },
    #[error("periodic output start time and phase offset are mutually exclusive")]
    ConflictingPeriodicOutputStart,
    #[error("the clock has been closed")]
    HandleClosed,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn os_error(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

impl Error {
    /// The OS error code of a failed clock syscall or control call.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::ClockSyscall { errno, .. } => Some(*errno),
            Error::ControlCall { source, .. } | Error::CapabilityQuery(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

/// A block returned by the driver could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum CodecError {
    #[error("{block} block truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        block: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("driver reported {count} samples, at most {max} fit in the block")]
    SampleCount { count: u32, max: u32 },
}
