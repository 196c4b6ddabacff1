//! Access to Linux PTP hardware clocks (`/dev/ptpN`).
//!
//! A [`PtpClock`] translates requests into the binary blocks of the kernel's
//! PTP ioctl interface, reads the clock through its dynamic POSIX clock id and
//! delivers external timestamp events on a background thread.
//!
//! ```no_run
//! use ptp_clock::{ExternalTimestampFlags, PtpClock, PtpTime};
//!
//! let clock = PtpClock::open(0)?;
//! println!("{} runs at {}", clock.name(), clock.time()?);
//!
//! clock.on_external_timestamp_event(Some(Box::new(|channel: u32, timestamp: PtpTime| {
//!     println!("edge on channel {channel} at {timestamp}");
//! })));
//! clock.request_external_timestamp(0, ExternalTimestampFlags::ENABLE)?;
//! # Ok::<(), ptp_clock::Error>(())
//! ```

// Note on unsafe usage.
//
// The ioctl calls in `device` and the clock syscalls in `posix` are the only
// places that use unsafe code, each is documented where it is made.

mod clock;
mod device;
mod error;
mod events;
mod ioctl;
mod pin;
mod posix;
#[cfg(any(test, feature = "__internal-test"))]
pub mod simulated;
mod time;
mod timex;
mod wire;

pub use clock::PtpClock;
pub use device::{clock_name_path, device_path, CharDevice, PtpDevice};
pub use error::{CodecError, Error};
pub use events::EventCallback;
pub use ioctl::{ControlCode, Request, DIR_NONE, DIR_READ, DIR_READ_WRITE, DIR_WRITE, PTP_TYPE};
pub use pin::Pin;
pub use posix::PosixClock;
pub use time::PtpTime;
pub use timex::{AdjustFlags, StatusFlags, Timex};
pub use wire::{
    Capabilities, ExternalTimestampEvent, ExternalTimestampFlags, PeriodicOutputConfig,
    PeriodicOutputField, PeriodicOutputFlags, PinDescriptor, PinFunction, SystemOffset,
    SystemOffsetExtended, SystemOffsetPrecise, MAX_SAMPLES,
};
