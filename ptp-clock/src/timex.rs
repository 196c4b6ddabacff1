use std::ops::{Deref, DerefMut};

use bitflags::bitflags;

/// A `struct timex` as taken by `clock_adjtime(2)`.
///
/// The kernel reads the fields selected by [`Timex::modes`] and writes the
/// current clock state back into the whole struct.
#[derive(Clone)]
pub struct Timex(libc::timex);

impl Timex {
    pub fn new() -> Self {
        // Safety:
        // libc::timex consists of integers only, so all-zero is a valid value
        // and matches the "change nothing" request.
        Self(unsafe { std::mem::MaybeUninit::zeroed().assume_init() })
    }

    /// Gradually correct the clock by `nanos`. A positive offset makes the
    /// clock run faster until the offset has been applied, a negative one
    /// makes it run slower.
    pub fn offset_nanos(nanos: i64) -> Self {
        let mut timex = Self::new();
        timex.set_modes(AdjustFlags::OFFSET | AdjustFlags::NANO);
        timex.offset = nanos as libc::c_long;
        timex
    }

    /// Set the frequency offset of the clock to `ppb` parts per billion.
    pub fn frequency_ppb(ppb: f64) -> Self {
        let mut timex = Self::new();
        timex.set_modes(AdjustFlags::FREQUENCY);
        timex.set_frequency_ppb(ppb);
        timex
    }

    pub fn modes(&self) -> AdjustFlags {
        AdjustFlags::from_bits_truncate(self.0.modes)
    }

    pub fn set_modes(&mut self, value: AdjustFlags) {
        self.0.modes = value.bits();
    }

    pub fn status(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.0.status)
    }

    /// The frequency offset in parts per billion.
    pub fn frequency(&self) -> f64 {
        // freq is in ppm with a 16 bit fractional part
        self.0.freq as f64 / 65.536
    }

    pub fn set_frequency_ppb(&mut self, ppb: f64) {
        self.0.freq = (ppb * 65.536).round() as libc::c_long;
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::timex {
        &mut self.0
    }
}

impl Default for Timex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timex")
            .field("modes", &self.modes())
            .field("offset", &self.0.offset)
            .field("freq", &self.0.freq)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Deref for Timex {
    type Target = libc::timex;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Timex {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

// https://man7.org/linux/man-pages/man2/adjtimex.2.html
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdjustFlags: u32 {
        /// Set time offset from `offset`.
        const OFFSET = libc::ADJ_OFFSET;
        /// Set frequency offset from `freq`.
        const FREQUENCY = libc::ADJ_FREQUENCY;
        /// Set maximum time error from `maxerror`.
        const MAXERROR = libc::ADJ_MAXERROR;
        /// Set estimated time error from `esterror`.
        const ESTERROR = libc::ADJ_ESTERROR;
        /// Set clock status bits from `status`.
        const STATUS = libc::ADJ_STATUS;
        /// Set PLL time constant from `constant`.
        const TIMECONST = libc::ADJ_TIMECONST;
        /// Step the clock by `time`. This is not a gradual adjustment.
        const SETOFFSET = libc::ADJ_SETOFFSET;
        /// Select microsecond resolution.
        const MICRO = libc::ADJ_MICRO;
        /// Select nanosecond resolution. Only one of MICRO and NANO should be specified.
        const NANO = libc::ADJ_NANO;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: i32 {
        /// Enable phase-locked loop (PLL) updates via ADJ_OFFSET.
        const PLL = libc::STA_PLL;
        /// Enable PPS frequency discipline.
        const PPSFREQ = libc::STA_PPSFREQ;
        /// Enable PPS time discipline.
        const PPSTIME = libc::STA_PPSTIME;
        /// Select frequency-locked loop (FLL) mode.
        const FLL = libc::STA_FLL;
        /// Clock unsynchronized.
        const UNSYNC = libc::STA_UNSYNC;
        /// Hold frequency.
        const FREQHOLD = libc::STA_FREQHOLD;
        /// Clock hardware fault.
        const CLOCKERR = libc::STA_CLOCKERR;
        /// Resolution (0 = microsecond, 1 = nanoseconds).
        const NANO = libc::STA_NANO;
    }
}
