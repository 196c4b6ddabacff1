//! Construction of the numeric request codes taken by `ioctl(2)`.
//!
//! Linux packs a request code from four fields (see `asm-generic/ioctl.h`):
//!
//! ```text
//!  31  30 29                    16 15            8 7             0
//! +------+------------------------+---------------+---------------+
//! | dir  |          size          |     type      |    number     |
//! +------+------------------------+---------------+---------------+
//! ```

/// No data is transferred.
pub const DIR_NONE: u32 = 0b00;
/// Userspace writes, the driver reads.
pub const DIR_WRITE: u32 = 0b01;
/// The driver writes, userspace reads.
pub const DIR_READ: u32 = 0b10;
/// Data flows in both directions.
pub const DIR_READ_WRITE: u32 = DIR_WRITE | DIR_READ;

const NUMBER_BITS: u32 = 8;
const TYPE_BITS: u32 = 8;
const SIZE_BITS: u32 = 14;
const DIR_BITS: u32 = 2;

const NUMBER_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = NUMBER_SHIFT + NUMBER_BITS;
const SIZE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;
const DIR_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;

/// Largest block size that fits in a request code.
pub const MAX_SIZE: usize = (1 << SIZE_BITS) - 1;
/// Largest direction value that fits in a request code.
pub const MAX_DIRECTION: u32 = (1 << DIR_BITS) - 1;

/// Type tag of all requests handled by the PTP clock driver.
pub const PTP_TYPE: u8 = b'=';

/// An `ioctl(2)` request code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlCode(u32);

impl ControlCode {
    /// Pack a request code.
    ///
    /// # Panics
    ///
    /// When `direction` does not fit in 2 bits or `size` does not fit in 14
    /// bits. Both are fixed by the caller's request definition, so a violation
    /// is a bug in that definition.
    pub const fn new(direction: u32, kind: u8, number: u8, size: usize) -> Self {
        assert!(direction <= MAX_DIRECTION, "ioctl direction out of range");
        assert!(size <= MAX_SIZE, "ioctl size out of range");

        Self(
            (direction << DIR_SHIFT)
                | ((size as u32) << SIZE_SHIFT)
                | ((kind as u32) << TYPE_SHIFT)
                | ((number as u32) << NUMBER_SHIFT),
        )
    }

    /// A request code for the PTP clock driver.
    pub const fn ptp(direction: u32, number: u8, size: usize) -> Self {
        Self::new(direction, PTP_TYPE, number, size)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn direction(self) -> u32 {
        (self.0 >> DIR_SHIFT) & MAX_DIRECTION
    }

    pub const fn size(self) -> usize {
        ((self.0 >> SIZE_SHIFT) & ((1 << SIZE_BITS) - 1)) as usize
    }

    pub const fn kind(self) -> u8 {
        (self.0 >> TYPE_SHIFT) as u8
    }

    pub const fn number(self) -> u8 {
        (self.0 >> NUMBER_SHIFT) as u8
    }
}

impl std::fmt::Display for ControlCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// The PTP driver requests, second generation (`PTP_*2`).
///
/// The first generation requests (numbers 1 to 9) are deprecated and do not
/// reject unknown flags, they are not used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    GetCapabilities,
    ExternalTimestamp,
    PeriodicOutput,
    EnablePps,
    SystemOffset,
    PinGetFunction,
    PinSetFunction,
    SystemOffsetPrecise,
    SystemOffsetExtended,
}

impl Request {
    pub const fn number(self) -> u8 {
        match self {
            Request::GetCapabilities => 10,
            Request::ExternalTimestamp => 11,
            Request::PeriodicOutput => 12,
            Request::EnablePps => 13,
            Request::SystemOffset => 14,
            Request::PinGetFunction => 15,
            Request::PinSetFunction => 16,
            Request::SystemOffsetPrecise => 17,
            Request::SystemOffsetExtended => 18,
        }
    }

    pub const fn direction(self) -> u32 {
        match self {
            Request::GetCapabilities => DIR_READ,
            Request::ExternalTimestamp
            | Request::PeriodicOutput
            | Request::EnablePps
            | Request::SystemOffset
            | Request::PinSetFunction => DIR_WRITE,
            Request::PinGetFunction
            | Request::SystemOffsetPrecise
            | Request::SystemOffsetExtended => DIR_READ_WRITE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Request::GetCapabilities => "PTP_CLOCK_GETCAPS2",
            Request::ExternalTimestamp => "PTP_EXTTS_REQUEST2",
            Request::PeriodicOutput => "PTP_PEROUT_REQUEST2",
            Request::EnablePps => "PTP_ENABLE_PPS2",
            Request::SystemOffset => "PTP_SYS_OFFSET2",
            Request::PinGetFunction => "PTP_PIN_GETFUNC2",
            Request::PinSetFunction => "PTP_PIN_SETFUNC2",
            Request::SystemOffsetPrecise => "PTP_SYS_OFFSET_PRECISE2",
            Request::SystemOffsetExtended => "PTP_SYS_OFFSET_EXTENDED2",
        }
    }

    /// The request code for a block of `size` bytes.
    pub const fn code(self, size: usize) -> ControlCode {
        ControlCode::ptp(self.direction(), self.number(), size)
    }

    /// Find the request a code was built for, if any.
    pub fn from_code(code: ControlCode) -> Option<Self> {
        if code.kind() != PTP_TYPE {
            return None;
        }

        [
            Request::GetCapabilities,
            Request::ExternalTimestamp,
            Request::PeriodicOutput,
            Request::EnablePps,
            Request::SystemOffset,
            Request::PinGetFunction,
            Request::PinSetFunction,
            Request::SystemOffsetPrecise,
            Request::SystemOffsetExtended,
        ]
        .into_iter()
        .find(|request| request.number() == code.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_survive_packing() {
        for direction in [DIR_NONE, DIR_WRITE, DIR_READ, DIR_READ_WRITE] {
            for size in [0, 1, 16, 80, 1216, MAX_SIZE] {
                let code = ControlCode::new(direction, b'T', 0xa5, size);
                assert_eq!(code.direction(), direction);
                assert_eq!(code.size(), size);
                assert_eq!(code.kind(), b'T');
                assert_eq!(code.number(), 0xa5);
            }
        }
    }

    #[test]
    fn matches_kernel_constants() {
        // values as produced by the C macros in linux/ptp_clock.h
        assert_eq!(Request::GetCapabilities.code(80).bits(), 0x80503d0a);
        assert_eq!(Request::ExternalTimestamp.code(16).bits(), 0x40103d0b);
        assert_eq!(Request::PeriodicOutput.code(56).bits(), 0x40383d0c);
        assert_eq!(Request::EnablePps.code(4).bits(), 0x40043d0d);
        assert_eq!(Request::SystemOffset.code(832).bits(), 0x43403d0e);
        assert_eq!(Request::PinGetFunction.code(96).bits(), 0xc0603d0f);
        assert_eq!(Request::PinSetFunction.code(96).bits(), 0x40603d10);
        assert_eq!(Request::SystemOffsetPrecise.code(64).bits(), 0xc0403d11);
        assert_eq!(Request::SystemOffsetExtended.code(1216).bits(), 0xc4c03d12);
    }

    #[test]
    fn request_lookup() {
        let code = Request::PinGetFunction.code(96);
        assert_eq!(Request::from_code(code), Some(Request::PinGetFunction));
        assert_eq!(Request::from_code(ControlCode::new(DIR_READ, b'T', 15, 96)), None);
    }

    #[test]
    #[should_panic(expected = "ioctl direction out of range")]
    fn direction_too_large() {
        let _ = ControlCode::new(4, PTP_TYPE, 1, 0);
    }

    #[test]
    #[should_panic(expected = "ioctl size out of range")]
    fn size_too_large() {
        let _ = ControlCode::new(DIR_READ, PTP_TYPE, 1, MAX_SIZE + 1);
    }
}
