//! Byte layouts of the blocks exchanged with the PTP driver.
//!
//! Every block mirrors a struct from `linux/ptp_clock.h`. Integers are
//! little-endian, reserved words are written as zero and skipped when
//! decoding.

use bitflags::bitflags;
use serde::Serialize;

use crate::{time::PtpTime, CodecError, Error};

/// Maximum number of samples of a system offset request (`PTP_MAX_SAMPLES`).
pub const MAX_SAMPLES: u32 = 25;

/// `struct ptp_clock_time`
pub const TIME_LEN: usize = 16;
/// `struct ptp_clock_caps`
pub const CAPABILITIES_LEN: usize = 80;
/// `struct ptp_extts_request`
pub const EXTERNAL_TIMESTAMP_REQUEST_LEN: usize = 16;
/// `struct ptp_extts_event`
pub const EXTERNAL_TIMESTAMP_EVENT_LEN: usize = 32;
/// `struct ptp_pin_desc`
pub const PIN_DESCRIPTOR_LEN: usize = 96;
/// Size of the name buffer in `struct ptp_pin_desc`
pub const PIN_NAME_LEN: usize = 64;
/// `struct ptp_sys_offset`
pub const SYSTEM_OFFSET_LEN: usize = 16 + (2 * MAX_SAMPLES as usize + 1) * TIME_LEN;
/// `struct ptp_sys_offset_extended`
pub const SYSTEM_OFFSET_EXTENDED_LEN: usize = 16 + 3 * MAX_SAMPLES as usize * TIME_LEN;
/// `struct ptp_sys_offset_precise`
pub const SYSTEM_OFFSET_PRECISE_LEN: usize = 3 * TIME_LEN + 16;
/// `struct ptp_perout_request`, the driver copies this much whatever the
/// encoded block size is
pub const PERIODIC_OUTPUT_REQUEST_LEN: usize = 56;
/// The `int` taken by `PTP_ENABLE_PPS2`
pub const PPS_ENABLE_LEN: usize = 4;

#[derive(Debug, Default)]
pub(crate) struct BlockWriter {
    buf: Vec<u8>,
}

impl BlockWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn time(&mut self, time: PtpTime) -> &mut Self {
        self.buf.extend_from_slice(&time.seconds().to_le_bytes());
        self.buf.extend_from_slice(&time.nanos().to_le_bytes());
        self.reserved(1)
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append `words` zeroed 32 bit words.
    pub(crate) fn reserved(&mut self, words: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + 4 * words, 0);
        self
    }

    /// Zero-fill up to `len` bytes.
    pub(crate) fn pad_to(&mut self, len: usize) -> &mut Self {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
        self
    }

    pub(crate) fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

struct BlockReader<'a> {
    block: &'static str,
    data: &'a [u8],
    offset: usize,
}

impl<'a> BlockReader<'a> {
    fn new(block: &'static str, data: &'a [u8], expected: usize) -> Result<Self, CodecError> {
        if data.len() < expected {
            return Err(CodecError::Truncated {
                block,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            block,
            data,
            offset: 0,
        })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.offset + N;
        let Some(slice) = self.data.get(self.offset..end) else {
            return Err(CodecError::Truncated {
                block: self.block,
                expected: end,
                actual: self.data.len(),
            });
        };

        let mut bytes = [0; N];
        bytes.copy_from_slice(slice);
        self.offset = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.take().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        self.take().map(i32::from_le_bytes)
    }

    fn time(&mut self) -> Result<PtpTime, CodecError> {
        let seconds = i64::from_le_bytes(self.take()?);
        let nanos = self.u32()?;
        self.skip(1)?;
        Ok(PtpTime::new(seconds, nanos))
    }

    fn skip(&mut self, words: usize) -> Result<(), CodecError> {
        for _ in 0..words {
            self.take::<4>()?;
        }
        Ok(())
    }
}

/// What a clock reports about itself, `struct ptp_clock_caps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// Maximum frequency adjustment in parts per billion.
    pub max_frequency_adjustment: i32,
    /// Number of programmable alarms.
    pub alarms: i32,
    /// Number of external time stamp channels.
    pub external_timestamp_channels: i32,
    /// Number of programmable periodic signals.
    pub periodic_outputs: i32,
    /// Whether the clock supports a PPS callback.
    pub pps: bool,
    /// Number of input/output pins.
    pub pins: i32,
    /// Whether the clock supports precise system-device cross timestamps.
    pub cross_timestamping: bool,
    /// Whether the clock supports adjusting its phase. Zero on kernels
    /// before 5.8.
    pub adjust_phase: bool,
    /// Maximum phase adjustment in nanoseconds. Zero on kernels before 6.2.
    pub max_phase_adjustment: i32,
}

impl Capabilities {
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BlockReader::new("capabilities", data, CAPABILITIES_LEN)?;

        Ok(Self {
            max_frequency_adjustment: reader.i32()?,
            alarms: reader.i32()?,
            external_timestamp_channels: reader.i32()?,
            periodic_outputs: reader.i32()?,
            pps: reader.i32()? != 0,
            pins: reader.i32()?,
            cross_timestamping: reader.i32()? != 0,
            adjust_phase: reader.i32()? != 0,
            max_phase_adjustment: reader.i32()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        BlockWriter::with_capacity(CAPABILITIES_LEN)
            .i32(self.max_frequency_adjustment)
            .i32(self.alarms)
            .i32(self.external_timestamp_channels)
            .i32(self.periodic_outputs)
            .i32(self.pps as i32)
            .i32(self.pins)
            .i32(self.cross_timestamping as i32)
            .i32(self.adjust_phase as i32)
            .i32(self.max_phase_adjustment)
            .pad_to(CAPABILITIES_LEN)
            .finish()
    }
}

bitflags! {
    /// Flags of an external timestamp request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExternalTimestampFlags: u32 {
        /// Enable the channel. Without this flag, the request disables it.
        const ENABLE = 1 << 0;
        /// Timestamp rising edges.
        const RISING_EDGE = 1 << 1;
        /// Timestamp falling edges.
        const FALLING_EDGE = 1 << 2;
        /// Honour the edge flags exactly, fail when the hardware cannot.
        const STRICT = 1 << 3;
        /// Timestamp both edges.
        const BOTH_EDGES = Self::RISING_EDGE.bits() | Self::FALLING_EDGE.bits();
    }
}

pub fn encode_external_timestamp_request(channel: u32, flags: ExternalTimestampFlags) -> Vec<u8> {
    BlockWriter::with_capacity(EXTERNAL_TIMESTAMP_REQUEST_LEN)
        .u32(channel)
        .u32(flags.bits())
        .reserved(2)
        .finish()
}

pub fn encode_pps_enable(enabled: bool) -> Vec<u8> {
    BlockWriter::with_capacity(PPS_ENABLE_LEN)
        .i32(enabled as i32)
        .finish()
}

bitflags! {
    /// Flags of a periodic output request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PeriodicOutputFlags: u32 {
        const ONE_SHOT = 1 << 0;
        const DUTY_CYCLE = 1 << 1;
        const PHASE = 1 << 2;
    }
}

/// Configuration of a periodic output signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodicOutputConfig {
    /// The period in which the output fires.
    pub period: PtpTime,
    /// Start toggling at this absolute time. Excludes `phase`.
    pub start: Option<PtpTime>,
    /// Start toggling as soon as possible at an integer multiple of the
    /// period plus this offset. Excludes `start`.
    pub phase: Option<PtpTime>,
    /// The 'on' time of the signal, must be shorter than the period.
    pub duty_cycle: Option<PtpTime>,
    /// Fire only once.
    pub one_shot: bool,
}

/// One element of an encoded periodic output request, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicOutputField {
    Start(PtpTime),
    Phase(PtpTime),
    Period(PtpTime),
    Channel(u32),
    Flags(PeriodicOutputFlags),
    DutyCycle(PtpTime),
    /// Reserved 32 bit words.
    Reserved(usize),
}

impl PeriodicOutputField {
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Start(_) | Self::Phase(_) | Self::Period(_) | Self::DutyCycle(_) => TIME_LEN,
            Self::Channel(_) | Self::Flags(_) => 4,
            Self::Reserved(words) => 4 * words,
        }
    }

    fn write(&self, writer: &mut BlockWriter) {
        match *self {
            Self::Start(time) | Self::Phase(time) | Self::Period(time) | Self::DutyCycle(time) => {
                writer.time(time);
            }
            Self::Channel(channel) => {
                writer.u32(channel);
            }
            Self::Flags(flags) => {
                writer.u32(flags.bits());
            }
            Self::Reserved(words) => {
                writer.reserved(words);
            }
        }
    }
}

impl PeriodicOutputConfig {
    pub fn flags(&self) -> PeriodicOutputFlags {
        let mut flags = PeriodicOutputFlags::empty();
        flags.set(PeriodicOutputFlags::ONE_SHOT, self.one_shot);
        flags.set(PeriodicOutputFlags::DUTY_CYCLE, self.duty_cycle.is_some());
        flags.set(PeriodicOutputFlags::PHASE, self.phase.is_some());
        flags
    }

    /// The request fields for `channel`, in the order they are written.
    pub fn fields(&self, channel: u32) -> Result<Vec<PeriodicOutputField>, Error> {
        if self.start.is_some() && self.phase.is_some() {
            return Err(Error::ConflictingPeriodicOutputStart);
        }

        let optional_leading = [
            self.start.map(PeriodicOutputField::Start),
            self.phase.map(PeriodicOutputField::Phase),
        ];
        let fixed = [
            Some(PeriodicOutputField::Period(self.period)),
            Some(PeriodicOutputField::Channel(channel)),
            Some(PeriodicOutputField::Flags(self.flags())),
        ];
        let trailing = Some(
            self.duty_cycle
                .map_or(PeriodicOutputField::Reserved(4), PeriodicOutputField::DutyCycle),
        );

        Ok(optional_leading
            .into_iter()
            .chain(fixed)
            .chain(std::iter::once(trailing))
            .flatten()
            .collect())
    }

    pub fn encode(&self, channel: u32) -> Result<Vec<u8>, Error> {
        let fields = self.fields(channel)?;
        let mut writer = BlockWriter::with_capacity(fields.iter().map(|f| f.wire_len()).sum());
        for field in &fields {
            field.write(&mut writer);
        }
        Ok(writer.finish())
    }
}

/// A pair of timestamps read back to back from the system clock and the PHC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemOffset {
    pub system: PtpTime,
    pub phc: PtpTime,
}

/// A PHC timestamp bracketed by two system clock timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemOffsetExtended {
    pub system1: PtpTime,
    pub phc: PtpTime,
    pub system2: PtpTime,
}

/// A cross timestamp taken by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemOffsetPrecise {
    pub device: PtpTime,
    pub system_realtime: PtpTime,
    pub system_monotonic_raw: PtpTime,
}

fn check_samples(samples: u32) -> Result<(), Error> {
    if samples > MAX_SAMPLES {
        return Err(Error::TooManySamples {
            requested: samples,
            max: MAX_SAMPLES,
        });
    }
    Ok(())
}

fn read_sample_count(reader: &mut BlockReader<'_>) -> Result<u32, CodecError> {
    let count = reader.u32()?;
    reader.skip(3)?;
    if count > MAX_SAMPLES {
        return Err(CodecError::SampleCount {
            count,
            max: MAX_SAMPLES,
        });
    }
    Ok(count)
}

pub fn encode_system_offset_request(samples: u32) -> Result<Vec<u8>, Error> {
    check_samples(samples)?;
    Ok(BlockWriter::with_capacity(SYSTEM_OFFSET_LEN)
        .u32(samples)
        .pad_to(SYSTEM_OFFSET_LEN)
        .finish())
}

/// Decodes `n_samples` pairs out of the `2 * n_samples + 1` timestamps.
pub fn decode_system_offset(data: &[u8]) -> Result<Vec<SystemOffset>, CodecError> {
    let mut reader = BlockReader::new("system offset", data, SYSTEM_OFFSET_LEN)?;
    let count = read_sample_count(&mut reader)?;

    let mut samples = Vec::with_capacity(count as usize);
    for _ in 0..count {
        samples.push(SystemOffset {
            system: reader.time()?,
            phc: reader.time()?,
        });
    }
    // the closing system timestamp
    reader.time()?;

    Ok(samples)
}

pub fn encode_system_offset_extended_request(samples: u32) -> Result<Vec<u8>, Error> {
    check_samples(samples)?;
    Ok(BlockWriter::with_capacity(SYSTEM_OFFSET_EXTENDED_LEN)
        .u32(samples)
        .pad_to(SYSTEM_OFFSET_EXTENDED_LEN)
        .finish())
}

pub fn decode_system_offset_extended(
    data: &[u8],
) -> Result<Vec<SystemOffsetExtended>, CodecError> {
    let mut reader = BlockReader::new(
        "extended system offset",
        data,
        SYSTEM_OFFSET_EXTENDED_LEN,
    )?;
    let count = read_sample_count(&mut reader)?;

    let mut samples = Vec::with_capacity(count as usize);
    for _ in 0..count {
        samples.push(SystemOffsetExtended {
            system1: reader.time()?,
            phc: reader.time()?,
            system2: reader.time()?,
        });
    }

    Ok(samples)
}

pub fn encode_system_offset_precise_request() -> Vec<u8> {
    vec![0; SYSTEM_OFFSET_PRECISE_LEN]
}

pub fn decode_system_offset_precise(data: &[u8]) -> Result<SystemOffsetPrecise, CodecError> {
    let mut reader = BlockReader::new(
        "precise system offset",
        data,
        SYSTEM_OFFSET_PRECISE_LEN,
    )?;

    Ok(SystemOffsetPrecise {
        device: reader.time()?,
        system_realtime: reader.time()?,
        system_monotonic_raw: reader.time()?,
    })
}

/// What a pin is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PinFunction {
    #[default]
    None,
    ExternalTimestamp,
    PeriodicOutput,
    PhaseSync,
    /// A function this crate does not know about.
    Unknown(u32),
}

impl PinFunction {
    pub fn to_bits(self) -> u32 {
        match self {
            PinFunction::None => 0,
            PinFunction::ExternalTimestamp => 1,
            PinFunction::PeriodicOutput => 2,
            PinFunction::PhaseSync => 3,
            PinFunction::Unknown(bits) => bits,
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        match bits {
            0 => PinFunction::None,
            1 => PinFunction::ExternalTimestamp,
            2 => PinFunction::PeriodicOutput,
            3 => PinFunction::PhaseSync,
            other => PinFunction::Unknown(other),
        }
    }
}

/// `struct ptp_pin_desc`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PinDescriptor {
    pub name: String,
    pub index: u32,
    pub function: PinFunction,
    pub channel: u32,
}

impl PinDescriptor {
    /// Longer names are truncated so the buffer stays NUL terminated.
    pub fn encode(&self) -> Vec<u8> {
        let mut name = [0u8; PIN_NAME_LEN];
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(PIN_NAME_LEN - 1);
        name[..len].copy_from_slice(&bytes[..len]);

        BlockWriter::with_capacity(PIN_DESCRIPTOR_LEN)
            .bytes(&name)
            .u32(self.index)
            .u32(self.function.to_bits())
            .u32(self.channel)
            .reserved(5)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BlockReader::new("pin descriptor", data, PIN_DESCRIPTOR_LEN)?;

        let name: [u8; PIN_NAME_LEN] = reader.take()?;
        let end = name.iter().position(|&b| b == 0).unwrap_or(PIN_NAME_LEN);

        Ok(Self {
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
            index: reader.u32()?,
            function: PinFunction::from_bits(reader.u32()?),
            channel: reader.u32()?,
        })
    }
}

/// A timestamp the hardware took of an edge on an external timestamp
/// channel, `struct ptp_extts_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExternalTimestampEvent {
    pub timestamp: PtpTime,
    pub channel: u32,
    /// Which edge was seen, only filled in by some drivers.
    pub flags: u32,
}

impl ExternalTimestampEvent {
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BlockReader::new(
            "external timestamp event",
            data,
            EXTERNAL_TIMESTAMP_EVENT_LEN,
        )?;

        Ok(Self {
            timestamp: reader.time()?,
            channel: reader.u32()?,
            flags: reader.u32()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        BlockWriter::with_capacity(EXTERNAL_TIMESTAMP_EVENT_LEN)
            .time(self.timestamp)
            .u32(self.channel)
            .u32(self.flags)
            .reserved(2)
            .finish()
    }
}
