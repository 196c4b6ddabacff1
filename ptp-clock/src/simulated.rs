//! A scripted stand-in for a PTP character device.
//!
//! Answers the capability and pin queries from a fixed table, fills offset
//! measurements with predictable timestamps and records every control call.
//! Event records are fed through an [`EventFeed`]; dropping the feed is seen
//! by the reader as the end of the device.

use std::{
    collections::HashMap,
    fs::File,
    io,
    os::unix::io::{AsRawFd, RawFd},
    sync::{mpsc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    device::PtpDevice,
    ioctl::{ControlCode, Request},
    time::PtpTime,
    wire::{
        BlockWriter, Capabilities, ExternalTimestampEvent, PinDescriptor, MAX_SAMPLES,
        SYSTEM_OFFSET_EXTENDED_LEN, SYSTEM_OFFSET_LEN,
    },
};

/// A control call as seen by the device, after the device answered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub code: ControlCode,
    pub request: Option<Request>,
    /// The buffer as handed in by the caller, it can be longer than the size
    /// in `code`.
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct SimulatedDevice {
    // gives the device a descriptor that is not a clock
    null: File,
    capabilities: Capabilities,
    pins: Mutex<Vec<PinDescriptor>>,
    records: Mutex<mpsc::Receiver<Vec<u8>>>,
    // received while waiting, handed out by the next read
    pending: Mutex<Option<Vec<u8>>>,
    calls: Mutex<Vec<ControlCall>>,
    failures: Mutex<HashMap<u8, i32>>,
}

/// Sending side of the records read by the event loop.
#[derive(Debug, Clone)]
pub struct EventFeed(mpsc::Sender<Vec<u8>>);

impl EventFeed {
    /// Returns false when the device is gone.
    pub fn send(&self, event: &ExternalTimestampEvent) -> bool {
        self.send_raw(event.encode())
    }

    pub fn send_raw(&self, record: Vec<u8>) -> bool {
        self.0.send(record).is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedDevice {
    pub fn new(capabilities: Capabilities, pins: Vec<PinDescriptor>) -> io::Result<(Self, EventFeed)> {
        let (sender, receiver) = mpsc::channel();
        let device = Self {
            null: File::open("/dev/null")?,
            capabilities,
            pins: Mutex::new(pins),
            records: Mutex::new(receiver),
            pending: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        };

        Ok((device, EventFeed(sender)))
    }

    /// A device with `pins` pins named `pin0`, `pin1`...
    pub fn with_pin_count(capabilities: Capabilities) -> io::Result<(Self, EventFeed)> {
        let pins = (0..capabilities.pins.max(0) as u32)
            .map(|index| PinDescriptor {
                name: format!("pin{index}"),
                index,
                ..Default::default()
            })
            .collect();
        Self::new(capabilities, pins)
    }

    /// Make every following `request` fail with `errno`.
    pub fn fail(&self, request: Request, errno: i32) {
        lock(&self.failures).insert(request.number(), errno);
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_of(&self, request: Request) -> Vec<ControlCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.request == Some(request))
            .collect()
    }

    /// The pin table as the device currently sees it.
    pub fn pin_table(&self) -> Vec<PinDescriptor> {
        lock(&self.pins).clone()
    }

    fn answer(&self, request: Request, buf: &mut [u8]) -> io::Result<()> {
        match request {
            Request::GetCapabilities => buf.copy_from_slice(&self.capabilities.encode()),
            Request::PinGetFunction => {
                let index = PinDescriptor::decode(buf).map_err(invalid)?.index;
                let pins = lock(&self.pins);
                let mut pin = pins
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
                pin.index = index;
                buf.copy_from_slice(&pin.encode());
            }
            Request::PinSetFunction => {
                let update = PinDescriptor::decode(buf).map_err(invalid)?;
                let mut pins = lock(&self.pins);
                let pin = pins
                    .get_mut(update.index as usize)
                    .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
                pin.function = update.function;
                pin.channel = update.channel;
            }
            Request::SystemOffset => {
                let samples = requested_samples(buf)?;
                let mut writer = BlockWriter::with_capacity(SYSTEM_OFFSET_LEN);
                writer.u32(samples).reserved(3);
                for i in 0..=samples {
                    writer.time(system_time(i));
                    if i < samples {
                        writer.time(device_time(i));
                    }
                }
                buf.copy_from_slice(&writer.pad_to(SYSTEM_OFFSET_LEN).finish());
            }
            Request::SystemOffsetExtended => {
                let samples = requested_samples(buf)?;
                let mut writer = BlockWriter::with_capacity(SYSTEM_OFFSET_EXTENDED_LEN);
                writer.u32(samples).reserved(3);
                for i in 0..samples {
                    writer
                        .time(system_time(i))
                        .time(device_time(i))
                        .time(system_time(i + 1));
                }
                buf.copy_from_slice(&writer.pad_to(SYSTEM_OFFSET_EXTENDED_LEN).finish());
            }
            Request::SystemOffsetPrecise => {
                let block = BlockWriter::with_capacity(buf.len())
                    .time(device_time(0))
                    .time(system_time(0))
                    .time(PtpTime::new(7, 0))
                    .pad_to(buf.len())
                    .finish();
                buf.copy_from_slice(&block);
            }
            Request::ExternalTimestamp
            | Request::PeriodicOutput
            | Request::EnablePps => {}
        }

        Ok(())
    }
}

/// The system clock reading `i` of a simulated offset measurement.
pub fn system_time(i: u32) -> PtpTime {
    PtpTime::new(1_000 + i as i64, 0)
}

/// The device clock reading `i` of a simulated offset measurement.
pub fn device_time(i: u32) -> PtpTime {
    PtpTime::new(2_000 + i as i64, 500)
}

fn requested_samples(buf: &[u8]) -> io::Result<u32> {
    let mut count = [0; 4];
    count.copy_from_slice(&buf[..4]);
    match u32::from_le_bytes(count) {
        samples @ 0..=MAX_SAMPLES => Ok(samples),
        _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
    }
}

fn invalid(e: crate::CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e)
}

impl PtpDevice for SimulatedDevice {
    fn control(&self, code: ControlCode, buf: &mut [u8]) -> io::Result<()> {
        let data = buf.to_vec();
        let request = Request::from_code(code);
        lock(&self.calls).push(ControlCall {
            code,
            request,
            data,
        });

        let Some(request) = request else {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        };

        if let Some(errno) = lock(&self.failures).get(&request.number()) {
            return Err(io::Error::from_raw_os_error(*errno));
        }

        self.answer(request, buf)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pending = lock(&self.pending);
        if pending.is_some() {
            return Ok(true);
        }

        match lock(&self.records).recv_timeout(timeout) {
            Ok(record) => {
                *pending = Some(record);
                Ok(true)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(false),
            // the read reports the end of the device
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(true),
        }
    }

    fn read_record(&self, buf: &mut [u8]) -> io::Result<()> {
        let pending = lock(&self.pending).take();
        let record = match pending {
            Some(record) => record,
            None => lock(&self.records)
                .recv()
                .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?,
        };

        if record.len() < buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        buf.copy_from_slice(&record[..buf.len()]);

        Ok(())
    }
}

impl AsRawFd for SimulatedDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.null.as_raw_fd()
    }
}
