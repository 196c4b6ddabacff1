use std::{
    collections::HashMap,
    fs,
    os::unix::io::AsRawFd,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    thread::JoinHandle,
};

use tracing::debug;

use crate::{
    device::{clock_name_path, device_path, CharDevice, DeviceHandle, PtpDevice},
    events::{self, lock_slot, CallbackSlot, EventCallback},
    ioctl::Request,
    pin::Pin,
    posix::PosixClock,
    time::PtpTime,
    timex::Timex,
    wire::{
        self, Capabilities, ExternalTimestampFlags, PeriodicOutputConfig, SystemOffset,
        SystemOffsetExtended, SystemOffsetPrecise, CAPABILITIES_LEN, PERIODIC_OUTPUT_REQUEST_LEN,
    },
    Error,
};

/// A PTP hardware clock.
///
/// The clock can be shared between threads. External timestamp events are
/// read on a dedicated thread and handed to the callback registered with
/// [`PtpClock::on_external_timestamp_event`].
pub struct PtpClock<D: PtpDevice = CharDevice> {
    device: Arc<DeviceHandle<D>>,
    capabilities: Capabilities,
    name: String,
    callback: CallbackSlot,
    pins: Mutex<HashMap<u32, Arc<Pin<D>>>>,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl<D: PtpDevice + std::fmt::Debug> std::fmt::Debug for PtpClock<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtpClock")
            .field("device", &self.device)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl PtpClock<CharDevice> {
    /// Open `/dev/ptp{index}`.
    pub fn open(index: u32) -> Result<Self, Error> {
        Self::open_paths(device_path(index), clock_name_path(index))
    }

    /// Open the character device at `device`, reading the clock name from
    /// `name`.
    pub fn open_paths(device: impl AsRef<Path>, name: impl AsRef<Path>) -> Result<Self, Error> {
        let path = device.as_ref();
        let device = CharDevice::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "opened PTP device");
        Self::from_device(device, name)
    }
}

impl<D: PtpDevice> PtpClock<D> {
    /// Take over an already opened device. The capabilities are queried and
    /// the event loop is started before this returns.
    pub fn from_device(device: D, name: impl AsRef<Path>) -> Result<Self, Error> {
        let mut buf = [0u8; CAPABILITIES_LEN];
        device
            .control(Request::GetCapabilities.code(CAPABILITIES_LEN), &mut buf)
            .map_err(Error::CapabilityQuery)?;
        let capabilities = Capabilities::decode(&buf)?;

        let name_path = name.as_ref();
        let name = fs::read_to_string(name_path)
            .map_err(|source| Error::NameRead {
                path: name_path.to_path_buf(),
                source,
            })?
            .trim_matches(['\n', '\0'])
            .to_owned();

        let device = Arc::new(device);
        let callback: CallbackSlot = Arc::new(Mutex::new(None));
        let events =
            events::spawn(Arc::downgrade(&device), callback.clone()).map_err(Error::EventLoop)?;

        debug!(%name, ?capabilities, "PTP clock ready");

        Ok(Self {
            device: Arc::new(DeviceHandle::new(device)),
            capabilities,
            name,
            callback,
            pins: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(events)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Maximum frequency adjustment in parts per billion.
    pub fn max_frequency_adjustment(&self) -> i32 {
        self.capabilities.max_frequency_adjustment
    }

    pub fn alarms(&self) -> i32 {
        self.capabilities.alarms
    }

    pub fn external_timestamp_channels(&self) -> i32 {
        self.capabilities.external_timestamp_channels
    }

    pub fn periodic_outputs(&self) -> i32 {
        self.capabilities.periodic_outputs
    }

    pub fn pps_supported(&self) -> bool {
        self.capabilities.pps
    }

    /// Number of programmable pins.
    pub fn pins(&self) -> i32 {
        self.capabilities.pins
    }

    pub fn cross_timestamping_supported(&self) -> bool {
        self.capabilities.cross_timestamping
    }

    pub fn adjust_phase_supported(&self) -> bool {
        self.capabilities.adjust_phase
    }

    /// Maximum phase adjustment in nanoseconds.
    pub fn max_phase_adjustment(&self) -> i32 {
        self.capabilities.max_phase_adjustment
    }

    pub fn set_pps_enabled(&self, enabled: bool) -> Result<(), Error> {
        let mut buf = wire::encode_pps_enable(enabled);
        self.device.control(Request::EnablePps, &mut buf)
    }

    /// Start timestamping edges on `channel`. `flags` should contain
    /// [`ExternalTimestampFlags::ENABLE`], without it the request disables
    /// the channel.
    pub fn request_external_timestamp(
        &self,
        channel: u32,
        flags: ExternalTimestampFlags,
    ) -> Result<(), Error> {
        let mut buf = wire::encode_external_timestamp_request(channel, flags);
        self.device.control(Request::ExternalTimestamp, &mut buf)
    }

    pub fn disable_external_timestamp(&self, channel: u32) -> Result<(), Error> {
        self.request_external_timestamp(channel, ExternalTimestampFlags::empty())
    }

    /// Program periodic output `channel`.
    ///
    /// Fails without contacting the driver when both a start time and a
    /// phase are set.
    pub fn configure_periodic_output(
        &self,
        channel: u32,
        config: &PeriodicOutputConfig,
    ) -> Result<(), Error> {
        let mut buf = config.encode(channel)?;
        let size = buf.len();
        buf.resize(size.max(PERIODIC_OUTPUT_REQUEST_LEN), 0);
        self.device.control_sized(Request::PeriodicOutput, size, &mut buf)
    }

    /// Stop periodic output `channel` by programming a zero period.
    pub fn disable_periodic_output(&self, channel: u32) -> Result<(), Error> {
        self.configure_periodic_output(channel, &PeriodicOutputConfig::default())
    }

    /// The pin with `index`. The descriptor is read from the driver the first
    /// time a pin is asked for, later calls return the same handle.
    pub fn pin(&self, index: u32) -> Result<Arc<Pin<D>>, Error> {
        let pins = self.capabilities.pins.max(0) as u32;
        if index >= pins {
            return Err(Error::PinOutOfRange { index, pins });
        }

        // closed clocks hand out no pins, cached or not
        self.device.get()?;

        let mut cache = lock(&self.pins);
        if let Some(pin) = cache.get(&index) {
            return Ok(pin.clone());
        }

        let pin = Arc::new(Pin::read(self.device.clone(), index)?);
        cache.insert(index, pin.clone());
        Ok(pin)
    }

    /// Read the system clock and the PHC alternately, `samples` pairs.
    pub fn system_offset(&self, samples: u32) -> Result<Vec<SystemOffset>, Error> {
        let mut buf = wire::encode_system_offset_request(samples)?;
        self.device.control(Request::SystemOffset, &mut buf)?;
        Ok(wire::decode_system_offset(&buf)?)
    }

    /// Like [`PtpClock::system_offset`], with the PHC reading taken by the
    /// driver between two system clock readings.
    pub fn system_offset_extended(&self, samples: u32) -> Result<Vec<SystemOffsetExtended>, Error> {
        let mut buf = wire::encode_system_offset_extended_request(samples)?;
        self.device.control(Request::SystemOffsetExtended, &mut buf)?;
        Ok(wire::decode_system_offset_extended(&buf)?)
    }

    /// A cross timestamp taken by the hardware, only available when
    /// [`PtpClock::cross_timestamping_supported`].
    pub fn system_offset_precise(&self) -> Result<SystemOffsetPrecise, Error> {
        let mut buf = wire::encode_system_offset_precise_request();
        self.device.control(Request::SystemOffsetPrecise, &mut buf)?;
        Ok(wire::decode_system_offset_precise(&buf)?)
    }

    /// Replace the event callback. `None` stops delivery, events read in the
    /// meantime are dropped.
    pub fn on_external_timestamp_event(&self, callback: Option<EventCallback>) {
        *lock_slot(&self.callback) = callback;
    }

    /// Whether the event thread is still reading events.
    pub fn event_loop_running(&self) -> bool {
        lock(&self.events)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The POSIX clock id of the device.
    ///
    /// The id refers to the descriptor of the open device and must not be used
    /// after the clock was closed.
    pub fn posix_clock(&self) -> Result<PosixClock, Error> {
        let device = self.device.get()?;
        Ok(PosixClock::from_file_descriptor(device.as_raw_fd()))
    }

    fn with_posix_clock<T>(
        &self,
        f: impl FnOnce(PosixClock) -> Result<T, Error>,
    ) -> Result<T, Error> {
        // keeps the descriptor open until the syscall returned
        let device = self.device.get()?;
        f(PosixClock::from_file_descriptor(device.as_raw_fd()))
    }

    pub fn time(&self) -> Result<PtpTime, Error> {
        self.with_posix_clock(|clock| clock.now())
    }

    pub fn set_time(&self, time: PtpTime) -> Result<(), Error> {
        self.with_posix_clock(|clock| clock.set(time))
    }

    /// `clock_adjtime` on the device, returns the clock state.
    pub fn adjust_time(&self, timex: &mut Timex) -> Result<libc::c_int, Error> {
        self.with_posix_clock(|clock| clock.adjtime(timex))
    }

    /// Run the clock `ppb` parts per billion faster (or slower when negative).
    pub fn adjust_frequency(&self, ppb: f64) -> Result<(), Error> {
        self.adjust_time(&mut Timex::frequency_ppb(ppb)).map(drop)
    }

    /// Gradually move the clock `nanos` forward (or back when negative).
    pub fn adjust_offset(&self, nanos: i64) -> Result<(), Error> {
        self.adjust_time(&mut Timex::offset_nanos(nanos)).map(drop)
    }

    /// Release the device. Every later call fails with
    /// [`Error::HandleClosed`].
    ///
    /// This does not wait for the event thread. The thread notices the
    /// release within one wait interval and the device is closed once it let
    /// go of it.
    pub fn close(&self) {
        if self.device.release().is_some() {
            debug!(name = %self.name, "PTP clock closed");
        }
    }
}

impl<D: PtpDevice> Drop for PtpClock<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::mpsc, time::Duration};

    use super::*;
    use crate::{
        simulated::{device_time, system_time, EventFeed, SimulatedDevice},
        wire::{ExternalTimestampEvent, PeriodicOutputFlags, PinFunction, TIME_LEN},
    };

    fn capabilities() -> Capabilities {
        Capabilities {
            max_frequency_adjustment: 100_000_000,
            alarms: 0,
            external_timestamp_channels: 2,
            periodic_outputs: 1,
            pps: true,
            pins: 3,
            cross_timestamping: false,
            adjust_phase: false,
            max_phase_adjustment: 0,
        }
    }

    fn name_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    fn simulated() -> (PtpClock<SimulatedDevice>, EventFeed) {
        let (device, feed) = SimulatedDevice::with_pin_count(capabilities()).unwrap();
        let name = name_file(b"sim clock\n");
        (PtpClock::from_device(device, name.path()).unwrap(), feed)
    }

    fn with_device<T>(
        clock: &PtpClock<SimulatedDevice>,
        f: impl FnOnce(&SimulatedDevice) -> T,
    ) -> T {
        let device = clock.device.get().unwrap();
        f(&device)
    }

    #[test]
    fn open_reads_capabilities_and_name() {
        let (clock, _feed) = simulated();

        assert_eq!(clock.name(), "sim clock");
        assert_eq!(clock.max_frequency_adjustment(), 100_000_000);
        assert_eq!(clock.external_timestamp_channels(), 2);
        assert_eq!(clock.periodic_outputs(), 1);
        assert_eq!(clock.pins(), 3);
        assert!(clock.pps_supported());
        assert!(!clock.cross_timestamping_supported());
        assert!(clock.event_loop_running());

        with_device(&clock, |device| {
            let calls = device.calls();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].request, Some(Request::GetCapabilities));
            assert_eq!(calls[0].code.bits(), 0x80503d0a);
        });
    }

    #[test]
    fn name_is_trimmed() {
        let (device, _feed) = SimulatedDevice::with_pin_count(capabilities()).unwrap();
        let name = name_file(b"\0ice\n\0");
        let clock = PtpClock::from_device(device, name.path()).unwrap();
        assert_eq!(clock.name(), "ice");
    }

    #[test]
    fn failing_capability_query() {
        let (device, _feed) = SimulatedDevice::with_pin_count(capabilities()).unwrap();
        device.fail(Request::GetCapabilities, libc::ENODEV);
        let name = name_file(b"x");

        let err = PtpClock::from_device(device, name.path()).unwrap_err();
        assert!(matches!(err, Error::CapabilityQuery(_)));
        assert_eq!(err.errno(), Some(libc::ENODEV));
    }

    #[test]
    fn missing_name() {
        let (device, _feed) = SimulatedDevice::with_pin_count(capabilities()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = PtpClock::from_device(device, dir.path().join("clock_name")).unwrap_err();
        assert!(matches!(err, Error::NameRead { .. }));
    }

    #[test]
    fn missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let err = PtpClock::open_paths(dir.path().join("ptp9"), dir.path().join("name"))
            .unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[test]
    fn control_calls() {
        let (clock, _feed) = simulated();

        clock.set_pps_enabled(true).unwrap();
        clock
            .request_external_timestamp(1, ExternalTimestampFlags::ENABLE | ExternalTimestampFlags::BOTH_EDGES)
            .unwrap();
        clock.disable_external_timestamp(1).unwrap();

        with_device(&clock, |device| {
            let pps = device.calls_of(Request::EnablePps);
            assert_eq!(pps[0].data, [1, 0, 0, 0]);
            assert_eq!(pps[0].code.bits(), 0x40043d0d);

            let extts = device.calls_of(Request::ExternalTimestamp);
            assert_eq!(extts.len(), 2);
            assert_eq!(&extts[0].data[..8], [1, 0, 0, 0, 7, 0, 0, 0]);
            assert_eq!(&extts[1].data[..8], [1, 0, 0, 0, 0, 0, 0, 0]);
        });


        with_device(&clock, |device| device.fail(Request::EnablePps, libc::EPERM));
        let err = clock.set_pps_enabled(false).unwrap_err();
        assert!(matches!(
            err,
            Error::ControlCall {
                request: "PTP_ENABLE_PPS2",
                ..
            }
        ));
        assert_eq!(err.errno(), Some(libc::EPERM));
    }

    #[test]
    fn periodic_output() {
        let (clock, _feed) = simulated();

        let config = PeriodicOutputConfig {
            period: PtpTime::new(1, 0),
            phase: Some(PtpTime::new(0, 500)),
            duty_cycle: Some(PtpTime::new(0, 100_000_000)),
            ..Default::default()
        };
        clock.configure_periodic_output(0, &config).unwrap();

        let conflicting = PeriodicOutputConfig {
            start: Some(PtpTime::new(10, 0)),
            ..config
        };
        assert!(matches!(
            clock.configure_periodic_output(0, &conflicting),
            Err(Error::ConflictingPeriodicOutputStart)
        ));

        clock.disable_periodic_output(0).unwrap();

        with_device(&clock, |device| {
            let calls = device.calls_of(Request::PeriodicOutput);
            assert_eq!(calls.len(), 2);

            let enable = &calls[0];
            assert_eq!(enable.data.len(), 3 * TIME_LEN + 8);
            assert_eq!(enable.code.size(), enable.data.len());
            let flags = u32::from_le_bytes(enable.data[36..40].try_into().unwrap());
            assert_eq!(
                PeriodicOutputFlags::from_bits(flags),
                Some(PeriodicOutputFlags::PHASE | PeriodicOutputFlags::DUTY_CYCLE)
            );

            // the driver copies a whole ptp_perout_request, whatever the size
            let disable = &calls[1];
            assert_eq!(disable.code.size(), TIME_LEN + 8 + 16);
            assert_eq!(disable.data.len(), PERIODIC_OUTPUT_REQUEST_LEN);
            assert!(disable.data.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn pins_are_cached() {
        let (clock, _feed) = simulated();

        let pin = clock.pin(1).unwrap();
        assert_eq!(pin.name(), "pin1");
        assert!(Arc::ptr_eq(&pin, &clock.pin(1).unwrap()));

        pin.set_function(PinFunction::ExternalTimestamp, 1).unwrap();
        assert_eq!(clock.pin(1).unwrap().function(), PinFunction::ExternalTimestamp);

        with_device(&clock, |device| {
            // one read on creation, one after the update
            assert_eq!(device.calls_of(Request::PinGetFunction).len(), 2);
        });
    }

    #[test]
    fn out_of_range_pin_is_not_cached() {
        let (clock, _feed) = simulated();
        clock.pin(0).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                clock.pin(5),
                Err(Error::PinOutOfRange { index: 5, pins: 3 })
            ));
        }

        assert_eq!(lock(&clock.pins).len(), 1);
        assert!(!lock(&clock.pins).contains_key(&5));
        with_device(&clock, |device| {
            assert_eq!(device.calls_of(Request::PinGetFunction).len(), 1);
        });
    }

    #[test]
    fn system_offsets() {
        let (clock, _feed) = simulated();

        let samples = clock.system_offset(5).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4].system, system_time(4));
        assert_eq!(samples[4].phc, device_time(4));

        let extended = clock.system_offset_extended(3).unwrap();
        assert_eq!(extended.len(), 3);
        assert_eq!(extended[0].system2, system_time(1));

        let precise = clock.system_offset_precise().unwrap();
        assert_eq!(precise.device, device_time(0));

        assert!(clock.system_offset(0).unwrap().is_empty());

        let calls_before = with_device(&clock, |device| device.calls().len());
        assert!(matches!(
            clock.system_offset(26),
            Err(Error::TooManySamples {
                requested: 26,
                max: 25
            })
        ));
        assert!(matches!(
            clock.system_offset_extended(100),
            Err(Error::TooManySamples { .. })
        ));
        assert_eq!(with_device(&clock, |device| device.calls().len()), calls_before);
    }

    #[test]
    fn events_reach_callback() {
        let (clock, feed) = simulated();
        let (sender, received) = mpsc::channel();
        clock.on_external_timestamp_event(Some(Box::new(move |channel: u32, timestamp: PtpTime| {
            let _ = sender.send((channel, timestamp));
        })));

        for seconds in 0..5 {
            feed.send(&ExternalTimestampEvent {
                timestamp: PtpTime::new(seconds, 1),
                channel: 1,
                flags: 0,
            });
        }

        for seconds in 0..5 {
            assert_eq!(
                received.recv_timeout(Duration::from_secs(5)).unwrap(),
                (1, PtpTime::new(seconds, 1))
            );
        }

        clock.on_external_timestamp_event(None);
    }

    #[test]
    fn end_of_events_stops_loop() {
        let (clock, feed) = simulated();
        drop(feed);

        for _ in 0..500 {
            if !clock.event_loop_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!clock.event_loop_running());

        // the clock itself stays usable
        clock.set_pps_enabled(false).unwrap();
    }

    #[test]
    fn time_calls_reach_the_descriptor() {
        let (clock, _feed) = simulated();

        // the simulated device is backed by /dev/null, which is not a clock
        let err = clock.time().unwrap_err();
        assert!(matches!(err, Error::ClockSyscall { call: "clock_gettime", .. }));
        assert!(err.errno().is_some());

        let posix = clock.posix_clock().unwrap();
        assert_eq!(
            posix.file_descriptor(),
            Some(with_device(&clock, |device| device.as_raw_fd()))
        );

        assert!(matches!(
            clock.adjust_frequency(12.5),
            Err(Error::ClockSyscall {
                call: "clock_adjtime",
                ..
            })
        ));
    }

    #[test]
    fn closed_clock() {
        let (clock, _feed) = simulated();
        let pin = clock.pin(0).unwrap();
        clock.close();

        assert!(matches!(clock.set_pps_enabled(true), Err(Error::HandleClosed)));
        assert!(matches!(clock.system_offset(1), Err(Error::HandleClosed)));
        assert!(matches!(clock.time(), Err(Error::HandleClosed)));
        assert!(matches!(clock.posix_clock(), Err(Error::HandleClosed)));
        assert!(matches!(clock.pin(0), Err(Error::HandleClosed)));
        assert!(matches!(
            pin.set_function(PinFunction::PeriodicOutput, 0),
            Err(Error::HandleClosed)
        ));

        // getters keep working, the pin stays known
        assert_eq!(clock.name(), "sim clock");
        assert_eq!(clock.pins(), 3);
        assert!(lock(&clock.pins).contains_key(&0));

        clock.close();
    }

    fn open_shared() -> (PtpClock<Arc<SimulatedDevice>>, Arc<SimulatedDevice>, EventFeed) {
        let (device, feed) = SimulatedDevice::with_pin_count(capabilities()).unwrap();
        let device = Arc::new(device);
        let name = name_file(b"shared\n");
        let clock = PtpClock::from_device(device.clone(), name.path()).unwrap();
        (clock, device, feed)
    }

    fn wait_for_release(device: &Arc<SimulatedDevice>) {
        for _ in 0..500 {
            if Arc::strong_count(device) == 1 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("device still held, strong count {}", Arc::strong_count(device));
    }

    #[test]
    fn close_releases_idle_device() {
        // no event is ever fed
        let (clock, device, _feed) = open_shared();
        assert!(clock.event_loop_running());

        clock.close();
        wait_for_release(&device);

        for _ in 0..500 {
            if !clock.event_loop_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!clock.event_loop_running());
    }

    #[test]
    fn drop_releases_device() {
        let (clock, device, _feed) = open_shared();
        let pin = clock.pin(2).unwrap();

        drop(clock);
        wait_for_release(&device);
        assert!(matches!(
            pin.set_function(PinFunction::None, 0),
            Err(Error::HandleClosed)
        ));
    }

    #[test]
    #[ignore = "requires /dev/ptp0"]
    fn hardware_clock() {
        let clock = PtpClock::open(0).unwrap();
        assert!(!clock.name().is_empty());
        clock.time().unwrap();
        clock.system_offset(3).unwrap();
        clock.close();
    }
}
