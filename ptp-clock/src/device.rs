// Note on unsafe usage.
//
// This module uses unsafe code to issue ioctl calls on the PTP character
// device and to poll it for events. The buffer handed to the kernel is
// always a live, exclusively borrowed slice at least as long as the size
// encoded in the request code. Requests for which the driver copies a fixed
// struct size regardless of that code (`PTP_PEROUT_REQUEST2`) are backed by a
// zero padded buffer of the full struct size.

use std::{
    fs::File,
    io::{self, Read},
    os::unix::io::{AsRawFd, RawFd},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

use tracing::trace;

use crate::{
    ioctl::{ControlCode, Request},
    Error,
};

/// Default location of the character device of PTP clock `index`.
pub fn device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/ptp{index}"))
}

/// Default location of the name of PTP clock `index`.
pub fn clock_name_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/sys/class/ptp/ptp{index}/clock_name"))
}

/// A transport to a PTP clock driver.
///
/// Control calls and record reads may happen concurrently from different
/// threads. The event loop waits in [`PtpDevice::wait_readable`] with a
/// timeout and only reads once a record is available, so it never holds the
/// device for longer than one timeout after the clock was closed.
pub trait PtpDevice: AsRawFd + Send + Sync + 'static {
    /// Issue a control call. The size encoded in `code` is at most
    /// `buf.len()`.
    fn control(&self, code: ControlCode, buf: &mut [u8]) -> io::Result<()>;

    /// Wait up to `timeout` for a record (or an error condition) to become
    /// available. Returns false on timeout.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Block until one record of exactly `buf.len()` bytes was read.
    fn read_record(&self, buf: &mut [u8]) -> io::Result<()>;
}

/// The character device of a PTP clock, e.g. `/dev/ptp0`.
#[derive(Debug)]
pub struct CharDevice {
    file: File,
}

impl CharDevice {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

/// Turn a C failure (-1 is returned) into a rust Result
pub(crate) fn cerr(t: libc::c_int) -> io::Result<libc::c_int> {
    match t {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(t),
    }
}

impl PtpDevice for CharDevice {
    fn control(&self, code: ControlCode, buf: &mut [u8]) -> io::Result<()> {
        debug_assert!(code.size() <= buf.len());

        // Safety:
        // the file is open for the lifetime of self, so the descriptor is valid.
        // buf is borrowed mutably for the duration of the call and is at least
        // the size the request code tells the driver to read and write.
        cerr(unsafe { libc::ioctl(self.file.as_raw_fd(), code.bits() as _, buf.as_mut_ptr()) })?;

        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut poll_fd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // Safety:
        // poll_fd is a single valid pollfd that outlives the call, matching
        // the count of 1.
        match cerr(unsafe { libc::poll(&mut poll_fd, 1, timeout) }) {
            Ok(0) => Ok(false),
            // POLLERR and POLLHUP are reported by the read that follows
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_record(&self, buf: &mut [u8]) -> io::Result<()> {
        (&self.file).read_exact(buf)
    }
}

impl<D: PtpDevice> PtpDevice for Arc<D> {
    fn control(&self, code: ControlCode, buf: &mut [u8]) -> io::Result<()> {
        (**self).control(code, buf)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn read_record(&self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_record(buf)
    }
}

impl AsRawFd for CharDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<File> for CharDevice {
    fn from(file: File) -> Self {
        Self { file }
    }
}

/// The open device shared by a clock and its pins. Once released, every
/// further call fails with [`Error::HandleClosed`].
#[derive(Debug)]
pub(crate) struct DeviceHandle<D> {
    device: RwLock<Option<Arc<D>>>,
}

impl<D: PtpDevice> DeviceHandle<D> {
    pub(crate) fn new(device: Arc<D>) -> Self {
        Self {
            device: RwLock::new(Some(device)),
        }
    }

    pub(crate) fn get(&self) -> Result<Arc<D>, Error> {
        let device = self.device.read().unwrap_or_else(|e| e.into_inner());
        device.clone().ok_or(Error::HandleClosed)
    }

    /// Drop the shared reference, the device is closed as soon as calls
    /// still in flight have finished.
    pub(crate) fn release(&self) -> Option<Arc<D>> {
        self.device.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub(crate) fn control(&self, request: Request, buf: &mut [u8]) -> Result<(), Error> {
        self.control_sized(request, buf.len(), buf)
    }

    /// Like [`DeviceHandle::control`], encoding `size` in the request code
    /// instead of the length of `buf`.
    pub(crate) fn control_sized(
        &self,
        request: Request,
        size: usize,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let device = self.get()?;
        let code = request.code(size);
        trace!(request = request.name(), %code, "control call");

        device.control(code, buf).map_err(|source| Error::ControlCall {
            request: request.name(),
            source,
        })
    }
}
