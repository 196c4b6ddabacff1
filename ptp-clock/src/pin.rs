use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::{
    device::{CharDevice, DeviceHandle, PtpDevice},
    ioctl::Request,
    wire::{PinDescriptor, PinFunction},
    Error,
};

/// An input/output pin of a PTP clock.
///
/// The getters return the descriptor as last read from the driver.
#[derive(Debug)]
pub struct Pin<D: PtpDevice = CharDevice> {
    device: Arc<DeviceHandle<D>>,
    descriptor: Mutex<PinDescriptor>,
}

fn fetch<D: PtpDevice>(device: &DeviceHandle<D>, index: u32) -> Result<PinDescriptor, Error> {
    let query = PinDescriptor {
        index,
        ..Default::default()
    };

    let mut buf = query.encode();
    device.control(Request::PinGetFunction, &mut buf)?;

    let mut descriptor = PinDescriptor::decode(&buf)?;
    descriptor.index = index;
    Ok(descriptor)
}

impl<D: PtpDevice> Pin<D> {
    pub(crate) fn read(device: Arc<DeviceHandle<D>>, index: u32) -> Result<Self, Error> {
        let descriptor = fetch(&device, index)?;
        debug!(index, name = %descriptor.name, function = ?descriptor.function, "read pin");

        Ok(Self {
            device,
            descriptor: Mutex::new(descriptor),
        })
    }

    fn cached(&self) -> MutexGuard<'_, PinDescriptor> {
        self.descriptor.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn index(&self) -> u32 {
        self.cached().index
    }

    pub fn name(&self) -> String {
        self.cached().name.clone()
    }

    pub fn function(&self) -> PinFunction {
        self.cached().function
    }

    pub fn channel(&self) -> u32 {
        self.cached().channel
    }

    pub fn descriptor(&self) -> PinDescriptor {
        self.cached().clone()
    }

    /// Assign `function` on `channel` to this pin. The descriptor is read back
    /// afterwards, so the getters reflect what the driver made of the request.
    pub fn set_function(&self, function: PinFunction, channel: u32) -> Result<(), Error> {
        let mut cached = self.cached();

        let update = PinDescriptor {
            function,
            channel,
            ..cached.clone()
        };
        let mut buf = update.encode();
        self.device.control(Request::PinSetFunction, &mut buf)?;

        *cached = fetch(&self.device, update.index)?;
        debug!(index = cached.index, function = ?cached.function, channel = cached.channel, "pin function set");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simulated::SimulatedDevice, wire::Capabilities};

    fn device(pins: i32) -> (Arc<SimulatedDevice>, Arc<DeviceHandle<SimulatedDevice>>) {
        let capabilities = Capabilities {
            pins,
            ..Default::default()
        };
        let (device, _feed) = SimulatedDevice::with_pin_count(capabilities).unwrap();
        let device = Arc::new(device);
        (device.clone(), Arc::new(DeviceHandle::new(device)))
    }

    #[test]
    fn read_queries_the_requested_index() {
        let (device, handle) = device(3);
        let pin = Pin::read(handle, 2).unwrap();

        assert_eq!(pin.index(), 2);
        assert_eq!(pin.name(), "pin2");
        assert_eq!(pin.function(), PinFunction::None);

        let calls = device.calls_of(Request::PinGetFunction);
        assert_eq!(calls.len(), 1);
        assert_eq!(PinDescriptor::decode(&calls[0].data).unwrap().index, 2);
    }

    #[test]
    fn set_function_rereads_descriptor() {
        let (device, handle) = device(2);
        let pin = Pin::read(handle, 1).unwrap();

        pin.set_function(PinFunction::PeriodicOutput, 3).unwrap();
        assert_eq!(pin.function(), PinFunction::PeriodicOutput);
        assert_eq!(pin.channel(), 3);
        assert_eq!(device.pin_table()[1].function, PinFunction::PeriodicOutput);

        let writes = device.calls_of(Request::PinSetFunction);
        assert_eq!(writes.len(), 1);
        let written = PinDescriptor::decode(&writes[0].data).unwrap();
        assert_eq!((written.index, written.channel), (1, 3));
        assert_eq!(device.calls_of(Request::PinGetFunction).len(), 2);
    }

    #[test]
    fn rejected_update_keeps_descriptor() {
        let (device, handle) = device(1);
        let pin = Pin::read(handle, 0).unwrap();

        device.fail(Request::PinSetFunction, libc::EOPNOTSUPP);
        let err = pin
            .set_function(PinFunction::ExternalTimestamp, 0)
            .unwrap_err();
        assert_eq!(err.errno(), Some(libc::EOPNOTSUPP));
        assert_eq!(pin.function(), PinFunction::None);
    }

    #[test]
    fn closed_device() {
        let (_device, handle) = device(1);
        let pin = Pin::read(handle.clone(), 0).unwrap();
        handle.release();

        assert!(matches!(
            pin.set_function(PinFunction::PeriodicOutput, 0),
            Err(Error::HandleClosed)
        ));
        assert_eq!(pin.name(), "pin0");
    }
}
