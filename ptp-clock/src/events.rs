use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{
    device::PtpDevice,
    time::PtpTime,
    wire::{ExternalTimestampEvent, EXTERNAL_TIMESTAMP_EVENT_LEN},
};

/// Receives the channel and timestamp of every external timestamp event.
///
/// The callback runs on the event thread while the callback slot is locked,
/// it must not register or remove callbacks itself. A panicking callback
/// loses the event it was handed, delivery continues with the next one.
pub type EventCallback = Box<dyn FnMut(u32, PtpTime) + Send>;

pub(crate) type CallbackSlot = Arc<Mutex<Option<EventCallback>>>;

/// Longest time the loop keeps a closed device open.
pub(crate) const WAIT_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) fn lock_slot(slot: &Mutex<Option<EventCallback>>) -> MutexGuard<'_, Option<EventCallback>> {
    // a panicking callback leaves the slot itself intact
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Start reading event records from `device`.
///
/// The thread runs until a read or decode fails, or until the last strong
/// reference to the device is gone. The device is only held while waiting
/// for at most [`WAIT_INTERVAL`] and while reading an available record.
pub(crate) fn spawn<D: PtpDevice>(
    device: Weak<D>,
    slot: CallbackSlot,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(String::from("ptp-events"))
        .spawn(move || run(device, slot))
}

fn run<D: PtpDevice>(device: Weak<D>, slot: CallbackSlot) {
    let mut record = [0u8; EXTERNAL_TIMESTAMP_EVENT_LEN];

    loop {
        let Some(current) = device.upgrade() else {
            debug!("clock closed, event loop stopped");
            return;
        };

        match current.wait_readable(WAIT_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(error) => {
                debug!(%error, "could not wait for events, event loop stopped");
                return;
            }
        }

        if let Err(error) = current.read_record(&mut record) {
            debug!(%error, "could not read event, event loop stopped");
            return;
        }
        drop(current);

        let event = match ExternalTimestampEvent::decode(&record) {
            Ok(event) => event,
            Err(error) => {
                debug!(%error, "could not decode event, event loop stopped");
                return;
            }
        };

        trace!(channel = event.channel, timestamp = %event.timestamp, "external timestamp event");

        if let Some(callback) = lock_slot(&slot).as_mut() {
            // the slot is not poisoned, the guard outlives the unwind
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| callback(event.channel, event.timestamp)));
            if delivered.is_err() {
                warn!(channel = event.channel, "external timestamp callback panicked");
            }
        }
    }
}
