//! Per-device state monitoring
//!
//! A [`DeviceStateMonitor`] is the single writer-ordered view of one
//! device's state. The bridge listener thread pushes transitions in, and
//! the readiness prober / recovery strategies block on them coming out.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use devices::DeviceState;
use tracing::trace;

pub struct DeviceStateMonitor {
    serial: String,
    state: Mutex<DeviceState>,
    changed: Condvar,
}

impl DeviceStateMonitor {
    pub fn new(serial: impl Into<String>, initial: DeviceState) -> Self {
        Self {
            serial: serial.into(),
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, next: DeviceState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            trace!(serial = %self.serial, from = ?*state, to = ?next, "device state change");
            *state = next;
            self.changed.notify_all();
        }
    }

    /// Block until the device reports [`DeviceState::NotAvailable`].
    ///
    /// Returns `true` if the device became unavailable within `window`,
    /// `false` if the window elapsed first. The readiness prober uses the
    /// `false` branch as its stability signal.
    pub fn wait_for_not_available(&self, window: Duration) -> bool {
        self.wait_for(window, |state| state == DeviceState::NotAvailable)
    }

    /// Block until the device reports [`DeviceState::Online`], up to
    /// `timeout`. Returns whether it did.
    pub fn wait_for_online(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |state| state == DeviceState::Online)
    }

    fn wait_for<P>(&self, timeout: Duration, reached: P) -> bool
    where
        P: Fn(DeviceState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if reached(*state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self.changed.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }
}
