//! Pluggable device recovery strategies

use std::time::Duration;

use devices::{DeviceError, Result};
use tracing::debug;

use crate::monitor::DeviceStateMonitor;

/// How long [`WaitForOnlineRecovery`] waits by default before declaring the
/// device gone.
pub const DEFAULT_ONLINE_TIMEOUT: Duration = Duration::from_secs(120);

/// Behavior invoked by a test device when its connection is deemed broken.
///
/// Strategies only see the device's state monitor, never the manager, so a
/// test device does not hold a reference back into the pool.
pub trait RecoveryStrategy: Send + Sync {
    fn recover(&self, monitor: &DeviceStateMonitor) -> Result<()>;
}

/// Recovery that simply waits for the device to come back online.
///
/// Installed on tcp devices after a transport switch, where the expected
/// failure mode is a slow re-enumeration rather than a dead device.
pub struct WaitForOnlineRecovery {
    timeout: Duration,
}

impl WaitForOnlineRecovery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WaitForOnlineRecovery {
    fn default() -> Self {
        Self::new(DEFAULT_ONLINE_TIMEOUT)
    }
}

impl RecoveryStrategy for WaitForOnlineRecovery {
    fn recover(&self, monitor: &DeviceStateMonitor) -> Result<()> {
        debug!(serial = %monitor.serial(), "waiting for device to come online");
        if monitor.wait_for_online(self.timeout) {
            Ok(())
        } else {
            Err(DeviceError::NotAvailable(monitor.serial().to_string()))
        }
    }
}

/// Recovery installed on every allocated device by a hard shutdown.
///
/// Any subsequent recovery attempt fails with the session-aborted error, so
/// outstanding holders surface the shutdown on their next device I/O.
pub struct AbortRecovery;

impl RecoveryStrategy for AbortRecovery {
    fn recover(&self, _monitor: &DeviceStateMonitor) -> Result<()> {
        Err(DeviceError::SessionAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devices::DeviceState;

    #[test]
    fn abort_recovery_always_fails() {
        let monitor = DeviceStateMonitor::new("SERIAL_A", DeviceState::Online);
        let err = AbortRecovery.recover(&monitor).unwrap_err();
        assert!(err.to_string().contains("aborted"));
    }

    #[test]
    fn wait_recovery_succeeds_for_online_device() {
        let monitor = DeviceStateMonitor::new("SERIAL_A", DeviceState::Online);
        let recovery = WaitForOnlineRecovery::new(Duration::from_millis(100));
        assert!(recovery.recover(&monitor).is_ok());
    }

    #[test]
    fn wait_recovery_fails_when_device_stays_away() {
        let monitor = DeviceStateMonitor::new("SERIAL_A", DeviceState::NotAvailable);
        let recovery = WaitForOnlineRecovery::new(Duration::from_millis(100));
        assert!(matches!(
            recovery.recover(&monitor),
            Err(DeviceError::NotAvailable(_))
        ));
    }
}
