//! The managed device handed to test consumers
//!
//! A [`TestDevice`] wraps the bridge's device handle with the pieces the
//! allocator owns: the state monitor, the pluggable recovery strategy, the
//! log-capture toggle, and transport switching. The underlying handle is
//! swappable because the bridge re-issues handles on reconnect while the
//! serial stays stable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use common::CommandRunner;
use devices::{DeviceError, DeviceState, RemoteDevice, Result};
use tracing::{debug, warn};

use crate::bridge::DEFAULT_BRIDGE_OPERATION_TIMEOUT;
use crate::monitor::DeviceStateMonitor;
use crate::recovery::{DEFAULT_ONLINE_TIMEOUT, RecoveryStrategy, WaitForOnlineRecovery};

/// Property holding the device's wifi address, consulted for the tcp
/// transport switch.
const IP_ADDRESS_PROPERTY: &str = "dhcp.wlan0.ipaddress";
/// Port the bridge listens on after `tcpip`.
const TCP_TRANSPORT_PORT: u16 = 5555;

pub struct TestDevice {
    serial: String,
    device: RwLock<Arc<dyn RemoteDevice>>,
    monitor: Arc<DeviceStateMonitor>,
    recovery: Mutex<Arc<dyn RecoveryStrategy>>,
    runner: Arc<dyn CommandRunner>,
    bridge_path: String,
    fastboot_enabled: AtomicBool,
    log_capture: AtomicBool,
}

impl TestDevice {
    pub fn new(
        device: Arc<dyn RemoteDevice>,
        monitor: Arc<DeviceStateMonitor>,
        runner: Arc<dyn CommandRunner>,
        bridge_path: impl Into<String>,
    ) -> Self {
        Self {
            serial: device.serial().to_string(),
            device: RwLock::new(device),
            monitor,
            recovery: Mutex::new(Arc::new(WaitForOnlineRecovery::default())),
            runner,
            bridge_path: bridge_path.into(),
            fastboot_enabled: AtomicBool::new(false),
            log_capture: AtomicBool::new(false),
        }
    }

    /// The stable identity of this device; unaffected by handle re-issue.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn remote_device(&self) -> Arc<dyn RemoteDevice> {
        Arc::clone(&self.device.read().unwrap())
    }

    /// Swap in a re-issued bridge handle for the same serial.
    pub fn set_remote_device(&self, device: Arc<dyn RemoteDevice>) {
        *self.device.write().unwrap() = device;
    }

    pub fn state_monitor(&self) -> &Arc<DeviceStateMonitor> {
        &self.monitor
    }

    pub fn device_state(&self) -> DeviceState {
        self.monitor.state()
    }

    pub fn set_device_state(&self, state: DeviceState) {
        self.monitor.set_state(state);
    }

    pub fn set_fastboot_enabled(&self, enabled: bool) {
        self.fastboot_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn fastboot_enabled(&self) -> bool {
        self.fastboot_enabled.load(Ordering::Relaxed)
    }

    pub fn set_recovery(&self, recovery: Arc<dyn RecoveryStrategy>) {
        *self.recovery.lock().unwrap() = recovery;
    }

    /// Run the installed recovery strategy.
    pub fn recover_device(&self) -> Result<()> {
        let recovery = Arc::clone(&self.recovery.lock().unwrap());
        recovery.recover(&self.monitor)
    }

    pub fn start_log_capture(&self) {
        if !self.log_capture.swap(true, Ordering::Relaxed) {
            debug!(serial = %self.serial, "starting background log capture");
        }
    }

    pub fn stop_log_capture(&self) {
        if self.log_capture.swap(false, Ordering::Relaxed) {
            debug!(serial = %self.serial, "stopping background log capture");
        }
    }

    pub fn log_capture_active(&self) -> bool {
        self.log_capture.load(Ordering::Relaxed)
    }

    /// Block until the device is online, falling back to the recovery
    /// strategy when the default window elapses.
    pub fn wait_for_device_online(&self) -> Result<()> {
        if self.monitor.wait_for_online(DEFAULT_ONLINE_TIMEOUT) {
            Ok(())
        } else {
            self.recover_device()
        }
    }

    /// Ask the device to move its bridge transport to tcp.
    ///
    /// Returns the `address:port` the device will re-appear under, or `None`
    /// when the device cannot report a usable address.
    pub fn switch_to_adb_tcp(&self) -> Result<Option<String>> {
        let device = self.remote_device();
        let ip = match device.property(IP_ADDRESS_PROPERTY) {
            Some(ip) if !ip.trim().is_empty() => ip.trim().to_string(),
            _ => {
                warn!(serial = %self.serial, "device has no wifi address, cannot switch to tcp");
                return Ok(None);
            }
        };
        let port = TCP_TRANSPORT_PORT.to_string();
        let result = self.runner.run(
            DEFAULT_BRIDGE_OPERATION_TIMEOUT,
            &[&self.bridge_path, "-s", &self.serial, "tcpip", &port],
        );
        if !result.success() {
            return Err(DeviceError::Shell {
                serial: self.serial.clone(),
                message: format!("tcpip {port} failed: {}", result.stderr.trim()),
            });
        }
        Ok(Some(format!("{ip}:{TCP_TRANSPORT_PORT}")))
    }

    /// Ask the device to move its bridge transport back to usb.
    pub fn switch_to_adb_usb(&self) -> Result<()> {
        let result = self.runner.run(
            DEFAULT_BRIDGE_OPERATION_TIMEOUT,
            &[&self.bridge_path, "-s", &self.serial, "usb"],
        );
        if result.success() {
            Ok(())
        } else {
            Err(DeviceError::Shell {
                serial: self.serial.clone(),
                message: format!("usb transport switch failed: {}", result.stderr.trim()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::AbortRecovery;
    use common::test_utils::{FakeDevice, ScriptedRunner, command_failure, command_success};
    use devices::PRODUCT_TYPE_PROPERTY;

    fn test_device(device: Arc<FakeDevice>, runner: Arc<ScriptedRunner>) -> TestDevice {
        let monitor = Arc::new(DeviceStateMonitor::new(device.serial(), device.state()));
        TestDevice::new(device, monitor, runner, "adb")
    }

    #[test]
    fn log_capture_toggles_once() {
        let device = Arc::new(FakeDevice::online("SERIAL_A"));
        let td = test_device(device, Arc::new(ScriptedRunner::new()));
        assert!(!td.log_capture_active());
        td.start_log_capture();
        td.start_log_capture();
        assert!(td.log_capture_active());
        td.stop_log_capture();
        assert!(!td.log_capture_active());
    }

    #[test]
    fn swapped_handle_keeps_serial() {
        let first = Arc::new(FakeDevice::online("SERIAL_A"));
        let td = test_device(first, Arc::new(ScriptedRunner::new()));
        let reissued = Arc::new(FakeDevice::online("SERIAL_A"));
        reissued.set_property(PRODUCT_TYPE_PROPERTY, "walleye");
        td.set_remote_device(reissued);
        assert_eq!(td.serial(), "SERIAL_A");
        assert_eq!(
            td.remote_device().property(PRODUCT_TYPE_PROPERTY).as_deref(),
            Some("walleye")
        );
    }

    #[test]
    fn abort_recovery_surfaces_on_recover() {
        let device = Arc::new(FakeDevice::online("SERIAL_D"));
        let td = test_device(device, Arc::new(ScriptedRunner::new()));
        td.set_recovery(Arc::new(AbortRecovery));
        let err = td.recover_device().unwrap_err();
        assert!(err.to_string().contains("aborted"));
    }

    #[test]
    fn tcp_switch_reports_address_and_port() {
        let device = Arc::new(FakeDevice::online("SERIAL_A"));
        device.set_property(IP_ADDRESS_PROPERTY, "192.168.0.7");
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_response(command_success("restarting in TCP mode port: 5555"));
        let td = test_device(device, Arc::clone(&runner));

        let addr = td.switch_to_adb_tcp().unwrap();
        assert_eq!(addr.as_deref(), Some("192.168.0.7:5555"));
        let calls = runner.calls();
        assert_eq!(calls[0], vec!["adb", "-s", "SERIAL_A", "tcpip", "5555"]);
    }

    #[test]
    fn tcp_switch_without_address_yields_none() {
        let device = Arc::new(FakeDevice::online("SERIAL_A"));
        let runner = Arc::new(ScriptedRunner::new());
        let td = test_device(device, Arc::clone(&runner));
        assert!(td.switch_to_adb_tcp().unwrap().is_none());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn usb_switch_failure_is_an_error() {
        let device = Arc::new(FakeDevice::online("SERIAL_A"));
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_response(command_failure("error: device not found"));
        let td = test_device(device, runner);
        assert!(td.switch_to_adb_usb().is_err());
    }
}
