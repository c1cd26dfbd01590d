//! The device allocation manager
//!
//! Process-wide façade over the pool structures: discovers devices through
//! the debug bridge, vets them with the readiness prober, hands them out to
//! concurrent consumers, and reconciles fastboot transitions in the
//! background.
//!
//! The three pool structures are individually thread-safe; operations that
//! span them rely on ordering instead of a global lock. Allocation inserts
//! into `allocated` after removing from `available`; freeing removes from
//! `allocated` before re-adding to `available`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use common::CommandRunner;
use devices::{
    DeviceKind, DeviceSelectionOptions, DeviceState, FreeDeviceState, NullDevice, RemoteDevice,
    StubDevice, is_valid_serial,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bridge::{CHANGE_STATE, DebugBridge, DeviceChangeListener};
use crate::config::ManagerConfig;
use crate::fastboot::{FASTBOOT_PROBE_TIMEOUT, FastbootListener, FastbootMonitor};
use crate::monitor::DeviceStateMonitor;
use crate::queue::ConditionBlockingQueue;
use crate::recovery::{AbortRecovery, WaitForOnlineRecovery};
use crate::test_device::TestDevice;

/// How long a newly-visible device must stay online before it is admitted
/// to the pool. Newly-connected devices churn (reboot, re-enumerate);
/// admitting one that vanishes moments later blames the consumer for a
/// spurious allocation failure.
const CHECK_AVAIL_WINDOW: Duration = Duration::from_secs(5);
/// Timeout for bridge commands not targeted at a device (`connect`, ...).
const GLOBAL_CMD_TIMEOUT: Duration = Duration::from_secs(60);
/// Attempts to establish a tcp transport connection.
const TCP_CONNECT_ATTEMPTS: u32 = 3;
/// Pause between tcp connect attempts.
const TCP_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// First port of the deterministic emulator placeholder serials.
const FIRST_EMULATOR_PORT: u16 = 5554;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("device manager has not been initialized")]
    NotInitialized,

    #[error("device manager is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Device(#[from] devices::DeviceError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Terminated,
}

pub struct DeviceManager {
    /// Back-reference handed to listeners and background threads.
    self_ref: Weak<DeviceManager>,
    bridge: Arc<dyn DebugBridge>,
    runner: Arc<dyn CommandRunner>,
    config: ManagerConfig,
    lifecycle: Mutex<Lifecycle>,
    /// serial -> device currently handed out to a consumer
    allocated: Mutex<HashMap<String, Arc<TestDevice>>>,
    /// devices ready for allocation, plus placeholder slots
    available: ConditionBlockingQueue<Arc<dyn RemoteDevice>>,
    /// serial -> monitor of a device being vetted by the readiness prober.
    /// Membership blocks a second probe for the same serial.
    checking: Mutex<HashMap<String, Arc<DeviceStateMonitor>>>,
    global_filter: Mutex<DeviceSelectionOptions>,
    listener: Mutex<Option<Arc<dyn DeviceChangeListener>>>,
    fastboot_enabled: AtomicBool,
    fastboot_listeners: Mutex<Vec<Arc<dyn FastbootListener>>>,
    fastboot_monitor: Mutex<Option<FastbootMonitor>>,
    enable_log_capture: AtomicBool,
}

impl DeviceManager {
    pub fn new(
        bridge: Arc<dyn DebugBridge>,
        runner: Arc<dyn CommandRunner>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let enable_log_capture = config.enable_log_capture;
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            bridge,
            runner,
            config,
            lifecycle: Mutex::new(Lifecycle::Created),
            allocated: Mutex::new(HashMap::new()),
            available: ConditionBlockingQueue::new(),
            checking: Mutex::new(HashMap::new()),
            global_filter: Mutex::new(DeviceSelectionOptions::matches_any()),
            listener: Mutex::new(None),
            fastboot_enabled: AtomicBool::new(false),
            fastboot_listeners: Mutex::new(Vec::new()),
            fastboot_monitor: Mutex::new(None),
            enable_log_capture: AtomicBool::new(enable_log_capture),
        })
    }

    /// Initialize with the match-anything global filter.
    pub fn init(&self) -> Result<()> {
        self.init_with_filter(DeviceSelectionOptions::matches_any())
    }

    /// Initialize the manager. Must be called once, before any other
    /// operation; a second call fails with
    /// [`ManagerError::AlreadyInitialized`].
    pub fn init_with_filter(&self, global_filter: DeviceSelectionOptions) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Created {
                return Err(ManagerError::AlreadyInitialized);
            }
            *lifecycle = Lifecycle::Running;
        }
        *self.global_filter.lock().unwrap() = global_filter;

        let fastboot_available = self.is_fastboot_available();
        self.fastboot_enabled
            .store(fastboot_available, Ordering::Relaxed);
        if !fastboot_available {
            warn!("fastboot is not available");
        }

        self.add_emulator_placeholders();
        self.add_null_device_placeholders();

        let listener: Arc<dyn DeviceChangeListener> = Arc::new(ManagerDeviceListener {
            manager: self.self_ref.clone(),
        });
        *self.listener.lock().unwrap() = Some(Arc::clone(&listener));
        // Register before starting the bridge so the initial discovery
        // burst cannot race the listener installation.
        self.bridge.add_listener(listener);
        self.bridge.init(false, &self.config.adb_path);

        if fastboot_available {
            let monitor = FastbootMonitor::start(
                self.self_ref.clone(),
                Arc::clone(&self.runner),
                self.config.fastboot_path.clone(),
            );
            *self.fastboot_monitor.lock().unwrap() = Some(monitor);
        }
        Ok(())
    }

    fn check_init(&self) -> Result<()> {
        if *self.lifecycle.lock().unwrap() == Lifecycle::Created {
            return Err(ManagerError::NotInitialized);
        }
        Ok(())
    }

    /// `fastboot help` succeeding, or printing its usage banner to stderr
    /// (old versions exit non-zero), both mean fastboot is usable.
    fn is_fastboot_available(&self) -> bool {
        let result = self
            .runner
            .run(FASTBOOT_PROBE_TIMEOUT, &[&self.config.fastboot_path, "help"]);
        if result.success() {
            return true;
        }
        if result.stderr.contains("usage: fastboot") {
            warn!("you are running an older version of fastboot, please update it");
            return true;
        }
        false
    }

    fn add_emulator_placeholders(&self) {
        let mut port = FIRST_EMULATOR_PORT;
        for _ in 0..self.config.num_emulators {
            self.available
                .add(Arc::new(StubDevice::emulator(format!("emulator-{port}"))));
            port += 2;
        }
    }

    fn add_null_device_placeholders(&self) {
        for index in 0..self.config.num_null_devices {
            self.available
                .add(Arc::new(NullDevice::new(format!("null-device-{index}"))));
        }
    }

    /// Toggle whether newly-allocated devices start background log capture.
    pub fn set_enable_log_capture(&self, enable: bool) {
        self.enable_log_capture.store(enable, Ordering::Relaxed);
    }

    /// Take the oldest available device, blocking until one exists or the
    /// manager is terminated. `None` means the wait was cancelled.
    pub fn allocate(&self) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        let options = DeviceSelectionOptions::matches_any();
        Ok(self
            .available
            .take(|device| options.matches(device.as_ref()))
            .map(|device| self.create_allocated_device(device)))
    }

    /// Like [`allocate`](DeviceManager::allocate), but gives up after
    /// `timeout`.
    pub fn allocate_timeout(&self, timeout: Duration) -> Result<Option<Arc<TestDevice>>> {
        self.allocate_matching(timeout, DeviceSelectionOptions::matches_any())
    }

    /// Take the oldest available device matching `options`, waiting up to
    /// `timeout`. `None` on timeout or cancellation, never an error.
    pub fn allocate_matching(
        &self,
        timeout: Duration,
        options: DeviceSelectionOptions,
    ) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        Ok(self
            .available
            .poll(timeout, |device| options.matches(device.as_ref()))
            .map(|device| self.create_allocated_device(device)))
    }

    fn create_allocated_device(&self, device: Arc<dyn RemoteDevice>) -> Arc<TestDevice> {
        let monitor = Arc::new(DeviceStateMonitor::new(device.serial(), device.state()));
        let test_device = Arc::new(TestDevice::new(
            device,
            monitor,
            Arc::clone(&self.runner),
            self.config.adb_path.clone(),
        ));
        test_device.set_fastboot_enabled(self.fastboot_enabled.load(Ordering::Relaxed));
        if self.enable_log_capture.load(Ordering::Relaxed) {
            test_device.start_log_capture();
        }
        self.allocated
            .lock()
            .unwrap()
            .insert(test_device.serial().to_string(), Arc::clone(&test_device));
        info!(serial = %test_device.serial(), "allocated device");
        test_device
    }

    /// Return a device after use. `post_state` decides whether the
    /// underlying handle re-enters the pool. Freeing a device that is not
    /// allocated is tolerated but logged as an anomaly.
    pub fn free(&self, device: &Arc<TestDevice>, post_state: FreeDeviceState) -> Result<()> {
        self.check_init()?;
        device.stop_log_capture();
        if self
            .allocated
            .lock()
            .unwrap()
            .remove(device.serial())
            .is_none()
        {
            warn!(serial = %device.serial(), "free called with unallocated device");
            return Ok(());
        }
        match post_state {
            FreeDeviceState::Available | FreeDeviceState::Unresponsive => {
                self.available.add(device.remote_device());
            }
            FreeDeviceState::Unavailable => {
                warn!(serial = %device.serial(), "freed device is unavailable, removing from use");
            }
            FreeDeviceState::Ignore => {}
        }
        Ok(())
    }

    /// Connect to a device listening for a tcp transport on `ip_and_port`.
    ///
    /// A stub is pre-registered under the address so the device gets state
    /// updates once it appears, and so no other caller can allocate it when
    /// it comes online under the new serial. `None` when the connection
    /// could not be established.
    pub fn connect_to_tcp_device(&self, ip_and_port: &str) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        if self.allocated.lock().unwrap().contains_key(ip_and_port) {
            warn!(serial = %ip_and_port, "device with tcp serial is already allocated");
            return Ok(None);
        }
        let tcp_device = self.create_allocated_device(Arc::new(StubDevice::tcp(ip_and_port)));
        if self.do_bridge_connect(ip_and_port) {
            tcp_device.set_recovery(Arc::new(WaitForOnlineRecovery::default()));
            match tcp_device.wait_for_device_online() {
                Ok(()) => return Ok(Some(tcp_device)),
                Err(err) => {
                    warn!(serial = %ip_and_port, error = %err, "device with tcp serial did not come online");
                }
            }
        }
        self.free(&tcp_device, FreeDeviceState::Ignore)?;
        Ok(None)
    }

    fn do_bridge_connect(&self, ip_and_port: &str) -> bool {
        let expected = format!("connected to {ip_and_port}");
        for attempt in 1..=TCP_CONNECT_ATTEMPTS {
            match self.execute_global_bridge_command(&["connect", ip_and_port]) {
                Some(output) if output.starts_with(&expected) => return true,
                Some(output) => {
                    warn!(
                        attempt,
                        response = %output.trim(),
                        "failed to connect to device on {ip_and_port}"
                    );
                }
                None => {
                    warn!(attempt, "bridge connect command failed for {ip_and_port}");
                }
            }
            self.runner.sleep(TCP_CONNECT_RETRY_DELAY);
        }
        false
    }

    /// Run a bridge command not targeted at a particular device, e.g.
    /// `connect`. Returns stdout on success.
    pub fn execute_global_bridge_command(&self, args: &[&str]) -> Option<String> {
        let mut argv = vec![self.config.adb_path.as_str()];
        argv.extend_from_slice(args);
        let result = self.runner.run(GLOBAL_CMD_TIMEOUT, &argv);
        if result.success() {
            Some(result.stdout)
        } else {
            warn!(command = %args.first().unwrap_or(&""), "bridge command failed");
            None
        }
    }

    /// Switch `usb_device`'s transport to tcp and reconnect to it under the
    /// new serial. On connection failure the usb connection is recovered
    /// through the device's strategy, and device errors propagate verbatim.
    pub fn reconnect_device_to_tcp(
        &self,
        usb_device: &Arc<TestDevice>,
    ) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        info!(serial = %usb_device.serial(), "reconnecting device to bridge over tcp");
        let Some(ip_and_port) = usb_device.switch_to_adb_tcp()? else {
            return Ok(None);
        };
        debug!(serial = %usb_device.serial(), %ip_and_port, "device switched to tcp transport");
        let tcp_device = self.connect_to_tcp_device(&ip_and_port)?;
        if tcp_device.is_none() {
            // could not reach the device over tcp; re-establish usb
            usb_device.recover_device()?;
        }
        Ok(tcp_device)
    }

    /// Switch `tcp_device` back to the usb transport and free it. The
    /// device is freed with [`FreeDeviceState::Ignore`] regardless of the
    /// switch outcome; returns whether the switch succeeded.
    pub fn disconnect_from_tcp_device(&self, tcp_device: &Arc<TestDevice>) -> Result<bool> {
        self.check_init()?;
        info!(serial = %tcp_device.serial(), "disconnecting and freeing tcp device");
        let switched = match tcp_device.switch_to_adb_usb() {
            Ok(()) => true,
            Err(err) => {
                warn!(serial = %tcp_device.serial(), error = %err, "failed to switch device to usb transport");
                false
            }
        };
        self.free(tcp_device, FreeDeviceState::Ignore)?;
        Ok(switched)
    }

    /// Shut the manager down: unregister the listener, stop the bridge and
    /// the fastboot monitor, release blocked allocations. Idempotent.
    pub fn terminate(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            match *lifecycle {
                Lifecycle::Created => return Err(ManagerError::NotInitialized),
                Lifecycle::Terminated => return Ok(()),
                Lifecycle::Running => *lifecycle = Lifecycle::Terminated,
            }
        }
        if let Some(listener) = self.listener.lock().unwrap().take() {
            self.bridge.remove_listener(&listener);
        }
        self.bridge.terminate();
        if let Some(monitor) = self.fastboot_monitor.lock().unwrap().take() {
            monitor.terminate();
        }
        self.available.cancel_waits();
        // Outstanding probes observe the transition and exit without
        // admitting their device.
        for monitor in self.checking.lock().unwrap().values() {
            monitor.set_state(DeviceState::NotAvailable);
        }
        info!("device manager terminated");
        Ok(())
    }

    /// Shut down without waiting for consumers: poison every allocated
    /// device so its next recovery attempt fails with "aborted test
    /// session", drop the bridge abruptly, then terminate.
    pub fn terminate_hard(&self) -> Result<()> {
        match *self.lifecycle.lock().unwrap() {
            Lifecycle::Created => return Err(ManagerError::NotInitialized),
            Lifecycle::Terminated => return Ok(()),
            Lifecycle::Running => {}
        }
        {
            let allocated = self.allocated.lock().unwrap();
            for device in allocated.values() {
                device.set_recovery(Arc::new(AbortRecovery));
            }
        }
        self.bridge.disconnect_bridge();
        self.terminate()
    }

    /// Serials currently handed out to consumers.
    pub fn allocated_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        Ok(self.allocated.lock().unwrap().keys().cloned().collect())
    }

    /// Serials of real devices waiting in the pool. Placeholder slots are
    /// excluded from the listing.
    pub fn available_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        Ok(self
            .available
            .snapshot()
            .into_iter()
            .filter(|device| !device.kind().is_stub())
            .map(|device| device.serial().to_string())
            .collect())
    }

    /// Serials currently being vetted by the readiness prober.
    pub fn checking_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        Ok(self.checking.lock().unwrap().keys().cloned().collect())
    }

    /// Serials visible to the bridge that are neither available nor
    /// allocated: devices that failed or have not yet passed the readiness
    /// probe.
    pub fn unavailable_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        let available: HashSet<String> = self.available_serials()?.into_iter().collect();
        let allocated: HashSet<String> = self.allocated_serials()?.into_iter().collect();
        Ok(self
            .bridge
            .devices()
            .into_iter()
            .map(|device| device.serial().to_string())
            .filter(|serial| !available.contains(serial) && !allocated.contains(serial))
            .collect())
    }

    /// Register a fastboot listener. The poll only runs while at least one
    /// listener is registered; a new subscriber sees its first update at
    /// most one poll interval later.
    pub fn add_fastboot_listener(&self, listener: Arc<dyn FastbootListener>) -> Result<()> {
        self.check_init()?;
        if self.fastboot_enabled.load(Ordering::Relaxed) {
            self.fastboot_listeners.lock().unwrap().push(listener);
        }
        Ok(())
    }

    pub fn remove_fastboot_listener(&self, listener: &Arc<dyn FastbootListener>) -> Result<()> {
        self.check_init()?;
        if self.fastboot_enabled.load(Ordering::Relaxed) {
            self.fastboot_listeners
                .lock()
                .unwrap()
                .retain(|known| !Arc::ptr_eq(known, listener));
        }
        Ok(())
    }

    pub(crate) fn has_fastboot_listeners(&self) -> bool {
        !self.fastboot_listeners.lock().unwrap().is_empty()
    }

    pub(crate) fn fastboot_listeners_snapshot(&self) -> Vec<Arc<dyn FastbootListener>> {
        self.fastboot_listeners.lock().unwrap().clone()
    }

    /// Apply a fastboot listing to the allocated devices: devices in the
    /// listing enter [`DeviceState::Fastboot`]; devices recorded in
    /// fastboot that left the listing become
    /// [`DeviceState::NotAvailable`].
    pub(crate) fn reconcile_fastboot_states(&self, fastboot_serials: &HashSet<String>) {
        let allocated = self.allocated.lock().unwrap();
        for (serial, device) in allocated.iter() {
            if fastboot_serials.contains(serial) {
                if device.device_state() != DeviceState::Fastboot {
                    device.set_device_state(DeviceState::Fastboot);
                }
            } else if device.device_state() == DeviceState::Fastboot {
                device.set_device_state(DeviceState::NotAvailable);
            }
        }
    }

    /// Vet a newly-visible device and admit it to the pool once its
    /// connection has been stable for [`CHECK_AVAIL_WINDOW`].
    fn check_and_add_available(&self, device: Arc<dyn RemoteDevice>) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let serial = device.serial().to_string();
        if self.checking.lock().unwrap().contains_key(&serial) {
            debug!(%serial, "already checking new device, ignoring");
            return;
        }
        let filter = self.global_filter.lock().unwrap().clone();
        if !filter.matches(device.as_ref()) {
            debug!(%serial, "new device doesn't match global filter, ignoring");
            return;
        }
        let monitor = Arc::new(DeviceStateMonitor::new(&serial, device.state()));
        {
            let mut checking = self.checking.lock().unwrap();
            if checking.contains_key(&serial) {
                return;
            }
            checking.insert(serial.clone(), Arc::clone(&monitor));
        }

        let thread_name = format!("check-device-{serial}");
        let probe_serial = serial.clone();
        let probe = std::thread::Builder::new().name(thread_name).spawn(move || {
            // The guard removes the checking entry on every exit path.
            let guard = CheckingGuard {
                manager,
                serial: probe_serial,
            };
            debug!(serial = %guard.serial, "checking new device responsiveness");
            let mut admitted = false;
            if !monitor.wait_for_not_available(CHECK_AVAIL_WINDOW) && monitor.state().is_online() {
                info!(serial = %guard.serial, "detected new device");
                guard.manager.available.add(device);
                admitted = true;
            }
            if !admitted {
                warn!(
                    serial = %guard.serial,
                    "device connection is not stable, skip adding to available pool"
                );
            }
        });
        if let Err(err) = probe {
            warn!(error = %err, "failed to spawn device check thread");
            self.checking.lock().unwrap().remove(&serial);
        }
    }

    fn on_device_connected(&self, device: Arc<dyn RemoteDevice>) {
        let serial = device.serial().to_string();
        debug!(%serial, "detected device connect");
        let known = self.allocated.lock().unwrap().get(&serial).cloned();
        match known {
            Some(test_device) => {
                // The bridge re-issued the handle for an allocated device;
                // update the record instead of re-probing.
                debug!(%serial, "updating handle for allocated device");
                let state = device.state();
                test_device.set_remote_device(device);
                test_device.set_device_state(state);
            }
            None => {
                if is_valid_serial(&serial) && device.state().is_online() {
                    self.check_and_add_available(device);
                } else if let Some(monitor) = self.checking.lock().unwrap().get(&serial) {
                    monitor.set_state(device.state());
                }
            }
        }
    }

    fn on_device_changed(&self, device: Arc<dyn RemoteDevice>, change_mask: u32) {
        if change_mask & CHANGE_STATE == 0 {
            return;
        }
        let serial = device.serial().to_string();
        if let Some(test_device) = self.allocated.lock().unwrap().get(&serial).cloned() {
            test_device.set_device_state(device.state());
            return;
        }
        if let Some(monitor) = self.checking.lock().unwrap().get(&serial) {
            monitor.set_state(device.state());
            return;
        }
        // Placeholders share serials with real emulators, so only a real
        // entry in the queue suppresses the probe.
        let in_queue = self
            .available
            .contains(|d| d.kind() == DeviceKind::Real && d.serial() == serial);
        if !in_queue && device.state().is_online() {
            self.check_and_add_available(device);
        }
    }

    fn on_device_disconnected(&self, device: Arc<dyn RemoteDevice>) {
        let serial = device.serial().to_string();
        let removed = self
            .available
            .remove_first(|d| d.kind() == DeviceKind::Real && d.serial() == serial);
        if removed.is_some() {
            info!(%serial, "removed disconnected device from available queue");
        }
        if let Some(test_device) = self.allocated.lock().unwrap().get(&serial).cloned() {
            // The allocation stays; the consumer discovers unavailability
            // through operations on the test device.
            test_device.set_device_state(DeviceState::NotAvailable);
        } else if let Some(monitor) = self.checking.lock().unwrap().get(&serial) {
            monitor.set_state(DeviceState::NotAvailable);
        }
    }
}

/// Removes the `checking` entry when the probe exits, no matter how.
struct CheckingGuard {
    manager: Arc<DeviceManager>,
    serial: String,
}

impl Drop for CheckingGuard {
    fn drop(&mut self) {
        self.manager.checking.lock().unwrap().remove(&self.serial);
    }
}

/// Routes bridge presence callbacks into the manager.
struct ManagerDeviceListener {
    manager: Weak<DeviceManager>,
}

impl DeviceChangeListener for ManagerDeviceListener {
    fn device_connected(&self, device: Arc<dyn RemoteDevice>) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_device_connected(device);
        }
    }

    fn device_disconnected(&self, device: Arc<dyn RemoteDevice>) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_device_disconnected(device);
        }
    }

    fn device_changed(&self, device: Arc<dyn RemoteDevice>, change_mask: u32) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_device_changed(device, change_mask);
        }
    }
}

static GLOBAL_MANAGER: OnceLock<Arc<DeviceManager>> = OnceLock::new();

/// Install a process-wide manager instance. Returns `false` when one is
/// already installed.
pub fn install_global(manager: Arc<DeviceManager>) -> bool {
    GLOBAL_MANAGER.set(manager).is_ok()
}

/// The process-wide manager, if one was installed.
pub fn global() -> Option<Arc<DeviceManager>> {
    GLOBAL_MANAGER.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{ScriptedRunner, command_failure, command_success};

    /// Bridge that records calls and delivers nothing.
    #[derive(Default)]
    struct InertBridge {
        listeners: Mutex<Vec<Arc<dyn DeviceChangeListener>>>,
        initialized: AtomicBool,
    }

    impl DebugBridge for InertBridge {
        fn init(&self, _client_support: bool, _binary_path: &str) {
            self.initialized.store(true, Ordering::Relaxed);
        }

        fn add_listener(&self, listener: Arc<dyn DeviceChangeListener>) {
            assert!(
                !self.initialized.load(Ordering::Relaxed),
                "listener must be registered before the bridge starts"
            );
            self.listeners.lock().unwrap().push(listener);
        }

        fn remove_listener(&self, listener: &Arc<dyn DeviceChangeListener>) {
            self.listeners
                .lock()
                .unwrap()
                .retain(|known| !Arc::ptr_eq(known, listener));
        }

        fn devices(&self) -> Vec<Arc<dyn RemoteDevice>> {
            Vec::new()
        }

        fn terminate(&self) {}

        fn disconnect_bridge(&self) {}
    }

    fn new_manager(config: ManagerConfig) -> (Arc<DeviceManager>, Arc<ScriptedRunner>) {
        let runner = Arc::new(ScriptedRunner::new());
        // fastboot probe fails -> fastboot support disabled, no monitor
        runner.push_response(command_failure("fastboot: command not found"));
        let manager = DeviceManager::new(
            Arc::new(InertBridge::default()),
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            config,
        );
        (manager, runner)
    }

    #[test]
    fn methods_fail_before_init() {
        let (manager, _runner) = new_manager(ManagerConfig::default());
        assert!(matches!(
            manager.allocate_timeout(Duration::from_millis(1)),
            Err(ManagerError::NotInitialized)
        ));
        assert!(matches!(
            manager.terminate(),
            Err(ManagerError::NotInitialized)
        ));
    }

    #[test]
    fn double_init_is_rejected() {
        let (manager, _runner) = new_manager(ManagerConfig::default());
        manager.init().unwrap();
        assert!(matches!(
            manager.init(),
            Err(ManagerError::AlreadyInitialized)
        ));
        manager.terminate().unwrap();
    }

    #[test]
    fn init_seeds_placeholder_slots() {
        let config = ManagerConfig {
            num_emulators: 2,
            num_null_devices: 1,
            ..ManagerConfig::default()
        };
        let (manager, _runner) = new_manager(config);
        manager.init().unwrap();

        // placeholders are allocatable but hidden from the listing
        assert!(manager.available_serials().unwrap().is_empty());
        let emulators = manager
            .allocate_matching(
                Duration::from_millis(50),
                DeviceSelectionOptions::default().emulator_only(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(emulators.serial(), "emulator-5554");
        let null = manager
            .allocate_matching(
                Duration::from_millis(50),
                DeviceSelectionOptions::default().null_only(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(null.serial(), "null-device-0");
        manager.terminate().unwrap();
    }

    #[test]
    fn fastboot_probe_accepts_usage_banner_on_stderr() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_response(command_failure("usage: fastboot [ <option> ] <command>"));
        let manager = DeviceManager::new(
            Arc::new(InertBridge::default()),
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            ManagerConfig::default(),
        );
        manager.init().unwrap();
        assert!(manager.fastboot_enabled.load(Ordering::Relaxed));
        manager.terminate().unwrap();
    }

    #[test]
    fn terminate_is_idempotent_and_cancels_waits() {
        let (manager, _runner) = new_manager(ManagerConfig {
            num_emulators: 0,
            num_null_devices: 0,
            ..ManagerConfig::default()
        });
        manager.init().unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.allocate())
        };
        std::thread::sleep(Duration::from_millis(50));
        manager.terminate().unwrap();
        assert!(waiter.join().unwrap().unwrap().is_none());
        manager.terminate().unwrap();
    }

    #[test]
    fn global_install_is_first_wins() {
        let (first, _r1) = new_manager(ManagerConfig::default());
        let (second, _r2) = new_manager(ManagerConfig::default());
        if install_global(Arc::clone(&first)) {
            assert!(!install_global(second));
            assert!(Arc::ptr_eq(&global().unwrap(), &first));
        } else {
            // another test installed one already; the accessor still works
            assert!(global().is_some());
        }
    }

    #[test]
    fn global_command_returns_stdout_on_success_only() {
        let (manager, runner) = new_manager(ManagerConfig::default());
        manager.init().unwrap();
        runner.push_response(command_success("connected to 10.0.0.2:5555\n"));
        runner.push_response(command_failure("no such host"));
        assert_eq!(
            manager
                .execute_global_bridge_command(&["connect", "10.0.0.2:5555"])
                .as_deref(),
            Some("connected to 10.0.0.2:5555\n")
        );
        assert_eq!(manager.execute_global_bridge_command(&["connect", "x"]), None);
        manager.terminate().unwrap();
    }
}
