//! Polling implementation of the debug-bridge capability
//!
//! Runs `<bridge> devices -l` through the command runner on a fixed tick,
//! diffs consecutive listings, and delivers connect/disconnect/change
//! callbacks from the single poller thread. Device properties announced in
//! the listing (`product:`, `model:`, `device:`) seed the handle's property
//! cache; anything else is fetched lazily over the device shell.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use common::CommandRunner;
use devices::{DeviceError, DeviceKind, DeviceState, RemoteDevice};
use tracing::{debug, info, warn};

use crate::bridge::{
    CHANGE_STATE, DEFAULT_BRIDGE_OPERATION_TIMEOUT, DebugBridge, DeviceChangeListener,
};
use crate::stop::StopSignal;

/// How often the poller re-lists devices.
const DEVICE_LIST_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on property reads so filter evaluation cannot hang on a device.
const PROPERTY_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One line of a `devices -l` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListingEntry {
    serial: String,
    state: String,
    properties: HashMap<String, String>,
}

fn parse_devices_listing(output: &str) -> Vec<ListingEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next()?.to_string();
            let mut properties = HashMap::new();
            for token in tokens {
                // Listing keys map onto the build properties the selection
                // filter consults.
                if let Some(value) = token.strip_prefix("product:") {
                    properties.insert("ro.product.name".to_string(), value.to_string());
                } else if let Some(value) = token.strip_prefix("model:") {
                    properties.insert("ro.product.model".to_string(), value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    properties.insert("ro.product.device".to_string(), value.to_string());
                }
            }
            Some(ListingEntry {
                serial,
                state,
                properties,
            })
        })
        .collect()
}

/// Device handle backed by the polled listing plus on-demand shell reads.
struct PolledDevice {
    serial: String,
    state: Mutex<DeviceState>,
    properties: Mutex<HashMap<String, Option<String>>>,
    runner: Arc<dyn CommandRunner>,
    binary_path: String,
}

impl PolledDevice {
    fn new(entry: ListingEntry, runner: Arc<dyn CommandRunner>, binary_path: String) -> Self {
        let state = DeviceState::from_bridge_state(&entry.state);
        let properties = entry
            .properties
            .into_iter()
            .map(|(name, value)| (name, Some(value)))
            .collect();
        Self {
            serial: entry.serial,
            state: Mutex::new(state),
            properties: Mutex::new(properties),
            runner,
            binary_path,
        }
    }

    fn set_state(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
    }

    fn run_shell(&self, timeout: Duration, command: &str) -> Result<String, DeviceError> {
        let result = self.runner.run(
            timeout,
            &[&self.binary_path, "-s", &self.serial, "shell", command],
        );
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(DeviceError::Shell {
                serial: self.serial.clone(),
                message: format!("{command}: {}", result.stderr.trim()),
            })
        }
    }
}

impl RemoteDevice for PolledDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Real
    }

    fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn property(&self, name: &str) -> Option<String> {
        if let Some(cached) = self.properties.lock().unwrap().get(name) {
            return cached.clone();
        }
        let fetched = self
            .run_shell(PROPERTY_QUERY_TIMEOUT, &format!("getprop {name}"))
            .ok()
            .map(|out| out.trim().to_string())
            .filter(|value| !value.is_empty());
        // Build properties are immutable per boot; remember misses too so a
        // filter miss does not re-shell every evaluation.
        self.properties
            .lock()
            .unwrap()
            .insert(name.to_string(), fetched.clone());
        fetched
    }

    fn battery_level(&self) -> Option<u32> {
        let output = self
            .run_shell(PROPERTY_QUERY_TIMEOUT, "dumpsys battery")
            .ok()?;
        output.lines().find_map(|line| {
            line.trim()
                .strip_prefix("level:")
                .and_then(|level| level.trim().parse().ok())
        })
    }

    fn shell(&self, command: &str) -> Result<String, DeviceError> {
        self.run_shell(DEFAULT_BRIDGE_OPERATION_TIMEOUT, command)
    }
}

struct PollerShared {
    runner: Arc<dyn CommandRunner>,
    binary_path: Mutex<String>,
    listeners: Mutex<Vec<Arc<dyn DeviceChangeListener>>>,
    known: Mutex<HashMap<String, Arc<PolledDevice>>>,
    stop: StopSignal,
}

impl PollerShared {
    fn poll_once(&self) {
        let binary_path = self.binary_path.lock().unwrap().clone();
        let result = self.runner.run(
            DEFAULT_BRIDGE_OPERATION_TIMEOUT,
            &[&binary_path, "devices", "-l"],
        );
        if !result.success() {
            warn!(stderr = %result.stderr.trim(), "bridge device listing failed");
            return;
        }
        let entries = parse_devices_listing(&result.stdout);

        let mut connected = Vec::new();
        let mut changed = Vec::new();
        let mut disconnected = Vec::new();
        {
            let mut known = self.known.lock().unwrap();
            let mut seen = HashSet::new();
            for entry in entries {
                seen.insert(entry.serial.clone());
                let state = DeviceState::from_bridge_state(&entry.state);
                match known.get(&entry.serial) {
                    Some(device) => {
                        if device.state() != state {
                            device.set_state(state);
                            changed.push(Arc::clone(device));
                        }
                    }
                    None => {
                        let device = Arc::new(PolledDevice::new(
                            entry,
                            Arc::clone(&self.runner),
                            binary_path.clone(),
                        ));
                        known.insert(device.serial.clone(), Arc::clone(&device));
                        connected.push(device);
                    }
                }
            }
            known.retain(|serial, device| {
                if seen.contains(serial) {
                    true
                } else {
                    device.set_state(DeviceState::NotAvailable);
                    disconnected.push(Arc::clone(device));
                    false
                }
            });
        }

        // Deliver outside the registry lock; listeners may call back into
        // the bridge.
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in &listeners {
            for device in &connected {
                listener.device_connected(Arc::clone(device) as Arc<dyn RemoteDevice>);
            }
            for device in &changed {
                listener.device_changed(Arc::clone(device) as Arc<dyn RemoteDevice>, CHANGE_STATE);
            }
            for device in &disconnected {
                listener.device_disconnected(Arc::clone(device) as Arc<dyn RemoteDevice>);
            }
        }
    }
}

/// [`DebugBridge`] implementation backed by a listing-poll thread.
pub struct PollingBridge {
    shared: Arc<PollerShared>,
    poll_interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PollingBridge {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_poll_interval(runner, DEVICE_LIST_POLL_INTERVAL)
    }

    pub fn with_poll_interval(runner: Arc<dyn CommandRunner>, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                runner,
                binary_path: Mutex::new("adb".to_string()),
                listeners: Mutex::new(Vec::new()),
                known: Mutex::new(HashMap::new()),
                stop: StopSignal::new(),
            }),
            poll_interval,
            worker: Mutex::new(None),
        }
    }
}

impl DebugBridge for PollingBridge {
    fn init(&self, client_support: bool, binary_path: &str) {
        if client_support {
            debug!("client support requested but not implemented by the polling bridge");
        }
        *self.shared.binary_path.lock().unwrap() = binary_path.to_string();

        let shared = Arc::clone(&self.shared);
        let poll_interval = self.poll_interval;
        let worker = std::thread::Builder::new()
            .name("bridge-poller".to_string())
            .spawn(move || {
                info!("bridge poller started");
                loop {
                    if shared.stop.is_raised() {
                        break;
                    }
                    shared.poll_once();
                    if shared.stop.wait(poll_interval) {
                        break;
                    }
                }
                info!("bridge poller stopped");
            });
        match worker {
            Ok(handle) => *self.worker.lock().unwrap() = Some(handle),
            Err(err) => warn!(error = %err, "failed to start bridge poller"),
        }
    }

    fn add_listener(&self, listener: Arc<dyn DeviceChangeListener>) {
        self.shared.listeners.lock().unwrap().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn DeviceChangeListener>) {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .retain(|known| !Arc::ptr_eq(known, listener));
    }

    fn devices(&self) -> Vec<Arc<dyn RemoteDevice>> {
        self.shared
            .known
            .lock()
            .unwrap()
            .values()
            .map(|device| Arc::clone(device) as Arc<dyn RemoteDevice>)
            .collect()
    }

    fn terminate(&self) {
        self.shared.stop.raise();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }

    fn disconnect_bridge(&self) {
        // Abrupt variant: stop polling but do not wait for the thread.
        self.shared.stop.raise();
    }
}

impl Drop for PollingBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{ScriptedRunner, command_success};
    use std::sync::Mutex as StdMutex;

    const LISTING: &str = "List of devices attached\n\
        0123456789ABCDEF       device product:walleye model:Pixel_2 device:walleye transport_id:1\n\
        emulator-5554          offline\n\
        * daemon started successfully *\n";

    #[test]
    fn parses_listing_lines_and_properties() {
        let entries = parse_devices_listing(LISTING);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].serial, "0123456789ABCDEF");
        assert_eq!(entries[0].state, "device");
        assert_eq!(
            entries[0].properties.get("ro.product.device").map(String::as_str),
            Some("walleye")
        );
        assert_eq!(entries[1].serial, "emulator-5554");
        assert_eq!(entries[1].state, "offline");
    }

    #[derive(Default)]
    struct RecordingListener {
        events: StdMutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DeviceChangeListener for RecordingListener {
        fn device_connected(&self, device: Arc<dyn RemoteDevice>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("connect {}", device.serial()));
        }

        fn device_disconnected(&self, device: Arc<dyn RemoteDevice>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("disconnect {}", device.serial()));
        }

        fn device_changed(&self, device: Arc<dyn RemoteDevice>, change_mask: u32) {
            self.events.lock().unwrap().push(format!(
                "change {} {:?} mask={change_mask}",
                device.serial(),
                device.state()
            ));
        }
    }

    fn shared_with_runner(
        runner: Arc<ScriptedRunner>,
    ) -> (Arc<PollerShared>, Arc<RecordingListener>) {
        let bridge = PollingBridge::new(runner);
        let listener = Arc::new(RecordingListener::default());
        bridge.add_listener(Arc::clone(&listener) as Arc<dyn DeviceChangeListener>);
        (Arc::clone(&bridge.shared), listener)
    }

    #[test]
    fn poll_diffs_connect_change_disconnect() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_response(command_success(
            "SERIAL_A\tdevice\nSERIAL_B\toffline\n",
        ));
        runner.push_response(command_success("SERIAL_A\tdevice\nSERIAL_B\tdevice\n"));
        runner.push_response(command_success("SERIAL_B\tdevice\n"));
        let (shared, listener) = shared_with_runner(runner);

        shared.poll_once();
        shared.poll_once();
        shared.poll_once();

        let events = listener.events();
        assert!(events.contains(&"connect SERIAL_A".to_string()));
        assert!(events.contains(&"connect SERIAL_B".to_string()));
        assert!(events.contains(&format!("change SERIAL_B Online mask={CHANGE_STATE}")));
        assert!(events.contains(&"disconnect SERIAL_A".to_string()));
        assert_eq!(shared.known.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_listing_keeps_registry_untouched() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_response(command_success("SERIAL_A\tdevice\n"));
        runner.push_response(common::test_utils::command_failure("cannot connect"));
        let (shared, listener) = shared_with_runner(runner);

        shared.poll_once();
        shared.poll_once();

        assert_eq!(listener.events(), vec!["connect SERIAL_A".to_string()]);
        assert_eq!(shared.known.lock().unwrap().len(), 1);
    }
}
