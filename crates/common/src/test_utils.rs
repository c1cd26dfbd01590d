//! Test utilities for the allocator workspace
//!
//! Provides mock implementations shared by unit and integration tests: a
//! scripted command runner and a fake bridge device with settable state.
//!
//! # Example
//!
//! ```
//! use common::test_utils::FakeDevice;
//! use devices::{DeviceState, RemoteDevice};
//!
//! let device = FakeDevice::online("SERIAL_A");
//! assert_eq!(device.state(), DeviceState::Online);
//! device.set_state(DeviceState::Offline);
//! assert_eq!(device.state(), DeviceState::Offline);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use devices::{DeviceError, DeviceKind, DeviceState, RemoteDevice};

use crate::runner::{CommandResult, CommandRunner, CommandStatus};

/// Build a successful [`CommandResult`] with the given stdout.
pub fn command_success(stdout: &str) -> CommandResult {
    CommandResult {
        status: CommandStatus::Success,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Build a failed [`CommandResult`] with the given stderr.
pub fn command_failure(stderr: &str) -> CommandResult {
    CommandResult {
        status: CommandStatus::Failed,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// A [`CommandRunner`] that replays scripted results instead of spawning
/// processes.
///
/// Queued results are returned first, in order; once the queue is empty the
/// default result is cloned for every call. `sleep` is a no-op so retry
/// loops complete instantly, and every invocation is recorded for
/// assertions.
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<CommandResult>>,
    default: Mutex<CommandResult>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default: Mutex::new(command_success("")),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-shot result.
    pub fn push_response(&self, result: CommandResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    /// Set the result returned once the queue is drained.
    pub fn set_default(&self, result: CommandResult) {
        *self.default.lock().unwrap() = result;
    }

    /// Every argv this runner has seen, oldest first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, _timeout: Duration, argv: &[&str]) -> CommandResult {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => self.default.lock().unwrap().clone(),
        }
    }

    fn sleep(&self, _duration: Duration) {}
}

/// A bridge device handle with externally settable state and properties.
pub struct FakeDevice {
    serial: String,
    kind: DeviceKind,
    state: Mutex<DeviceState>,
    properties: Mutex<HashMap<String, String>>,
    battery: Mutex<Option<u32>>,
    shell_responses: Mutex<HashMap<String, String>>,
}

impl FakeDevice {
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        Self {
            serial: serial.into(),
            kind: DeviceKind::Real,
            state: Mutex::new(state),
            properties: Mutex::new(HashMap::new()),
            battery: Mutex::new(None),
            shell_responses: Mutex::new(HashMap::new()),
        }
    }

    pub fn online(serial: impl Into<String>) -> Self {
        Self::new(serial, DeviceState::Online)
    }

    pub fn set_state(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_property(&self, name: &str, value: &str) {
        self.properties
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_battery_level(&self, level: Option<u32>) {
        *self.battery.lock().unwrap() = level;
    }

    /// Script the output of a shell command. Unscripted commands fail with
    /// [`DeviceError::Shell`].
    pub fn set_shell_response(&self, command: &str, output: &str) {
        self.shell_responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }
}

impl RemoteDevice for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn property(&self, name: &str) -> Option<String> {
        self.properties.lock().unwrap().get(name).cloned()
    }

    fn battery_level(&self) -> Option<u32> {
        *self.battery.lock().unwrap()
    }

    fn shell(&self, command: &str) -> Result<String, DeviceError> {
        match self.shell_responses.lock().unwrap().get(command) {
            Some(output) => Ok(output.clone()),
            None => Err(DeviceError::Shell {
                serial: self.serial.clone(),
                message: format!("unscripted shell command: {command}"),
            }),
        }
    }
}
