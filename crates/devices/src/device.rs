//! The bridge-side device handle capability and placeholder implementations

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};
use crate::types::{DeviceKind, DeviceState};

/// The capability a device handle exposes to the allocator.
///
/// Handles for real devices are produced by the debug bridge; placeholder
/// handles ([`StubDevice`], [`NullDevice`]) are produced by the allocator
/// itself. Property and battery reads must complete within a short bounded
/// interval; an implementation that cannot answer in time returns `None`
/// rather than blocking the caller.
pub trait RemoteDevice: Send + Sync {
    /// The stable identity of the device. Survives handle re-issue.
    fn serial(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// The bridge-visible state at the time of the call.
    fn state(&self) -> DeviceState;

    /// Read a system property. `None` when the device is not online or the
    /// property is unset.
    fn property(&self, name: &str) -> Option<String>;

    /// Current battery charge in percent, if the device can report it.
    fn battery_level(&self) -> Option<u32>;

    /// Run a shell command on the device and return its output.
    fn shell(&self, command: &str) -> Result<String>;

    /// Whether this handle refers to an emulator. Covers both the emulator
    /// placeholder slots and real emulators announced by the bridge, which
    /// share the deterministic `emulator-<port>` serials one-to-one.
    fn is_emulator(&self) -> bool {
        self.kind() == DeviceKind::EmulatorStub || self.serial().starts_with("emulator-")
    }
}

/// Placeholder handle for an allocation slot with no backing bridge device.
///
/// Used for the deterministic emulator slots seeded at init and for the
/// pre-registered tcp serials during a transport switch.
#[derive(Debug, Clone)]
pub struct StubDevice {
    serial: String,
    kind: DeviceKind,
}

impl StubDevice {
    pub fn emulator(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            kind: DeviceKind::EmulatorStub,
        }
    }

    pub fn tcp(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            kind: DeviceKind::TcpStub,
        }
    }
}

impl RemoteDevice for StubDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn state(&self) -> DeviceState {
        DeviceState::NotAvailable
    }

    fn property(&self, _name: &str) -> Option<String> {
        None
    }

    fn battery_level(&self) -> Option<u32> {
        None
    }

    fn shell(&self, _command: &str) -> Result<String> {
        Err(DeviceError::NotAvailable(self.serial.clone()))
    }
}

/// Placeholder handle for a "no device required" test slot.
#[derive(Debug, Clone)]
pub struct NullDevice {
    serial: String,
}

impl NullDevice {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl RemoteDevice for NullDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::NullStub
    }

    fn state(&self) -> DeviceState {
        DeviceState::NotAvailable
    }

    fn property(&self, _name: &str) -> Option<String> {
        None
    }

    fn battery_level(&self) -> Option<u32> {
        None
    }

    fn shell(&self, _command: &str) -> Result<String> {
        Err(DeviceError::NotAvailable(self.serial.clone()))
    }
}

/// Serializable snapshot of a device handle for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub serial: String,
    pub state: DeviceState,
    pub kind: DeviceKind,
}

impl DeviceDescription {
    pub fn of(device: &dyn RemoteDevice) -> Self {
        Self {
            serial: device.serial().to_string(),
            state: device.state(),
            kind: device.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulator_stub_counts_as_emulator() {
        let stub = StubDevice::emulator("emulator-5554");
        assert!(stub.is_emulator());
        assert_eq!(stub.kind(), DeviceKind::EmulatorStub);
    }

    #[test]
    fn tcp_stub_is_not_an_emulator() {
        let stub = StubDevice::tcp("192.168.0.7:5555");
        assert!(!stub.is_emulator());
        assert_eq!(stub.kind(), DeviceKind::TcpStub);
    }

    #[test]
    fn placeholders_reject_shell_commands() {
        let null = NullDevice::new("null-device-0");
        assert!(matches!(
            null.shell("id"),
            Err(DeviceError::NotAvailable(_))
        ));
    }
}
