//! Device state and classification types

use serde::{Deserialize, Serialize};

/// Connection state of a test target as seen through the debug bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Device is online and responds to the shell protocol
    Online,
    /// Device is visible but not responding
    Offline,
    /// Device is in recovery mode
    Recovery,
    /// Device is in the firmware-flashing (fastboot) protocol
    Fastboot,
    /// Device is no longer visible to the bridge
    NotAvailable,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Recovery => "recovery",
            DeviceState::Fastboot => "fastboot",
            DeviceState::NotAvailable => "not_available",
        }
    }

    /// Map a state token from a `devices` listing to a [`DeviceState`].
    ///
    /// Anything the bridge reports that the allocator cannot use for testing
    /// (unauthorized, sideload, ...) collapses to [`DeviceState::NotAvailable`].
    pub fn from_bridge_state(token: &str) -> DeviceState {
        match token {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "recovery" => DeviceState::Recovery,
            "bootloader" | "fastboot" => DeviceState::Fastboot,
            _ => DeviceState::NotAvailable,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, DeviceState::Online)
    }
}

/// What a device handle actually refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// A real device announced by the bridge
    Real,
    /// Placeholder slot for an emulator that may not be running yet
    EmulatorStub,
    /// Placeholder slot for a test that needs no device at all
    NullStub,
    /// Stub pre-registered for a device expected to appear on a tcp serial
    TcpStub,
}

impl DeviceKind {
    /// Placeholders and stubs are hidden from diagnostic listings.
    pub fn is_stub(&self) -> bool {
        !matches!(self, DeviceKind::Real)
    }
}

/// State a consumer hands back together with a freed device. Decides whether
/// the device re-enters the available pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreeDeviceState {
    /// Device is fine; return it to the pool
    Available,
    /// Device is broken; drop it until the bridge re-announces it
    Unavailable,
    /// Device stopped responding but may come back; returned to the pool
    Unresponsive,
    /// Caller takes responsibility; do not re-add
    Ignore,
}

/// A serial is usable iff it is longer than one character and contains no `?`.
/// The bridge reports garbage serials for half-enumerated devices.
pub fn is_valid_serial(serial: &str) -> bool {
    serial.len() > 1 && !serial.contains('?')
}
