//! Device selection filtering
//!
//! A [`DeviceSelectionOptions`] is a stateless predicate over a device
//! handle. The default value is the match-anything sentinel used for plain
//! `allocate()` calls; builders narrow it down by serial, product
//! properties, device kind, or battery level.

use crate::device::RemoteDevice;
use crate::types::DeviceKind;

/// Property consulted for `--product-type` style matching.
pub const PRODUCT_TYPE_PROPERTY: &str = "ro.product.board";
/// Property consulted for product-variant matching.
pub const PRODUCT_VARIANT_PROPERTY: &str = "ro.product.device";
/// Property consulted for SDK level matching.
pub const SDK_VERSION_PROPERTY: &str = "ro.build.version.sdk";

/// Restriction on the kind of device a filter accepts.
///
/// A single enum rather than three independent flags so the restrictions
/// cannot contradict each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindRestriction {
    #[default]
    Any,
    /// Only emulators (placeholder slots or bridge-announced `emulator-*`)
    EmulatorOnly,
    /// Only real physical devices
    RealOnly,
    /// Only no-device placeholder slots
    NullOnly,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceSelectionOptions {
    serials: Vec<String>,
    exclude_serials: Vec<String>,
    product_types: Vec<String>,
    product_variants: Vec<String>,
    sdk_levels: Vec<u32>,
    kind: KindRestriction,
    min_battery: Option<u32>,
}

impl DeviceSelectionOptions {
    /// The sentinel filter: accepts every device, placeholders included.
    pub fn matches_any() -> Self {
        Self::default()
    }

    pub fn add_serial(mut self, serial: impl Into<String>) -> Self {
        self.serials.push(serial.into());
        self
    }

    pub fn exclude_serial(mut self, serial: impl Into<String>) -> Self {
        self.exclude_serials.push(serial.into());
        self
    }

    pub fn add_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_types.push(product_type.into());
        self
    }

    pub fn add_product_variant(mut self, variant: impl Into<String>) -> Self {
        self.product_variants.push(variant.into());
        self
    }

    pub fn add_sdk_level(mut self, level: u32) -> Self {
        self.sdk_levels.push(level);
        self
    }

    pub fn emulator_only(mut self) -> Self {
        self.kind = KindRestriction::EmulatorOnly;
        self
    }

    pub fn real_only(mut self) -> Self {
        self.kind = KindRestriction::RealOnly;
        self
    }

    pub fn null_only(mut self) -> Self {
        self.kind = KindRestriction::NullOnly;
        self
    }

    pub fn min_battery(mut self, level: u32) -> Self {
        self.min_battery = Some(level);
        self
    }

    /// Evaluate the predicate. A required property the device cannot report
    /// rejects the device rather than blocking on it.
    pub fn matches(&self, device: &dyn RemoteDevice) -> bool {
        let serial = device.serial();
        if !self.serials.is_empty() && !self.serials.iter().any(|s| s == serial) {
            return false;
        }
        if self.exclude_serials.iter().any(|s| s == serial) {
            return false;
        }

        match self.kind {
            KindRestriction::Any => {}
            KindRestriction::EmulatorOnly => {
                if !device.is_emulator() {
                    return false;
                }
            }
            KindRestriction::RealOnly => {
                if device.kind() != DeviceKind::Real || device.is_emulator() {
                    return false;
                }
            }
            KindRestriction::NullOnly => {
                if device.kind() != DeviceKind::NullStub {
                    return false;
                }
            }
        }

        if !self.product_types.is_empty() {
            match device.property(PRODUCT_TYPE_PROPERTY) {
                Some(value) => {
                    if !self.product_types.iter().any(|t| *t == value) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if !self.product_variants.is_empty() {
            match device.property(PRODUCT_VARIANT_PROPERTY) {
                Some(value) => {
                    if !self.product_variants.iter().any(|v| *v == value) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if !self.sdk_levels.is_empty() {
            let level = device
                .property(SDK_VERSION_PROPERTY)
                .and_then(|v| v.trim().parse::<u32>().ok());
            match level {
                Some(level) => {
                    if !self.sdk_levels.contains(&level) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        if let Some(min) = self.min_battery {
            match device.battery_level() {
                Some(level) => {
                    if level < min {
                        return false;
                    }
                }
                None => return false,
            }
        }

        true
    }
}
