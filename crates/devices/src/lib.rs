//! Device vocabulary for the test-harness allocator
//!
//! This crate defines the types shared by every layer of the allocator: the
//! device state and kind enums, the serial validity rule, the
//! [`RemoteDevice`] capability trait that abstracts the debug bridge's
//! device handles, the placeholder handle implementations, and the
//! selection filter used to pick devices out of the pool.

pub mod device;
pub mod error;
pub mod filter;
pub mod types;

pub use device::{DeviceDescription, NullDevice, RemoteDevice, StubDevice};
pub use error::{DeviceError, Result};
pub use filter::{
    DeviceSelectionOptions, KindRestriction, PRODUCT_TYPE_PROPERTY, PRODUCT_VARIANT_PROPERTY,
    SDK_VERSION_PROPERTY,
};
pub use types::{DeviceKind, DeviceState, FreeDeviceState, is_valid_serial};
