//! Device allocation manager for concurrent test invocations
//!
//! A long-lived, process-wide pool of mobile/emulator test targets. Devices
//! discovered through the debug bridge are vetted by a readiness probe
//! before entering the pool, handed out to concurrent consumers through a
//! condition-filtered blocking queue, and reconciled against fastboot mode
//! by a background monitor.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use allocator::bridge::PollingBridge;
//! use allocator::{DeviceManager, ManagerConfig};
//! use common::SystemRunner;
//! use devices::FreeDeviceState;
//!
//! let runner = Arc::new(SystemRunner::new());
//! let bridge = Arc::new(PollingBridge::new(runner.clone()));
//! let manager = DeviceManager::new(bridge, runner, ManagerConfig::default());
//! manager.init().unwrap();
//!
//! if let Some(device) = manager.allocate_timeout(Duration::from_secs(30)).unwrap() {
//!     // run a test against `device` ...
//!     manager.free(&device, FreeDeviceState::Available).unwrap();
//! }
//! manager.terminate().unwrap();
//! ```

pub mod bridge;
pub mod config;
pub mod fastboot;
pub mod manager;
pub mod monitor;
pub mod queue;
pub mod recovery;
mod stop;
pub mod test_device;

pub use config::ManagerConfig;
pub use fastboot::{FastbootListener, parse_fastboot_devices};
pub use manager::{DeviceManager, ManagerError, Result, global, install_global};
pub use monitor::DeviceStateMonitor;
pub use queue::ConditionBlockingQueue;
pub use recovery::{AbortRecovery, RecoveryStrategy, WaitForOnlineRecovery};
pub use test_device::TestDevice;
