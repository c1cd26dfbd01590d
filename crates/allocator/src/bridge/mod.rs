//! Debug-bridge capability
//!
//! The allocator does not talk to the debug bridge directly; it consumes
//! the [`DebugBridge`] capability and reacts to [`DeviceChangeListener`]
//! callbacks. [`PollingBridge`] is a small concrete implementation that
//! drives the bridge binary through the command runner; production
//! harnesses may plug in a richer client.

mod polling;

use std::sync::Arc;
use std::time::Duration;

use devices::RemoteDevice;

pub use polling::PollingBridge;

/// Bit in the `device_changed` mask indicating the connection state moved.
pub const CHANGE_STATE: u32 = 1 << 0;

/// Timeout applied to individual bridge operations.
pub const DEFAULT_BRIDGE_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Presence and state callbacks delivered by the bridge.
///
/// Implementations may assume callbacks arrive serially from a single
/// bridge thread; a bridge that delivers from several threads must
/// serialize before invoking the listener.
pub trait DeviceChangeListener: Send + Sync {
    fn device_connected(&self, device: Arc<dyn RemoteDevice>);

    fn device_disconnected(&self, device: Arc<dyn RemoteDevice>);

    /// `change_mask` carries [`CHANGE_STATE`] when the connection state is
    /// what changed.
    fn device_changed(&self, device: Arc<dyn RemoteDevice>, change_mask: u32);
}

/// The external debug-bridge service.
pub trait DebugBridge: Send + Sync {
    /// Connect to the bridge and begin discovery. Listeners registered
    /// before this call observe the initial discovery burst.
    fn init(&self, client_support: bool, binary_path: &str);

    fn add_listener(&self, listener: Arc<dyn DeviceChangeListener>);

    fn remove_listener(&self, listener: &Arc<dyn DeviceChangeListener>);

    /// Snapshot of every device currently visible to the bridge.
    fn devices(&self) -> Vec<Arc<dyn RemoteDevice>>;

    /// Stop discovery and release bridge resources.
    fn terminate(&self);

    /// Drop the bridge connection abruptly, without an orderly shutdown.
    fn disconnect_bridge(&self);
}
