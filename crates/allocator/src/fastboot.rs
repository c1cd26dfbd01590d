//! Fastboot (firmware-flashing mode) monitoring
//!
//! Devices in fastboot mode disappear from the debug bridge, so the
//! allocator reconciles them through the fastboot binary instead. A single
//! background thread polls `fastboot devices` while at least one listener
//! is registered; polling indiscriminately is avoided because the command
//! can wedge on some host setups.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use common::CommandRunner;
use regex::Regex;
use tracing::{trace, warn};

use crate::manager::DeviceManager;
use crate::stop::StopSignal;

/// Max wait for a `fastboot devices` invocation to complete.
pub(crate) const FASTBOOT_CMD_TIMEOUT: Duration = Duration::from_secs(60);
/// Time between fastboot device listings.
pub(crate) const FASTBOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Max wait for the availability probe (`fastboot help`) at init.
pub(crate) const FASTBOOT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback notified at the end of every fastboot poll cycle.
pub trait FastbootListener: Send + Sync {
    fn state_updated(&self);
}

/// Serials present in a `fastboot devices` listing.
///
/// Each occurrence of word characters, whitespace, and the literal
/// `fastboot` contributes one serial.
pub fn parse_fastboot_devices(output: &str) -> HashSet<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"([\w\d]+)\s+fastboot\s*").unwrap());
    pattern
        .captures_iter(output)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Handle to the running monitor thread.
pub(crate) struct FastbootMonitor {
    stop: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl FastbootMonitor {
    /// Spawn the monitor thread. It holds only a weak reference to the
    /// manager and exits on its own if the manager goes away.
    pub fn start(
        manager: Weak<DeviceManager>,
        runner: Arc<dyn CommandRunner>,
        fastboot_path: String,
    ) -> Self {
        let stop = Arc::new(StopSignal::new());
        let thread_stop = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name("fastboot-monitor".to_string())
            .spawn(move || run_monitor(manager, runner, fastboot_path, thread_stop))
            .ok();
        if worker.is_none() {
            warn!("failed to start fastboot monitor thread");
        }
        Self { stop, worker }
    }

    /// Signal the thread and wait for it to exit. Returns within roughly
    /// one poll interval.
    pub fn terminate(mut self) {
        self.stop.raise();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_monitor(
    manager: Weak<DeviceManager>,
    runner: Arc<dyn CommandRunner>,
    fastboot_path: String,
    stop: Arc<StopSignal>,
) {
    loop {
        // Termination can race the wake-up; skip the cycle's command work
        // rather than running one last poll against a dead manager.
        if stop.is_raised() {
            return;
        }
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if manager.has_fastboot_listeners() {
            let result = runner.run(FASTBOOT_CMD_TIMEOUT, &[&fastboot_path, "devices"]);
            if result.success() {
                trace!(output = %result.stdout.trim(), "fastboot devices listing");
                let serials = parse_fastboot_devices(&result.stdout);
                manager.reconcile_fastboot_states(&serials);
            } else {
                warn!(stderr = %result.stderr.trim(), "fastboot devices command failed");
            }
            // Snapshot before invoking to avoid deadlocks with listeners
            // that register or unregister from the callback.
            for listener in manager.fastboot_listeners_snapshot() {
                listener.state_updated();
            }
        }
        drop(manager);
        if stop.wait(FASTBOOT_POLL_INTERVAL) {
            return;
        }
    }
}
