//! Smoke harness for the device allocator
//!
//! Wires the real command runner and the polling bridge into a manager,
//! then prints pool snapshots for a while. Useful for checking discovery
//! and readiness probing against a live `adb` without a full test harness.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use allocator::bridge::{DebugBridge, PollingBridge};
use allocator::{DeviceManager, ManagerConfig};
use common::SystemRunner;
use devices::DeviceDescription;

#[derive(Debug, Parser)]
#[command(name = "smoke", about = "Exercise the device allocator against a live bridge")]
struct Args {
    /// Path to the debug-bridge binary
    #[arg(long, default_value = "adb")]
    adb: String,

    /// Path to the fastboot binary
    #[arg(long, default_value = "fastboot")]
    fastboot: String,

    /// Emulator placeholder slots
    #[arg(long, default_value_t = 1)]
    emulators: usize,

    /// No-device placeholder slots
    #[arg(long, default_value_t = 1)]
    null_devices: usize,

    /// Optional TOML config file; overrides the flags above
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long to watch the pool before terminating
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,

    /// Seconds between snapshots
    #[arg(long, default_value_t = 2)]
    snapshot_secs: u64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    common::setup_logging(&args.log_level)?;

    let config = match &args.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig {
            adb_path: args.adb.clone(),
            fastboot_path: args.fastboot.clone(),
            num_emulators: args.emulators,
            num_null_devices: args.null_devices,
            ..ManagerConfig::default()
        },
    };

    let runner = Arc::new(SystemRunner::new());
    let bridge = Arc::new(PollingBridge::new(runner.clone()));
    let manager = DeviceManager::new(bridge.clone(), runner, config);
    manager.init()?;

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    while Instant::now() < deadline {
        let visible: Vec<DeviceDescription> = bridge
            .devices()
            .iter()
            .map(|device| DeviceDescription::of(device.as_ref()))
            .collect();
        let snapshot = serde_json::json!({
            "visible": visible,
            "available": manager.available_serials()?,
            "allocated": manager.allocated_serials()?,
            "unavailable": manager.unavailable_serials()?,
        });
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        thread::sleep(Duration::from_secs(args.snapshot_secs));
    }

    manager.terminate()?;
    Ok(())
}
