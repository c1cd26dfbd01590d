//! Allocator configuration

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Path to the debug-bridge binary
    #[serde(default = "ManagerConfig::default_adb_path")]
    pub adb_path: String,
    /// Path to the fastboot binary
    #[serde(default = "ManagerConfig::default_fastboot_path")]
    pub fastboot_path: String,
    /// Emulator placeholder slots seeded into the pool at init
    #[serde(default = "ManagerConfig::default_slot_count")]
    pub num_emulators: usize,
    /// No-device placeholder slots seeded into the pool at init
    #[serde(default = "ManagerConfig::default_slot_count")]
    pub num_null_devices: usize,
    /// Whether allocated devices start background log capture
    #[serde(default = "ManagerConfig::default_enable_log_capture")]
    pub enable_log_capture: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            adb_path: Self::default_adb_path(),
            fastboot_path: Self::default_fastboot_path(),
            num_emulators: Self::default_slot_count(),
            num_null_devices: Self::default_slot_count(),
            enable_log_capture: Self::default_enable_log_capture(),
        }
    }
}

impl ManagerConfig {
    fn default_adb_path() -> String {
        "adb".to_string()
    }

    fn default_fastboot_path() -> String {
        "fastboot".to_string()
    }

    fn default_slot_count() -> usize {
        1
    }

    fn default_enable_log_capture() -> bool {
        true
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = ManagerConfig::default();
        assert_eq!(config.adb_path, "adb");
        assert_eq!(config.num_emulators, 1);
        assert_eq!(config.num_null_devices, 1);
        assert!(config.enable_log_capture);
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "adb_path = \"/opt/sdk/adb\"\nnum_emulators = 4").unwrap();

        let config = ManagerConfig::load(file.path()).unwrap();
        assert_eq!(config.adb_path, "/opt/sdk/adb");
        assert_eq!(config.num_emulators, 4);
        assert_eq!(config.num_null_devices, 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ManagerConfig::load(Path::new("/does/not/exist.toml")).is_err());
    }
}
