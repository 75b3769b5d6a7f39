//! Path utilities for UaDI configuration files

use std::path::PathBuf;

/// Name of the default configuration file
pub const CONFIG_FILE_NAME: &str = "uadi.yaml";

/// Get the default configuration directory
///
/// Returns: `~/.config/uadi` (platform config dir, falling back to `.`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("uadi")
}

/// Get the default config file path
///
/// Returns: `~/.config/uadi/uadi.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}
