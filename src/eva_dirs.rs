//! Centralized application directory paths for EVA.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/eva/` | `~/.local/share/eva/` |
//! | Config | `~/Library/Application Support/eva/` | `~/.config/eva/` |
//!
//! # Environment Overrides
//!
//! - `EVA_DATA_DIR` overrides [`data_dir`]
//! - `EVA_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/eva/` by default. Override with the
/// `EVA_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("EVA_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("eva"))
        .unwrap_or_else(|| PathBuf::from("/tmp/eva-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/eva/` by default. Override with the
/// `EVA_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("EVA_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("eva"))
        .unwrap_or_else(|| PathBuf::from("/tmp/eva-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Preference store file path (`data_dir()/preferences.json`).
#[must_use]
pub fn preferences_file() -> PathBuf {
    data_dir().join("preferences.json")
}

/// Transcript export directory (`data_dir()/exports`).
#[must_use]
pub fn exports_dir() -> PathBuf {
    data_dir().join("exports")
}

/// Timestamped transcript export path, e.g.
/// `exports/eva-chat-20260115-093012.txt`.
#[must_use]
pub fn export_file(at: chrono::DateTime<chrono::Local>) -> PathBuf {
    exports_dir().join(format!("eva-chat-{}.txt", at.format("%Y%m%d-%H%M%S")))
}
