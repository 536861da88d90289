//! Configuration types for the EVA client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EvaError, Result};

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaConfig {
    /// Event channel (WebSocket) settings.
    pub channel: ChannelConfig,
    /// Voice session settings.
    pub session: SessionConfig,
    /// Speech synthesis settings.
    pub speech: SpeechConfig,
    /// Preference store settings.
    pub preferences: PreferencesConfig,
}

/// Event channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket URL of the assistant server, e.g. `ws://127.0.0.1:5000/ws`.
    pub server_url: String,
    /// Base reconnect delay in milliseconds. Doubles per failed attempt.
    pub reconnect_base_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds.
    pub reconnect_max_ms: u64,
    /// Keepalive ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Ask the server for the current listening state after every connect.
    ///
    /// When disabled the client assumes idle and waits for the server to
    /// correct it with an `activated` event.
    pub query_status_on_connect: bool,
    /// How long to wait for the `status` answer before assuming idle, in
    /// milliseconds.
    pub status_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000/ws".to_owned(),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            ping_interval_secs: 30,
            query_status_on_connect: true,
            status_timeout_ms: 2_000,
        }
    }
}

impl ChannelConfig {
    /// Reconnect delay for the given (1-based) failed attempt.
    ///
    /// Exponential backoff capped at [`reconnect_max_ms`](Self::reconnect_max_ms).
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.reconnect_base_ms.max(1));
        let max = Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_base_ms));
        base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(5)))
            .min(max)
    }

    /// Status handshake wait as a [`Duration`].
    #[must_use]
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Keepalive ping interval (never zero).
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

/// Voice session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an activation/deactivation may stay pending before it is
    /// treated as failed, in milliseconds.
    pub pending_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Pending timeout as a [`Duration`].
    #[must_use]
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms.max(1))
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Whether spoken replies are available at all.
    pub enabled: bool,
    /// Explicit TTS program (None = first of `say`, `spd-say`, `espeak-ng`,
    /// `espeak` found on `PATH`).
    pub command: Option<String>,
    /// Speaking rate in words per minute (None = program default).
    pub rate: Option<u32>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            rate: None,
        }
    }
}

/// Preference store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Preference file path (None = [`crate::eva_dirs::preferences_file`]).
    pub path: Option<PathBuf>,
}

impl PreferencesConfig {
    /// Effective preference file path.
    #[must_use]
    pub fn effective_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(crate::eva_dirs::preferences_file)
    }
}

impl EvaConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EvaError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| EvaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/eva/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::eva_dirs::config_file()
    }
}
