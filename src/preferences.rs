//! Durable user preferences.
//!
//! Preferences are stored as one JSON document under [`PREFERENCES_KEY`] in a
//! [`KeyValueStore`]. They are read once at startup with [`PreferenceStore::load`]
//! and written through on every [`PreferenceStore::set`]; nothing re-reads the
//! store afterwards.
//!
//! Reading is lenient: each field is decoded on its own, so one bad field
//! falls back to its default without discarding the others. Booleans follow
//! "anything but an explicit `false` is enabled".

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ErrorKind;

/// Key under which the preference document is stored.
pub const PREFERENCES_KEY: &str = "eva_preferences";

/// Colour theme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dark" => Some(Self::Dark),
            "light" => Some(Self::Light),
            _ => None,
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-chosen settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub theme: Theme,
    pub voice_response_enabled: bool,
    pub auto_scroll_enabled: bool,
    pub notifications_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            voice_response_enabled: true,
            auto_scroll_enabled: true,
            notifications_enabled: true,
        }
    }
}

impl Preferences {
    /// Decode a stored preference document field by field.
    ///
    /// Returns the decoded preferences and whether anything had to be
    /// substituted because it was unreadable.
    fn from_document(doc: &Value) -> (Self, bool) {
        let Some(map) = doc.as_object() else {
            return (Self::default(), true);
        };
        let mut malformed = false;

        let theme = match map.get("theme") {
            None => Theme::default(),
            Some(Value::String(raw)) => Theme::parse(raw).unwrap_or_else(|| {
                malformed = true;
                Theme::default()
            }),
            Some(_) => {
                malformed = true;
                Theme::default()
            }
        };

        let mut flag = |names: &[&str]| -> bool {
            match names.iter().find_map(|name| map.get(*name)) {
                None => true,
                Some(Value::Bool(on)) => *on,
                Some(_) => {
                    malformed = true;
                    true
                }
            }
        };

        let prefs = Self {
            theme,
            voice_response_enabled: flag(&["voiceResponseEnabled", "voiceResponse"]),
            auto_scroll_enabled: flag(&["autoScrollEnabled", "autoScroll"]),
            notifications_enabled: flag(&["notificationsEnabled", "notifications"]),
        };
        (prefs, malformed)
    }

    /// Value of a single preference.
    #[must_use]
    pub fn get(&self, key: PreferenceKey) -> PreferenceValue {
        match key {
            PreferenceKey::Theme => PreferenceValue::Theme(self.theme),
            PreferenceKey::VoiceResponseEnabled => PreferenceValue::Bool(self.voice_response_enabled),
            PreferenceKey::AutoScrollEnabled => PreferenceValue::Bool(self.auto_scroll_enabled),
            PreferenceKey::NotificationsEnabled => PreferenceValue::Bool(self.notifications_enabled),
        }
    }

    fn apply(&mut self, key: PreferenceKey, value: PreferenceValue) -> Result<(), PreferenceError> {
        match (key, value) {
            (PreferenceKey::Theme, PreferenceValue::Theme(theme)) => self.theme = theme,
            (PreferenceKey::VoiceResponseEnabled, PreferenceValue::Bool(on)) => {
                self.voice_response_enabled = on;
            }
            (PreferenceKey::AutoScrollEnabled, PreferenceValue::Bool(on)) => {
                self.auto_scroll_enabled = on;
            }
            (PreferenceKey::NotificationsEnabled, PreferenceValue::Bool(on)) => {
                self.notifications_enabled = on;
            }
            (key, value) => return Err(PreferenceError::InvalidValue { key, value }),
        }
        Ok(())
    }
}

/// Recognised preference keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    Theme,
    VoiceResponseEnabled,
    AutoScrollEnabled,
    NotificationsEnabled,
}

impl PreferenceKey {
    pub const ALL: [Self; 4] = [
        Self::Theme,
        Self::VoiceResponseEnabled,
        Self::AutoScrollEnabled,
        Self::NotificationsEnabled,
    ];

    /// Render key to its stored name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::VoiceResponseEnabled => "voiceResponseEnabled",
            Self::AutoScrollEnabled => "autoScrollEnabled",
            Self::NotificationsEnabled => "notificationsEnabled",
        }
    }

    /// Parse a key from its stored name or snake_case form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "theme" => Some(Self::Theme),
            "voiceResponseEnabled" | "voice_response_enabled" => Some(Self::VoiceResponseEnabled),
            "autoScrollEnabled" | "auto_scroll_enabled" => Some(Self::AutoScrollEnabled),
            "notificationsEnabled" | "notifications_enabled" => Some(Self::NotificationsEnabled),
            _ => None,
        }
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A preference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceValue {
    Theme(Theme),
    Bool(bool),
}

impl PreferenceValue {
    /// Parse a textual value for `key` (e.g. from a settings command line).
    pub fn parse_for(key: PreferenceKey, raw: &str) -> Result<Self, PreferenceError> {
        let invalid = || PreferenceError::Unparsable {
            key,
            raw: raw.to_owned(),
        };
        match key {
            PreferenceKey::Theme => Theme::parse(raw).map(Self::Theme).ok_or_else(invalid),
            _ => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(Self::Bool(true)),
                "false" | "off" | "no" | "0" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
        }
    }
}

impl fmt::Display for PreferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Theme(theme) => write!(f, "{theme}"),
            Self::Bool(on) => write!(f, "{on}"),
        }
    }
}

/// Preference validation and storage errors.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("unknown preference `{0}`")]
    UnknownKey(String),

    #[error("preference `{key}` does not accept {value}")]
    InvalidValue {
        key: PreferenceKey,
        value: PreferenceValue,
    },

    #[error("cannot parse `{raw}` as a value for `{key}`")]
    Unparsable { key: PreferenceKey, raw: String },

    #[error("preference storage failed: {0}")]
    Storage(String),
}

/// Durable string key/value storage.
pub trait KeyValueStore: Send {
    /// Read a value. `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;

    /// Write a value durably before returning.
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

/// A [`KeyValueStore`] backed by a JSON object file.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write never leaves a truncated file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, PreferenceError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(PreferenceError::Storage(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            PreferenceError::Storage(format!("parse {}: {e}", self.path.display()))
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        // An unreadable file is replaced rather than blocking every write.
        let mut map = self.read_map().unwrap_or_default();
        map.insert(key.to_owned(), value.to_owned());

        let storage = |what: &str, e: std::io::Error| {
            PreferenceError::Storage(format!("{what} {}: {e}", self.path.display()))
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| storage("create dir for", e))?;
        }
        let content = serde_json::to_string_pretty(&map)
            .map_err(|e| PreferenceError::Storage(format!("encode: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| storage("write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| storage("rename into", e))?;
        Ok(())
    }
}

/// In-process [`KeyValueStore`], used by tests and ephemeral front ends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        let values = match self.values.lock() {
            Ok(v) => v,
            Err(p) => p.into_inner(),
        };
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut values = match self.values.lock() {
            Ok(v) => v,
            Err(p) => p.into_inner(),
        };
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Owns the current [`Preferences`] and writes them through to a store.
pub struct PreferenceStore {
    store: Box<dyn KeyValueStore>,
    current: Preferences,
}

impl PreferenceStore {
    /// Wrap `store` with default preferences. Call [`load`](Self::load) once
    /// at startup to pick up saved values.
    #[must_use]
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            current: Preferences::default(),
        }
    }

    /// Read saved preferences. Never fails: absent or unreadable data yields
    /// defaults.
    pub fn load(&mut self) -> Preferences {
        self.current = match self.store.get(PREFERENCES_KEY) {
            Ok(None) => {
                debug!("no saved preferences; using defaults");
                Preferences::default()
            }
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(doc) => {
                    let (prefs, malformed) = Preferences::from_document(&doc);
                    if malformed {
                        warn!(
                            kind = %ErrorKind::MalformedPreferences,
                            "some saved preferences were unreadable; defaults substituted"
                        );
                    }
                    prefs
                }
                Err(e) => {
                    warn!(
                        kind = %ErrorKind::MalformedPreferences,
                        error = %e,
                        "saved preferences are not valid JSON; using defaults"
                    );
                    Preferences::default()
                }
            },
            Err(e) => {
                warn!(
                    kind = %ErrorKind::MalformedPreferences,
                    error = %e,
                    "preference store unreadable; using defaults"
                );
                Preferences::default()
            }
        };
        self.current
    }

    #[must_use]
    pub fn current(&self) -> Preferences {
        self.current
    }

    /// Set one preference by name, persist, and return the full set.
    ///
    /// # Errors
    ///
    /// [`PreferenceError::UnknownKey`] for unrecognised names (nothing
    /// changes). [`PreferenceError::Storage`] if persisting failed; the
    /// in-memory value is updated regardless.
    pub fn set(&mut self, key: &str, value: PreferenceValue) -> Result<Preferences, PreferenceError> {
        let key = PreferenceKey::parse(key).ok_or_else(|| PreferenceError::UnknownKey(key.to_owned()))?;
        self.set_key(key, value)
    }

    /// Typed form of [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set); additionally [`PreferenceError::InvalidValue`]
    /// when the value type does not match the key.
    pub fn set_key(
        &mut self,
        key: PreferenceKey,
        value: PreferenceValue,
    ) -> Result<Preferences, PreferenceError> {
        let mut next = self.current;
        next.apply(key, value)?;
        self.current = next;
        debug!(key = %key, value = %value, "preference updated");
        self.persist()?;
        Ok(self.current)
    }

    /// Flip between dark and light.
    ///
    /// # Errors
    ///
    /// [`PreferenceError::Storage`] if persisting failed.
    pub fn toggle_theme(&mut self) -> Result<Preferences, PreferenceError> {
        let theme = self.current.theme.toggled();
        self.set_key(PreferenceKey::Theme, PreferenceValue::Theme(theme))
    }

    fn persist(&self) -> Result<(), PreferenceError> {
        let doc = serde_json::to_string(&self.current)
            .map_err(|e| PreferenceError::Storage(format!("encode: {e}")))?;
        self.store.set(PREFERENCES_KEY, &doc)
    }
}
