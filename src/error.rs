//! Error types for the EVA client core.

use std::fmt;

/// Top-level error type for the client core.
#[derive(Debug, thiserror::Error)]
pub enum EvaError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Event channel error (connect, send, closed peer).
    #[error("channel error: {0}")]
    Channel(String),

    /// Preference validation or storage error.
    #[error("preferences error: {0}")]
    Preferences(#[from] crate::preferences::PreferenceError),

    /// Speech synthesis error.
    #[error("speech error: {0}")]
    Speech(#[from] crate::speech::SpeechError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EvaError>;

/// User-facing error categories delivered through
/// [`Presentation::on_error`](crate::client::Presentation::on_error).
///
/// Transport and storage failures are translated into one of these at the
/// collaborator boundary; none of them is fatal to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An intent was requested with no live connection. The intent is dropped.
    ChannelUnavailable,
    /// An activation did not confirm in time. The session reverted to idle.
    ActivationTimeout,
    /// A deactivation did not confirm in time. The session reverted to active.
    DeactivationTimeout,
    /// Speech synthesis is not available in this environment.
    SpeechUnsupported,
    /// Stored preferences were unreadable and defaults were substituted.
    MalformedPreferences,
}

impl ErrorKind {
    /// Stable identifier for logs and presentation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChannelUnavailable => "channel_unavailable",
            Self::ActivationTimeout => "activation_timeout",
            Self::DeactivationTimeout => "deactivation_timeout",
            Self::SpeechUnsupported => "speech_unsupported",
            Self::MalformedPreferences => "malformed_preferences",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
