//! EVA: client core for a voice-controlled assistant.
//!
//! This crate holds everything a front end needs to talk to a remote EVA
//! assistant server over a persistent event channel:
//!
//! - **Voice session**: the listening-state machine and its reconciliation
//!   with server-confirmed state ([`session`])
//! - **Dispatcher**: typed commands out, replies in, transcript and speech
//!   ([`dispatcher`], [`transcript`], [`speech`])
//! - **Preferences**: durable user settings ([`preferences`])
//! - **Channel**: auto-reconnecting WebSocket transport ([`channel`])
//! - **Reactor**: [`EvaClient`], which wires the above together and calls
//!   into the front end through [`Presentation`]

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod eva_dirs;
pub mod preferences;
pub mod session;
pub mod speech;
pub mod transcript;

pub use channel::{ChannelEvent, ClientEvent, ServerEvent, Transport, WsChannel};
pub use client::{EvaClient, Notification, NotificationLevel, Presentation, UserInput};
pub use config::EvaConfig;
pub use error::{ErrorKind, EvaError, Result};
pub use preferences::{PreferenceStore, Preferences, Theme};
pub use session::{Origin, Phase, VoiceSession};
pub use transcript::{Speaker, TranscriptEntry};
