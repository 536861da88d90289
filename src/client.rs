//! Client reactor.
//!
//! [`EvaClient`] owns the voice session, dispatcher and preference store and
//! processes one input at a time: a [`UserInput`] from the front end, a
//! [`ChannelEvent`] from the transport, or expiry of the armed pending
//! timeout. Every reaction runs to completion before the next input is
//! polled, so nothing else ever mutates the session.
//!
//! The `handle_*` methods are public so front ends and tests can drive the
//! reactor without running [`EvaClient::run`].

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ClientEvent, ServerEvent, Transport};
use crate::config::SessionConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::ErrorKind;
use crate::preferences::{
    PreferenceError, PreferenceKey, PreferenceStore, PreferenceValue, Preferences,
};
use crate::session::{Intent, Origin, Phase, SessionEffect, SessionEvent, VoiceSession};
use crate::speech::{SpeechError, SpeechSink};
use crate::transcript::{Transcript, TranscriptEntry};

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Transient message for the user (a toast in graphical front ends).
///
/// Suppressed entirely while `notifications_enabled` is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
}

impl Notification {
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>, level: NotificationLevel) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level,
        }
    }
}

/// Callbacks into the front end.
///
/// Presentation state is derived from these calls; the front end never
/// writes back into the session.
pub trait Presentation: Send {
    /// The voice session phase changed.
    fn on_phase_changed(&mut self, phase: Phase, origin: Origin);

    /// An entry was appended to the transcript.
    fn on_transcript_appended(&mut self, entry: &TranscriptEntry);

    /// The transcript was cleared at the user's request.
    fn on_transcript_cleared(&mut self) {}

    /// Preferences were loaded or changed.
    fn on_preferences_changed(&mut self, prefs: &Preferences);

    /// A user-facing error. Always delivered, regardless of preferences.
    fn on_error(&mut self, kind: ErrorKind, message: &str);

    /// A transient notification.
    fn on_notification(&mut self, _notification: &Notification) {}

    /// The transport connected or disconnected.
    fn on_connection_changed(&mut self, _connected: bool) {}
}

/// Actions requested by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// Microphone button or Space.
    ToggleVoice,
    /// Escape: stop listening if active.
    StopVoice,
    /// Send typed text.
    Submit(String),
    /// Replace the input buffer.
    SetDraft(String),
    /// Send the input buffer.
    SubmitDraft,
    /// Send a canned command without touching the input buffer.
    QuickCommand(String),
    ClearTranscript,
    /// Set a preference from its textual name and value.
    SetPreference { key: String, value: String },
    ToggleTheme,
    /// Stop the reply currently being spoken.
    StopSpeaking,
    /// Write the transcript to a file (`None` = timestamped file under
    /// [`crate::eva_dirs::exports_dir`]).
    ExportTranscript(Option<PathBuf>),
    Shutdown,
}

/// The reactor.
pub struct EvaClient<T: Transport, P: Presentation> {
    session: VoiceSession,
    dispatcher: CommandDispatcher,
    preferences: PreferenceStore,
    transport: T,
    presentation: P,
    /// Armed pending timeout: generation and deadline.
    deadline: Option<(u64, Instant)>,
}

impl<T: Transport, P: Presentation> EvaClient<T, P> {
    #[must_use]
    pub fn new(
        config: &SessionConfig,
        transport: T,
        speech: Arc<dyn SpeechSink>,
        preferences: PreferenceStore,
        presentation: P,
    ) -> Self {
        Self {
            session: VoiceSession::new(config.pending_timeout()),
            dispatcher: CommandDispatcher::new(speech),
            preferences,
            transport,
            presentation,
            deadline: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> &VoiceSession {
        &self.session
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        self.dispatcher.transcript()
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        self.dispatcher.draft()
    }

    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.preferences.current()
    }

    #[must_use]
    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deadline of the armed pending timeout, if any.
    #[must_use]
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.deadline.map(|(_, at)| at)
    }

    /// Load saved preferences and publish the initial state.
    pub fn start(&mut self) {
        let prefs = self.preferences.load();
        info!(theme = %prefs.theme, "preferences loaded");
        self.presentation.on_preferences_changed(&prefs);
        self.presentation
            .on_phase_changed(self.session.phase(), self.session.origin());
    }

    /// Run until shutdown is requested, the input sender is dropped, or
    /// `cancel` fires.
    pub async fn run(
        &mut self,
        mut inputs: mpsc::UnboundedReceiver<UserInput>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        cancel: CancellationToken,
    ) {
        self.start();
        let mut events_open = true;

        loop {
            let (armed, at) = match self.deadline {
                Some((generation, at)) => (Some(generation), at),
                None => (None, Instant::now()),
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                input = inputs.recv() => {
                    let Some(input) = input else {
                        debug!("input channel closed");
                        break;
                    };
                    if self.handle_input(input).is_break() {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => {
                        warn!("channel event stream ended");
                        events_open = false;
                        self.handle_channel_event(ChannelEvent::Disconnected {
                            reason: "transport stopped".to_owned(),
                        });
                    }
                },
                () = tokio::time::sleep_until(at), if armed.is_some() => {
                    if let Some(generation) = armed {
                        self.handle_timeout(generation);
                    }
                }
            }
        }

        self.dispatcher.stop_speaking();
        info!("client stopped");
    }

    /// React to one front-end action. `Break` means shut down.
    pub fn handle_input(&mut self, input: UserInput) -> ControlFlow<()> {
        match input {
            UserInput::ToggleVoice => self.dispatch(SessionEvent::ToggleRequested),
            UserInput::StopVoice => self.dispatch(SessionEvent::StopRequested),
            UserInput::Submit(text) => {
                let event = self.dispatcher.submit(&text);
                self.send_command(event);
            }
            UserInput::SetDraft(text) => self.dispatcher.set_draft(text),
            UserInput::SubmitDraft => {
                let event = self.dispatcher.submit_draft();
                self.send_command(event);
            }
            UserInput::QuickCommand(text) => {
                let event = self.dispatcher.quick_command(&text);
                self.send_command(event);
            }
            UserInput::ClearTranscript => {
                self.dispatcher.clear_transcript();
                self.presentation.on_transcript_cleared();
                self.notify(Notification::new(
                    "Chat Cleared",
                    "Conversation history cleared",
                    NotificationLevel::Info,
                ));
            }
            UserInput::SetPreference { key, value } => self.set_preference(&key, &value),
            UserInput::ToggleTheme => {
                let result = self.preferences.toggle_theme();
                self.preference_updated(PreferenceKey::Theme, result);
            }
            UserInput::StopSpeaking => self.dispatcher.stop_speaking(),
            UserInput::ExportTranscript(path) => self.export_transcript(path),
            UserInput::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// React to one transport event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { server_active } => {
                self.presentation.on_connection_changed(true);
                self.notify(Notification::new(
                    "Connected",
                    "Successfully connected to EVA server",
                    NotificationLevel::Success,
                ));
                self.system_entry("System connected. Ready to assist!");
                self.dispatch(SessionEvent::Connected { server_active });
            }
            ChannelEvent::Disconnected { reason } => {
                debug!(%reason, "transport disconnected");
                self.presentation.on_connection_changed(false);
                self.notify(Notification::new(
                    "Disconnected",
                    "Lost connection to EVA server",
                    NotificationLevel::Error,
                ));
                self.system_entry("Disconnected from server. Attempting to reconnect...");
                self.dispatch(SessionEvent::Disconnected);
            }
            ChannelEvent::Server(event) => self.handle_server_event(event),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Activated | ServerEvent::Status { active: true } => {
                self.dispatch(SessionEvent::ServerActivated);
            }
            ServerEvent::Deactivated | ServerEvent::Status { active: false } => {
                self.dispatch(SessionEvent::ServerDeactivated);
            }
            ServerEvent::Transcript { text } => {
                if self.dispatcher.on_transcript(&text) {
                    self.publish_last_entry();
                }
            }
            ServerEvent::CommandEcho { text } => {
                if self.dispatcher.on_command_echo(&text) {
                    self.publish_last_entry();
                }
            }
            ServerEvent::Reply { text } => {
                let prefs = self.preferences.current();
                let spoken = self.dispatcher.on_reply(&text, &prefs);
                self.publish_last_entry();
                match spoken {
                    Ok(()) => {}
                    Err(SpeechError::Unsupported(reason)) => self.presentation.on_error(
                        ErrorKind::SpeechUnsupported,
                        &format!("Spoken replies are unavailable: {reason}"),
                    ),
                    Err(e) => warn!(error = %e, "could not speak reply"),
                }
            }
            ServerEvent::Error { message } => {
                warn!(%message, "server reported an error");
                let message = if message.is_empty() {
                    "An error occurred. Please try again.".to_owned()
                } else {
                    message
                };
                self.notify(Notification::new("Error", message, NotificationLevel::Error));
            }
            ServerEvent::Pong => {}
        }
    }

    /// Expiry of the pending timeout armed with `generation`.
    pub fn handle_timeout(&mut self, generation: u64) {
        if self.deadline.is_some_and(|(armed, _)| armed == generation) {
            self.deadline = None;
        }
        self.dispatch(SessionEvent::PendingTimedOut { generation });
    }

    fn dispatch(&mut self, event: SessionEvent) {
        let effects = self.session.dispatch(event, Instant::now().into_std());
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) {
        let mut intent_failed = false;
        for effect in effects {
            match effect {
                SessionEffect::Emit(intent) => {
                    let event = match intent {
                        Intent::Activate => ClientEvent::Activate,
                        Intent::Deactivate => ClientEvent::Deactivate,
                    };
                    if let Err(e) = self.transport.send(event) {
                        warn!(error = %e, ?intent, "intent not delivered");
                        intent_failed = true;
                    }
                }
                SessionEffect::PhaseChanged(phase) => {
                    info!(phase = %phase, origin = ?self.session.origin(), "voice session phase changed");
                    self.presentation.on_phase_changed(phase, self.session.origin());
                    if phase == Phase::Active {
                        self.notify(Notification::new(
                            "Voice Active",
                            "Speak your command now",
                            NotificationLevel::Info,
                        ));
                    }
                }
                SessionEffect::Error(kind, message) => self.presentation.on_error(kind, &message),
                SessionEffect::ArmTimeout { generation, after } => {
                    self.deadline = Some((generation, Instant::now() + after));
                }
                SessionEffect::CancelTimeout => self.deadline = None,
            }
        }
        if intent_failed {
            let effects = self
                .session
                .dispatch(SessionEvent::IntentFailed, Instant::now().into_std());
            self.apply(effects);
        }
    }

    fn send_command(&mut self, event: Option<ClientEvent>) {
        let Some(event) = event else {
            return;
        };
        self.publish_last_entry();
        if let Err(e) = self.transport.send(event) {
            warn!(error = %e, "command not delivered");
            self.presentation.on_error(
                ErrorKind::ChannelUnavailable,
                "Not connected to the EVA server; command not sent",
            );
        }
    }

    fn set_preference(&mut self, key: &str, value: &str) {
        let parsed = PreferenceKey::parse(key)
            .ok_or_else(|| PreferenceError::UnknownKey(key.to_owned()))
            .and_then(|key| PreferenceValue::parse_for(key, value).map(|value| (key, value)));
        match parsed {
            Ok((key, value)) => {
                let result = self.preferences.set_key(key, value);
                self.preference_updated(key, result);
            }
            Err(e) => self.preference_rejected(&e),
        }
    }

    fn preference_updated(&mut self, key: PreferenceKey, result: Result<Preferences, PreferenceError>) {
        let prefs = match result {
            Ok(prefs) => prefs,
            Err(PreferenceError::Storage(reason)) => {
                // In-memory value already updated; only durability is lost.
                warn!(%reason, "preference change not persisted");
                self.preferences.current()
            }
            Err(e) => {
                self.preference_rejected(&e);
                return;
            }
        };
        self.presentation.on_preferences_changed(&prefs);
        if key == PreferenceKey::NotificationsEnabled {
            let state = if prefs.notifications_enabled {
                "enabled"
            } else {
                "disabled"
            };
            self.notify(Notification::new(
                "Settings",
                format!("Notifications {state}"),
                NotificationLevel::Info,
            ));
        }
    }

    fn preference_rejected(&mut self, error: &PreferenceError) {
        warn!(error = %error, "preference change rejected");
        self.notify(Notification::new(
            "Settings",
            error.to_string(),
            NotificationLevel::Warning,
        ));
    }

    fn export_transcript(&mut self, path: Option<PathBuf>) {
        let path = path.unwrap_or_else(|| crate::eva_dirs::export_file(chrono::Local::now()));
        match write_export(&path, &self.dispatcher.export_transcript()) {
            Ok(()) => {
                info!(path = %path.display(), entries = self.transcript().len(), "transcript exported");
                self.notify(Notification::new(
                    "Chat Exported",
                    path.display().to_string(),
                    NotificationLevel::Success,
                ));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "transcript export failed");
                self.notify(Notification::new(
                    "Export Failed",
                    e.to_string(),
                    NotificationLevel::Error,
                ));
            }
        }
    }

    fn system_entry(&mut self, text: &str) {
        self.dispatcher.on_system(text);
        self.publish_last_entry();
    }

    fn publish_last_entry(&mut self) {
        if let Some(entry) = self.dispatcher.last_entry() {
            self.presentation.on_transcript_appended(entry);
        }
    }

    fn notify(&mut self, notification: Notification) {
        if self.preferences.current().notifications_enabled {
            self.presentation.on_notification(&notification);
        } else {
            debug!(title = %notification.title, "notification suppressed");
        }
    }
}

fn write_export(path: &Path, text: &str) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}
