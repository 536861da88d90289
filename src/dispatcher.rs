//! Command dispatcher.
//!
//! Turns typed or transcribed utterances into outbound `command` events and
//! inbound replies into transcript entries and speech. Owns the session
//! transcript and the draft input buffer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::channel::ClientEvent;
use crate::preferences::Preferences;
use crate::speech::{SpeechError, SpeechSink};
use crate::transcript::{Speaker, Transcript, TranscriptEntry};

pub struct CommandDispatcher {
    transcript: Transcript,
    draft: String,
    speech: Arc<dyn SpeechSink>,
    /// Cleared once the sink reports that synthesis is unsupported.
    speech_available: bool,
    /// Last submitted text, until the server echoes it back.
    awaiting_echo: Option<String>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(speech: Arc<dyn SpeechSink>) -> Self {
        Self {
            transcript: Transcript::new(),
            draft: String::new(),
            speech,
            speech_available: true,
            awaiting_echo: None,
        }
    }

    /// Submit a typed utterance.
    ///
    /// Empty or whitespace-only input is ignored and returns `None`.
    /// Otherwise a `User` entry with the trimmed text is appended, the draft is
    /// cleared, and the `command` event to send is returned.
    pub fn submit(&mut self, text: &str) -> Option<ClientEvent> {
        let event = self.record_command(text)?;
        self.draft.clear();
        Some(event)
    }

    /// Submit a canned command. Same as [`submit`](Self::submit) but the
    /// draft is left alone.
    pub fn quick_command(&mut self, text: &str) -> Option<ClientEvent> {
        self.record_command(text)
    }

    fn record_command(&mut self, text: &str) -> Option<ClientEvent> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.transcript
            .append(TranscriptEntry::new(Speaker::User, text));
        self.awaiting_echo = Some(text.to_owned());
        Some(ClientEvent::Command {
            text: text.to_owned(),
        })
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Submit the current draft.
    pub fn submit_draft(&mut self) -> Option<ClientEvent> {
        let draft = std::mem::take(&mut self.draft);
        let event = self.submit(&draft);
        if event.is_none() {
            self.draft = draft;
        }
        event
    }

    /// Record an utterance the server recognised. Returns `false` if `text`
    /// is blank and nothing was appended.
    pub fn on_transcript(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.transcript
            .append(TranscriptEntry::new(Speaker::User, text));
        true
    }

    /// Record a command the server acknowledged receiving.
    ///
    /// The acknowledgement of the command this client just submitted is
    /// already in the transcript and is skipped (`false`); anything else was
    /// spoken and is appended like [`on_transcript`](Self::on_transcript).
    pub fn on_command_echo(&mut self, text: &str) -> bool {
        if self.awaiting_echo.as_deref() == Some(text.trim()) {
            self.awaiting_echo = None;
            debug!("skipping server echo of submitted command");
            return false;
        }
        self.on_transcript(text)
    }

    /// Record an assistant reply and speak it if voice responses are on.
    ///
    /// The entry is always appended. Any utterance in progress is cancelled
    /// before the new one starts.
    ///
    /// # Errors
    ///
    /// The speech sink's error. [`SpeechError::Unsupported`] is returned once;
    /// later replies are not spoken.
    pub fn on_reply(&mut self, text: &str, prefs: &Preferences) -> Result<(), SpeechError> {
        self.awaiting_echo = None;
        self.transcript
            .append(TranscriptEntry::new(Speaker::Assistant, text));

        if !prefs.voice_response_enabled || !self.speech_available {
            return Ok(());
        }
        self.speech.cancel();
        match self.speech.speak(text) {
            Ok(()) => Ok(()),
            Err(e @ SpeechError::Unsupported(_)) => {
                warn!(error = %e, "disabling spoken replies");
                self.speech_available = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Append a `System` notice (connection changes and the like).
    pub fn on_system(&mut self, text: &str) {
        self.transcript
            .append(TranscriptEntry::new(Speaker::System, text));
    }

    /// Stop the current utterance, if any.
    pub fn stop_speaking(&self) {
        self.speech.cancel();
    }

    /// Whether replies can still be spoken.
    #[must_use]
    pub fn speech_available(&self) -> bool {
        self.speech_available
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
        self.awaiting_echo = None;
    }

    /// Plain-text export of the transcript.
    #[must_use]
    pub fn export_transcript(&self) -> String {
        self.transcript.export_text()
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Most recently appended entry.
    #[must_use]
    pub fn last_entry(&self) -> Option<&TranscriptEntry> {
        self.transcript.entries().last()
    }
}
