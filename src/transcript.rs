//! In-memory chat transcript for the current session.
//!
//! Entries are append-only and live only as long as the process; the
//! transcript is never written to the preference store or anywhere else.

use chrono::{DateTime, Local};
use std::fmt;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
    System,
}

impl Speaker {
    /// Display label used by front ends and exports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "YOU",
            Self::Assistant => "EVA",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single line of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Local::now(),
        }
    }
}

/// Ordered, append-only list of [`TranscriptEntry`].
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return a reference to it.
    pub fn append(&mut self, entry: TranscriptEntry) -> &TranscriptEntry {
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        &self.entries[last]
    }

    /// Drop every entry. Only called on explicit user request.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the transcript as plain text.
    ///
    /// One block per entry, `[YYYY-MM-DD HH:MM:SS] SPEAKER: text`, blocks
    /// separated by a blank line.
    #[must_use]
    pub fn export_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "[{}] {}: {}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.speaker.label(),
                    e.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let mut transcript = Transcript::new();
        transcript.append(TranscriptEntry::new(Speaker::User, "what time is it"));
        transcript.append(TranscriptEntry::new(Speaker::Assistant, "It is 10:42"));
        let speakers: Vec<_> = transcript.entries().iter().map(|e| e.speaker).collect();
        assert_eq!(speakers, vec![Speaker::User, Speaker::Assistant]);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn clear_empties_transcript() {
        let mut transcript = Transcript::new();
        transcript.append(TranscriptEntry::new(Speaker::System, "connected"));
        transcript.clear();
        assert!(transcript.is_empty());
    }

    #[test]
    fn export_uses_labels_and_blank_line_separator() {
        let mut transcript = Transcript::new();
        transcript.append(TranscriptEntry::new(Speaker::User, "hello"));
        transcript.append(TranscriptEntry::new(Speaker::Assistant, "Hi there"));
        let text = transcript.export_text();
        let blocks: Vec<_> = text.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].ends_with("] YOU: hello"));
        assert!(blocks[1].ends_with("] EVA: Hi there"));
        assert!(blocks[0].starts_with('['));
    }

    #[test]
    fn export_of_empty_transcript_is_empty() {
        assert_eq!(Transcript::new().export_text(), "");
    }
}
