//! Preferences survive a client restart through the file store.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use eva::channel::{ClientEvent, ConnectionStatus, Transport};
use eva::client::{EvaClient, Presentation, UserInput};
use eva::config::SessionConfig;
use eva::error::ErrorKind;
use eva::preferences::{FileStore, PreferenceStore, Preferences, Theme};
use eva::session::{Origin, Phase};
use eva::speech::NullSpeechSink;
use eva::transcript::TranscriptEntry;

struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send(&self, _event: ClientEvent) -> eva::Result<()> {
        Err(eva::EvaError::Channel("offline".to_owned()))
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Disconnected
    }
}

#[derive(Clone, Default)]
struct PrefsLog(Arc<Mutex<Vec<Preferences>>>);

impl PrefsLog {
    fn last(&self) -> Option<Preferences> {
        self.0.lock().expect("lock prefs log").last().copied()
    }
}

impl Presentation for PrefsLog {
    fn on_phase_changed(&mut self, _phase: Phase, _origin: Origin) {}

    fn on_transcript_appended(&mut self, _entry: &TranscriptEntry) {}

    fn on_preferences_changed(&mut self, prefs: &Preferences) {
        self.0.lock().expect("lock prefs log").push(*prefs);
    }

    fn on_error(&mut self, _kind: ErrorKind, _message: &str) {}
}

fn client_at(
    path: &std::path::Path,
    log: PrefsLog,
) -> EvaClient<OfflineTransport, PrefsLog> {
    let mut client = EvaClient::new(
        &SessionConfig::default(),
        OfflineTransport,
        Arc::new(NullSpeechSink),
        PreferenceStore::new(Box::new(FileStore::new(path))),
        log,
    );
    client.start();
    client
}

#[test]
fn settings_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");

    let mut first = client_at(&path, PrefsLog::default());
    let _ = first.handle_input(UserInput::SetPreference {
        key: "notificationsEnabled".into(),
        value: "false".into(),
    });
    let _ = first.handle_input(UserInput::ToggleTheme);
    drop(first);

    let log = PrefsLog::default();
    let second = client_at(&path, log.clone());
    let restored = second.preferences();
    assert!(!restored.notifications_enabled);
    assert_eq!(restored.theme, Theme::Light);
    assert!(restored.voice_response_enabled);
    assert_eq!(log.last(), Some(restored));
}

#[test]
fn stored_document_uses_the_shared_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("preferences.json");

    let mut client = client_at(&path, PrefsLog::default());
    let _ = client.handle_input(UserInput::SetPreference {
        key: "autoScrollEnabled".into(),
        value: "off".into(),
    });

    let raw = std::fs::read_to_string(&path).expect("read store");
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&raw).expect("store is a JSON object");
    let doc: serde_json::Value = serde_json::from_str(
        map["eva_preferences"].as_str().expect("document stored as a string"),
    )
    .expect("document is JSON");
    assert_eq!(doc["autoScrollEnabled"], false);
    assert_eq!(doc["theme"], "dark");
}

#[test]
fn unwritable_store_still_applies_in_memory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").expect("write blocker");
    let path = blocker.join("preferences.json");

    let log = PrefsLog::default();
    let mut client = client_at(&path, log.clone());
    let _ = client.handle_input(UserInput::SetPreference {
        key: "voiceResponseEnabled".into(),
        value: "false".into(),
    });

    assert!(!client.preferences().voice_response_enabled);
    assert_eq!(
        log.last().map(|p| p.voice_response_enabled),
        Some(false)
    );
}
