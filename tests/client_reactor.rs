//! Reactor behaviour with recording collaborators.

#![allow(clippy::expect_used)]

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eva::channel::{ChannelEvent, ClientEvent, ConnectionStatus, ServerEvent, Transport};
use eva::client::{EvaClient, Notification, Presentation, UserInput};
use eva::config::SessionConfig;
use eva::error::{ErrorKind, EvaError};
use eva::preferences::{MemoryStore, PreferenceStore, Preferences};
use eva::session::{Origin, Phase};
use eva::speech::{SpeechError, SpeechSink};
use eva::transcript::{Speaker, TranscriptEntry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    online: Arc<AtomicBool>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().expect("lock sent events").clone()
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn send(&self, event: ClientEvent) -> eva::Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(EvaError::Channel("offline".to_owned()));
        }
        self.sent.lock().expect("lock sent events").push(event);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        if self.online.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Reconnecting { attempt: 1 }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Phase(Phase, Origin),
    Entry(Speaker, String),
    Cleared,
    Prefs(Preferences),
    Error(ErrorKind),
    Notification(String),
    Connection(bool),
}

#[derive(Clone, Default)]
struct RecordingPresentation {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingPresentation {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock presentation calls").clone()
    }

    fn errors(&self) -> Vec<ErrorKind> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Error(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    fn notifications(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Notification(title) => Some(title),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().expect("lock presentation calls").push(call);
    }
}

impl Presentation for RecordingPresentation {
    fn on_phase_changed(&mut self, phase: Phase, origin: Origin) {
        self.push(Call::Phase(phase, origin));
    }

    fn on_transcript_appended(&mut self, entry: &TranscriptEntry) {
        self.push(Call::Entry(entry.speaker, entry.text.clone()));
    }

    fn on_transcript_cleared(&mut self) {
        self.push(Call::Cleared);
    }

    fn on_preferences_changed(&mut self, prefs: &Preferences) {
        self.push(Call::Prefs(*prefs));
    }

    fn on_error(&mut self, kind: ErrorKind, _message: &str) {
        self.push(Call::Error(kind));
    }

    fn on_notification(&mut self, notification: &Notification) {
        self.push(Call::Notification(notification.title.clone()));
    }

    fn on_connection_changed(&mut self, connected: bool) {
        self.push(Call::Connection(connected));
    }
}

#[derive(Default)]
struct RecordingSpeech {
    calls: Mutex<Vec<String>>,
    unsupported: bool,
}

impl RecordingSpeech {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock speech calls").clone()
    }
}

impl SpeechSink for RecordingSpeech {
    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        if self.unsupported {
            return Err(SpeechError::Unsupported("no tts in tests".to_owned()));
        }
        self.calls
            .lock()
            .expect("lock speech calls")
            .push(format!("speak:{text}"));
        Ok(())
    }

    fn cancel(&self) {
        self.calls.lock().expect("lock speech calls").push("cancel".to_owned());
    }
}

struct Harness {
    client: EvaClient<RecordingTransport, RecordingPresentation>,
    transport: RecordingTransport,
    presentation: RecordingPresentation,
    speech: Arc<RecordingSpeech>,
}

fn harness_with(speech: RecordingSpeech) -> Harness {
    let transport = RecordingTransport::new();
    let presentation = RecordingPresentation::default();
    let speech = Arc::new(speech);
    let client = EvaClient::new(
        &SessionConfig {
            pending_timeout_ms: 10_000,
        },
        transport.clone(),
        speech.clone(),
        PreferenceStore::new(Box::new(MemoryStore::new())),
        presentation.clone(),
    );
    Harness {
        client,
        transport,
        presentation,
        speech,
    }
}

fn harness() -> Harness {
    harness_with(RecordingSpeech::default())
}

/// Started client with a live connection and the server idle.
fn connected_harness() -> Harness {
    let mut h = harness();
    h.client.start();
    h.client.handle_channel_event(ChannelEvent::Connected {
        server_active: Some(false),
    });
    h
}

fn input(h: &mut Harness, input: UserInput) {
    assert_eq!(h.client.handle_input(input), ControlFlow::Continue(()));
}

fn server(h: &mut Harness, event: ServerEvent) {
    h.client.handle_channel_event(ChannelEvent::Server(event));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_activation_times_out_once() {
    let Harness {
        mut client,
        transport,
        presentation,
        ..
    } = harness();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(async move {
        client.run(input_rx, event_rx, cancel).await;
        client
    });

    event_tx
        .send(ChannelEvent::Connected {
            server_active: Some(false),
        })
        .expect("send connected");
    // Let the reactor see the connection before the toggle arrives.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(
        presentation.calls().contains(&Call::Connection(true)),
        "connected before toggling"
    );
    input_tx.send(UserInput::ToggleVoice).expect("send toggle");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(presentation.errors().is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    input_tx.send(UserInput::Shutdown).expect("send shutdown");
    let client = task.await.expect("client task");

    assert_eq!(client.session().phase(), Phase::Idle);
    assert_eq!(presentation.errors(), vec![ErrorKind::ActivationTimeout]);
    assert_eq!(transport.sent(), vec![ClientEvent::Activate]);
    assert!(client.pending_deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn confirmed_activation_disarms_timeout() {
    let Harness {
        mut client,
        transport,
        presentation,
        ..
    } = harness();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let stop = cancel.clone();

    let task = tokio::spawn(async move {
        client.run(input_rx, event_rx, cancel).await;
        client
    });

    event_tx
        .send(ChannelEvent::Connected {
            server_active: None,
        })
        .expect("send connected");
    // Let the reactor see the connection before the toggle arrives.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(
        presentation.calls().contains(&Call::Connection(true)),
        "connected before toggling"
    );
    input_tx.send(UserInput::ToggleVoice).expect("send toggle");
    tokio::time::sleep(Duration::from_secs(1)).await;
    event_tx
        .send(ChannelEvent::Server(ServerEvent::Activated))
        .expect("send activated");
    tokio::time::sleep(Duration::from_secs(60)).await;
    stop.cancel();
    let client = task.await.expect("client task");

    assert_eq!(client.session().phase(), Phase::Active);
    assert_eq!(client.session().origin(), Origin::UserInitiated);
    assert!(presentation.errors().is_empty());
    assert_eq!(transport.sent(), vec![ClientEvent::Activate]);
    assert!(
        presentation
            .calls()
            .contains(&Call::Phase(Phase::Active, Origin::UserInitiated))
    );
}

#[test]
fn unsolicited_deactivation_is_not_echoed() {
    let mut h = harness();
    h.client.start();
    h.client.handle_channel_event(ChannelEvent::Connected {
        server_active: Some(true),
    });
    assert_eq!(h.client.session().phase(), Phase::Active);

    server(&mut h, ServerEvent::Deactivated);

    assert_eq!(h.client.session().phase(), Phase::Idle);
    assert_eq!(h.client.session().origin(), Origin::ServerInitiated);
    assert!(h.transport.sent().is_empty());
}

#[test]
fn user_deactivation_round_trip() {
    let mut h = connected_harness();
    server(&mut h, ServerEvent::Activated);
    input(&mut h, UserInput::ToggleVoice);
    assert_eq!(h.client.session().phase(), Phase::DeactivationPending);
    input(&mut h, UserInput::ToggleVoice);
    server(&mut h, ServerEvent::Deactivated);

    assert_eq!(h.client.session().phase(), Phase::Idle);
    assert_eq!(h.transport.sent(), vec![ClientEvent::Deactivate]);
}

#[test]
fn escape_stops_only_an_active_session() {
    let mut h = connected_harness();
    input(&mut h, UserInput::StopVoice);
    assert!(h.transport.sent().is_empty());

    server(&mut h, ServerEvent::Activated);
    input(&mut h, UserInput::StopVoice);
    assert_eq!(h.transport.sent(), vec![ClientEvent::Deactivate]);
}

#[test]
fn submit_scenario() {
    let mut h = connected_harness();
    let before = h.client.transcript().len();

    input(&mut h, UserInput::Submit("  ".into()));
    assert_eq!(h.client.transcript().len(), before);
    assert!(h.transport.sent().is_empty());

    input(&mut h, UserInput::Submit("hello".into()));
    assert_eq!(h.client.transcript().len(), before + 1);
    let entry = h.client.transcript().entries().last().expect("entry");
    assert_eq!(entry.speaker, Speaker::User);
    assert_eq!(entry.text, "hello");
    assert_eq!(
        h.transport.sent(),
        vec![ClientEvent::Command {
            text: "hello".into()
        }]
    );
    assert!(
        h.presentation
            .calls()
            .contains(&Call::Entry(Speaker::User, "hello".into()))
    );
}

#[test]
fn draft_is_sent_and_cleared() {
    let mut h = connected_harness();
    input(&mut h, UserInput::SetDraft("open notes".into()));
    assert_eq!(h.client.draft(), "open notes");
    input(&mut h, UserInput::SubmitDraft);
    assert_eq!(h.client.draft(), "");
    assert_eq!(
        h.transport.sent(),
        vec![ClientEvent::Command {
            text: "open notes".into()
        }]
    );
}

#[test]
fn command_while_offline_reports_channel_unavailable() {
    let mut h = connected_harness();
    h.transport.set_online(false);
    input(&mut h, UserInput::Submit("hello".into()));
    assert_eq!(h.presentation.errors(), vec![ErrorKind::ChannelUnavailable]);
}

#[test]
fn toggle_before_connect_is_refused() {
    let mut h = harness();
    h.client.start();
    input(&mut h, UserInput::ToggleVoice);
    assert_eq!(h.client.session().phase(), Phase::Idle);
    assert_eq!(h.presentation.errors(), vec![ErrorKind::ChannelUnavailable]);
    assert!(h.transport.sent().is_empty());
}

#[test]
fn refused_intent_reverts_pending_phase() {
    let mut h = connected_harness();
    h.transport.set_online(false);
    input(&mut h, UserInput::ToggleVoice);
    assert_eq!(h.client.session().phase(), Phase::Idle);
    assert_eq!(h.presentation.errors(), vec![ErrorKind::ChannelUnavailable]);
    assert!(h.client.pending_deadline().is_none());
}

#[test]
fn disconnect_forces_idle_and_notes_it() {
    let mut h = connected_harness();
    server(&mut h, ServerEvent::Activated);
    h.client.handle_channel_event(ChannelEvent::Disconnected {
        reason: "reset".into(),
    });

    assert_eq!(h.client.session().phase(), Phase::Idle);
    assert!(h.transport.sent().is_empty());
    let calls = h.presentation.calls();
    assert!(calls.contains(&Call::Connection(false)));
    assert!(calls.iter().any(|c| matches!(c, Call::Entry(Speaker::System, text) if text.contains("Disconnected"))));
    assert!(h.presentation.notifications().contains(&"Disconnected".to_owned()));
}

#[test]
fn typed_command_acknowledgement_is_not_duplicated() {
    let mut h = connected_harness();
    input(&mut h, UserInput::Submit("hello".into()));
    server(
        &mut h,
        ServerEvent::CommandEcho {
            text: "hello".into(),
        },
    );
    let users = |h: &Harness| {
        h.client
            .transcript()
            .entries()
            .iter()
            .filter(|e| e.speaker == Speaker::User)
            .count()
    };
    assert_eq!(users(&h), 1);

    // A spoken utterance that repeats the typed text is its own entry.
    server(
        &mut h,
        ServerEvent::Transcript {
            text: "hello".into(),
        },
    );
    assert_eq!(users(&h), 2);
}

#[test]
fn spoken_transcript_and_reply() {
    let mut h = connected_harness();
    server(
        &mut h,
        ServerEvent::Transcript {
            text: "what time is it".into(),
        },
    );
    server(
        &mut h,
        ServerEvent::Reply {
            text: "It is noon".into(),
        },
    );
    server(
        &mut h,
        ServerEvent::Reply {
            text: "Anything else?".into(),
        },
    );

    let speakers: Vec<_> = h
        .client
        .transcript()
        .entries()
        .iter()
        .filter(|e| e.speaker != Speaker::System)
        .map(|e| e.speaker)
        .collect();
    assert_eq!(
        speakers,
        vec![Speaker::User, Speaker::Assistant, Speaker::Assistant]
    );
    assert_eq!(
        h.speech.calls(),
        vec![
            "cancel",
            "speak:It is noon",
            "cancel",
            "speak:Anything else?"
        ]
    );
}

#[test]
fn replies_stay_silent_when_voice_responses_disabled() {
    let mut h = connected_harness();
    input(
        &mut h,
        UserInput::SetPreference {
            key: "voiceResponseEnabled".into(),
            value: "false".into(),
        },
    );
    assert!(!h.client.preferences().voice_response_enabled);

    server(&mut h, ServerEvent::Reply { text: "shh".into() });
    assert!(h.speech.calls().is_empty());
    assert_eq!(
        h.client.transcript().entries().last().map(|e| e.speaker),
        Some(Speaker::Assistant)
    );
}

#[test]
fn unsupported_speech_reported_once() {
    let mut h = harness_with(RecordingSpeech {
        unsupported: true,
        ..RecordingSpeech::default()
    });
    h.client.start();
    server(&mut h, ServerEvent::Reply { text: "one".into() });
    server(&mut h, ServerEvent::Reply { text: "two".into() });
    assert_eq!(h.presentation.errors(), vec![ErrorKind::SpeechUnsupported]);
}

#[test]
fn notifications_suppressed_but_errors_delivered() {
    let mut h = harness();
    h.client.start();
    input(
        &mut h,
        UserInput::SetPreference {
            key: "notificationsEnabled".into(),
            value: "off".into(),
        },
    );
    input(&mut h, UserInput::ClearTranscript);
    input(&mut h, UserInput::ToggleVoice);

    assert!(h.presentation.notifications().is_empty());
    assert!(h.presentation.calls().contains(&Call::Cleared));
    assert_eq!(h.presentation.errors(), vec![ErrorKind::ChannelUnavailable]);
}

#[test]
fn notifications_shown_when_enabled() {
    let mut h = connected_harness();
    server(&mut h, ServerEvent::Activated);
    input(&mut h, UserInput::ClearTranscript);
    let titles = h.presentation.notifications();
    assert!(titles.contains(&"Connected".to_owned()));
    assert!(titles.contains(&"Voice Active".to_owned()));
    assert!(titles.contains(&"Chat Cleared".to_owned()));
    assert!(h.client.transcript().is_empty());
}

#[test]
fn invalid_preference_is_rejected_without_change() {
    let mut h = harness();
    h.client.start();
    input(
        &mut h,
        UserInput::SetPreference {
            key: "fontSize".into(),
            value: "12".into(),
        },
    );
    input(
        &mut h,
        UserInput::SetPreference {
            key: "theme".into(),
            value: "sepia".into(),
        },
    );
    assert_eq!(h.client.preferences(), Preferences::default());
    assert_eq!(h.presentation.notifications(), vec!["Settings", "Settings"]);
}

#[test]
fn theme_toggle_publishes_preferences() {
    let mut h = harness();
    h.client.start();
    input(&mut h, UserInput::ToggleTheme);
    let prefs = h.client.preferences();
    assert_eq!(prefs.theme, eva::Theme::Light);
    assert!(h.presentation.calls().contains(&Call::Prefs(prefs)));
}

#[test]
fn export_writes_transcript_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out").join("chat.txt");
    let mut h = connected_harness();
    input(&mut h, UserInput::Submit("hello".into()));
    server(&mut h, ServerEvent::Reply { text: "Hi".into() });
    input(&mut h, UserInput::ExportTranscript(Some(path.clone())));

    let text = std::fs::read_to_string(&path).expect("read export");
    assert!(text.contains("YOU: hello\n\n"));
    assert!(text.ends_with("EVA: Hi"));
    assert!(h.presentation.notifications().contains(&"Chat Exported".to_owned()));
}

#[test]
fn server_error_becomes_notification() {
    let mut h = connected_harness();
    server(
        &mut h,
        ServerEvent::Error {
            message: String::new(),
        },
    );
    assert!(h.presentation.notifications().contains(&"Error".to_owned()));
    assert!(h.presentation.errors().is_empty());
}

#[test]
fn shutdown_input_breaks() {
    let mut h = harness();
    assert_eq!(
        h.client.handle_input(UserInput::Shutdown),
        ControlFlow::Break(())
    );
}
