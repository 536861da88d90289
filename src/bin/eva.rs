//! Terminal front end for EVA.
//!
//! Typed lines are sent to the assistant; lines starting with `/` are client
//! commands (see `/help`). The transcript is written to stdout and logs go to
//! stderr.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eva::client::{Notification, Presentation, UserInput};
use eva::preferences::{FileStore, PreferenceKey, PreferenceStore, Preferences};
use eva::speech::{NullSpeechSink, ProcessSpeechSink, SpeechSink};
use eva::{ErrorKind, EvaClient, EvaConfig, Origin, Phase, TranscriptEntry, WsChannel};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
Commands:
  /mic, /toggle       start or stop listening
  /stop               stop listening (if active)
  /shh                stop speaking the current reply
  /quick <text>       send a canned command
  /clear              clear the transcript
  /export [path]      write the transcript to a file
  /theme              switch between dark and light
  /set <key> <value>  change a preference (theme, voiceResponseEnabled,
                      autoScrollEnabled, notificationsEnabled)
  /help               show this help
  /quit               exit
Anything else is sent to EVA.";

/// EVA: voice assistant client.
#[derive(Parser)]
#[command(name = "eva", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Assistant server WebSocket URL (overrides the config file).
    #[arg(long, env = "EVA_SERVER_URL")]
    server_url: Option<String>,

    /// Preference file (overrides the config file).
    #[arg(long)]
    preferences: Option<PathBuf>,

    /// Never speak replies.
    #[arg(long)]
    no_speech: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Connect to the assistant and start chatting (default).
    Chat,

    /// Write the effective configuration to the config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print saved preferences.
    Prefs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eva=info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(EvaConfig::default_config_path);
    let mut config = EvaConfig::load_or_default(&config_path)?;
    if let Some(url) = cli.server_url {
        config.channel.server_url = url;
    }
    if let Some(path) = cli.preferences {
        config.preferences.path = Some(path);
    }
    if cli.no_speech {
        config.speech.enabled = false;
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            config.save_to_file(&config_path)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
        Command::Prefs => {
            let path = config.preferences.effective_path();
            let mut store = PreferenceStore::new(Box::new(FileStore::new(path.clone())));
            let prefs = store.load();
            println!("{}", path.display());
            for key in PreferenceKey::ALL {
                println!("  {key} = {}", prefs.get(key));
            }
            Ok(())
        }
    }
}

async fn run_chat(config: EvaConfig) -> anyhow::Result<()> {
    println!("EVA v{}", env!("CARGO_PKG_VERSION"));

    let speech: Arc<dyn SpeechSink> = match ProcessSpeechSink::detect(&config.speech) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(error = %e, "spoken replies unavailable");
            Arc::new(NullSpeechSink)
        }
    };
    let preferences = PreferenceStore::new(Box::new(FileStore::new(
        config.preferences.effective_path(),
    )));
    let (channel, events) = WsChannel::connect(&config.channel)?;
    println!("Connecting to {} ... type /help for commands.\n", channel.url());

    let mut client = EvaClient::new(
        &config.session,
        channel,
        speech,
        preferences,
        TerminalPresentation,
    );

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || read_stdin(input_tx));

    client.run(input_rx, events, cancel).await;
    Ok(())
}

/// Forward stdin lines as [`UserInput`]s until EOF or `/quit`.
///
/// Runs on a dedicated thread: blocking reads of an interactive stdin would
/// otherwise keep the runtime from shutting down.
fn read_stdin(tx: mpsc::UnboundedSender<UserInput>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read from stdin");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(input)) => {
                let quit = input == UserInput::Shutdown;
                if tx.send(input).is_err() || quit {
                    return;
                }
            }
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
    }
    info!("stdin closed; shutting down");
    let _ = tx.send(UserInput::Shutdown);
}

/// Map one typed line to an input. `Err` carries text to show the user.
fn parse_line(line: &str) -> Result<Option<UserInput>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(UserInput::Submit(line.to_owned())));
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    let input = match name {
        "mic" | "toggle" => UserInput::ToggleVoice,
        "stop" => UserInput::StopVoice,
        "shh" => UserInput::StopSpeaking,
        "clear" => UserInput::ClearTranscript,
        "theme" => UserInput::ToggleTheme,
        "quit" | "exit" => UserInput::Shutdown,
        "export" => UserInput::ExportTranscript((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "quick" if rest.is_empty() => return Err("usage: /quick <text>".to_owned()),
        "quick" => UserInput::QuickCommand(rest.to_owned()),
        "set" => match rest.split_once(char::is_whitespace) {
            Some((key, value)) => UserInput::SetPreference {
                key: key.to_owned(),
                value: value.trim().to_owned(),
            },
            None => return Err("usage: /set <key> <value>".to_owned()),
        },
        "help" => return Err(HELP.to_owned()),
        _ => return Err(format!("unknown command /{name} (try /help)")),
    };
    Ok(Some(input))
}

/// Writes the conversation and status changes to stdout.
struct TerminalPresentation;

impl Presentation for TerminalPresentation {
    fn on_phase_changed(&mut self, phase: Phase, origin: Origin) {
        let label = match phase {
            Phase::Idle => "IDLE",
            Phase::ActivationPending => "ACTIVATING...",
            Phase::Active => "LISTENING",
            Phase::DeactivationPending => "STOPPING...",
        };
        match origin {
            Origin::ServerInitiated => println!("[voice] {label} (server)"),
            Origin::UserInitiated => println!("[voice] {label}"),
        }
    }

    fn on_transcript_appended(&mut self, entry: &TranscriptEntry) {
        println!(
            "[{}] {}: {}",
            entry.timestamp.format("%H:%M"),
            entry.speaker.label(),
            entry.text
        );
    }

    fn on_transcript_cleared(&mut self) {
        println!("-- transcript cleared --");
    }

    fn on_preferences_changed(&mut self, prefs: &Preferences) {
        let on_off = |on: bool| if on { "on" } else { "off" };
        println!(
            "[settings] theme={} voice={} autoscroll={} notifications={}",
            prefs.theme,
            on_off(prefs.voice_response_enabled),
            on_off(prefs.auto_scroll_enabled),
            on_off(prefs.notifications_enabled),
        );
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        println!("! {message} ({kind})");
    }

    fn on_notification(&mut self, notification: &Notification) {
        println!(
            "* {}: {} [{}]",
            notification.title,
            notification.message,
            notification.level.as_str()
        );
    }
}
