//! Speech synthesis sink.
//!
//! [`SpeechSink`] is the collaborator the dispatcher uses to voice assistant
//! replies. [`ProcessSpeechSink`] drives the platform TTS program (`say` on
//! macOS, `spd-say`/`espeak-ng`/`espeak` elsewhere) and keeps at most one
//! utterance alive: starting a new one kills the previous process.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::config::SpeechConfig;

/// TTS programs probed on `PATH`, in order of preference.
const CANDIDATE_PROGRAMS: &[&str] = &["say", "spd-say", "espeak-ng", "espeak"];

/// Speech synthesis errors.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// No synthesis facility is available in this environment.
    #[error("speech synthesis unsupported: {0}")]
    Unsupported(String),

    /// The synthesis program could not be started.
    #[error("failed to start speech synthesis: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Something that can speak text aloud.
pub trait SpeechSink: Send + Sync {
    /// Start speaking `text`. Does not wait for the utterance to finish.
    fn speak(&self, text: &str) -> Result<(), SpeechError>;

    /// Stop the current utterance, if any.
    fn cancel(&self);
}

/// Sink for environments without speech synthesis.
#[derive(Debug, Default)]
pub struct NullSpeechSink;

impl SpeechSink for NullSpeechSink {
    fn speak(&self, _text: &str) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported(
            "no speech synthesis available".to_owned(),
        ))
    }

    fn cancel(&self) {}
}

/// Speaks through an external TTS program, one utterance at a time.
#[derive(Debug)]
pub struct ProcessSpeechSink {
    program: String,
    rate: Option<u32>,
    current: Mutex<Option<Child>>,
}

impl ProcessSpeechSink {
    /// Use `program` directly.
    #[must_use]
    pub fn new(program: impl Into<String>, rate: Option<u32>) -> Self {
        Self {
            program: program.into(),
            rate,
            current: Mutex::new(None),
        }
    }

    /// Resolve the TTS program from config or `PATH`.
    ///
    /// # Errors
    ///
    /// [`SpeechError::Unsupported`] if speech is disabled, the configured
    /// program is missing, or none of the known programs is installed.
    pub fn detect(config: &SpeechConfig) -> Result<Self, SpeechError> {
        if !config.enabled {
            return Err(SpeechError::Unsupported(
                "speech disabled in config".to_owned(),
            ));
        }
        if let Some(program) = &config.command {
            return which::which(program)
                .map(|path| Self::new(path.to_string_lossy(), config.rate))
                .map_err(|e| SpeechError::Unsupported(format!("{program}: {e}")));
        }
        CANDIDATE_PROGRAMS
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|path| {
                info!(program = %path.display(), "speech synthesis available");
                Self::new(path.to_string_lossy(), config.rate)
            })
            .ok_or_else(|| {
                SpeechError::Unsupported(format!(
                    "none of {} found on PATH",
                    CANDIDATE_PROGRAMS.join(", ")
                ))
            })
    }

    /// Whether an utterance is still playing.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        let mut current = match self.current.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        match current.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                *current = None;
                false
            }
            None => false,
        }
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(rate) = self.rate {
            match program_name(&self.program) {
                "say" => {
                    cmd.arg("-r").arg(rate.to_string());
                }
                "espeak" | "espeak-ng" => {
                    cmd.arg("-s").arg(rate.to_string());
                }
                _ => {}
            }
        }
        cmd.arg("--").arg(text);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

/// Final path component without extension.
fn program_name(program: &str) -> &str {
    std::path::Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program)
}

fn stop(child: &mut Child) {
    if let Ok(None) = child.try_wait() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl SpeechSink for ProcessSpeechSink {
    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let mut current = match self.current.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        if let Some(mut previous) = current.take() {
            stop(&mut previous);
        }
        let child = self.command(text).spawn()?;
        debug!(pid = child.id(), chars = text.len(), "speaking reply");
        *current = Some(child);
        Ok(())
    }

    fn cancel(&self) {
        let mut current = match self.current.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        if let Some(mut child) = current.take() {
            debug!(pid = child.id(), "cancelling speech");
            stop(&mut child);
        }
    }
}

impl Drop for ProcessSpeechSink {
    fn drop(&mut self) {
        self.cancel();
    }
}
