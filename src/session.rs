//! Voice session state machine.
//!
//! [`VoiceSession`] owns the single "is this client in a listening session"
//! fact and reconciles it with the server. Every input goes through
//! [`VoiceSession::dispatch`], which returns the [`SessionEffect`]s the caller
//! must apply: outbound intents, phase notifications, user-facing errors and
//! timer arm/cancel requests. The machine itself performs no I/O, so the whole
//! transition table is testable without a runtime.
//!
//! # Transitions
//!
//! | Phase \ Event         | Toggle                | Activated | Deactivated | Disconnected | Timeout |
//! |-----------------------|-----------------------|-----------|-------------|--------------|---------|
//! | `Idle`                | `ActivationPending` + `activate` | `Active` (server) | - | - | - |
//! | `ActivationPending`   | no-op                 | `Active`  | `Idle`      | `Idle`       | `Idle` + error |
//! | `Active`              | `DeactivationPending` + `deactivate` | no-op | `Idle` | `Idle` | - |
//! | `DeactivationPending` | no-op                 | ignored   | `Idle`      | `Idle`       | `Active` + error |
//!
//! A server `deactivated` never produces an outbound `deactivate`.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ErrorKind;

/// Listening phase of the voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not listening.
    Idle,
    /// `activate` sent, waiting for `activated`.
    ActivationPending,
    /// Listening, confirmed by the server.
    Active,
    /// `deactivate` sent, waiting for `deactivated`.
    DeactivationPending,
}

impl Phase {
    /// Whether an intent is in flight.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::ActivationPending | Self::DeactivationPending)
    }

    /// Stable identifier for logs and presentation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ActivationPending => "activation_pending",
            Self::Active => "active",
            Self::DeactivationPending => "deactivation_pending",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused the last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    UserInitiated,
    ServerInitiated,
}

/// Outbound session intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Activate,
    Deactivate,
}

/// Input to [`VoiceSession::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// User pressed the microphone button or toggle hotkey.
    ToggleRequested,
    /// User asked to stop listening (Escape). Only acts while active.
    StopRequested,
    /// Server confirmed (or independently started) a listening session.
    ServerActivated,
    /// Server ended the listening session. Authoritative, may be unsolicited.
    ServerDeactivated,
    /// The event channel was lost.
    Disconnected,
    /// The event channel is (re)established.
    ///
    /// `server_active` carries the server-reported listening state when the
    /// channel can query it; `None` means unknown.
    Connected { server_active: Option<bool> },
    /// A pending timeout armed with `generation` expired.
    PendingTimedOut { generation: u64 },
    /// The transport refused the intent emitted by the last transition.
    IntentFailed,
}

/// Output of [`VoiceSession::dispatch`], applied by the caller in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Send this intent to the server.
    Emit(Intent),
    /// The phase changed; presentation should re-render.
    PhaseChanged(Phase),
    /// Surface a user-visible error.
    Error(ErrorKind, String),
    /// Arm (or re-arm) the pending timeout. Replaces any armed timeout.
    ArmTimeout { generation: u64, after: Duration },
    /// Disarm the pending timeout.
    CancelTimeout,
}

/// The voice session state machine.
#[derive(Debug, Clone)]
pub struct VoiceSession {
    phase: Phase,
    origin: Origin,
    last_transition_at: Instant,
    connected: bool,
    pending_timeout: Duration,
    timer_generation: u64,
}

impl VoiceSession {
    /// Create an idle, disconnected session.
    #[must_use]
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            origin: Origin::UserInitiated,
            last_transition_at: Instant::now(),
            connected: false,
            pending_timeout,
            timer_generation: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    #[must_use]
    pub fn last_transition_at(&self) -> Instant {
        self.last_transition_at
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the server has confirmed a listening session.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Generation of the most recently armed pending timeout.
    #[must_use]
    pub fn timer_generation(&self) -> u64 {
        self.timer_generation
    }

    /// Process one event and return the effects to apply.
    pub fn dispatch(&mut self, event: SessionEvent, now: Instant) -> Vec<SessionEffect> {
        match event {
            SessionEvent::ToggleRequested => self.on_toggle(now),
            SessionEvent::StopRequested => {
                if self.phase == Phase::Active {
                    self.on_toggle(now)
                } else {
                    debug!(phase = %self.phase, "stop requested while not active; ignoring");
                    Vec::new()
                }
            }
            SessionEvent::ServerActivated => self.on_server_activated(now),
            SessionEvent::ServerDeactivated => self.on_server_deactivated(now),
            SessionEvent::Disconnected => self.on_disconnect(now),
            SessionEvent::Connected { server_active } => self.on_connect(server_active, now),
            SessionEvent::PendingTimedOut { generation } => self.on_timeout(generation, now),
            SessionEvent::IntentFailed => self.on_intent_failed(now),
        }
    }

    fn on_toggle(&mut self, now: Instant) -> Vec<SessionEffect> {
        if !self.connected {
            warn!(phase = %self.phase, "toggle requested without a connection; intent dropped");
            return vec![SessionEffect::Error(
                ErrorKind::ChannelUnavailable,
                "Not connected to the EVA server".to_owned(),
            )];
        }

        let (next, intent) = match self.phase {
            Phase::Idle => (Phase::ActivationPending, Intent::Activate),
            Phase::Active => (Phase::DeactivationPending, Intent::Deactivate),
            Phase::ActivationPending | Phase::DeactivationPending => {
                debug!(phase = %self.phase, "toggle while pending; ignoring");
                return Vec::new();
            }
        };

        self.origin = Origin::UserInitiated;
        let mut effects = vec![SessionEffect::Emit(intent)];
        effects.extend(self.transition(next, now));
        effects.push(self.arm_timeout());
        effects
    }

    fn on_server_activated(&mut self, now: Instant) -> Vec<SessionEffect> {
        match self.phase {
            Phase::ActivationPending => {
                let mut effects = vec![SessionEffect::CancelTimeout];
                effects.extend(self.transition(Phase::Active, now));
                effects
            }
            Phase::Idle => {
                info!("server started a listening session");
                self.origin = Origin::ServerInitiated;
                self.transition(Phase::Active, now).into_iter().collect()
            }
            Phase::Active => {
                debug!("duplicate activated event; already active");
                Vec::new()
            }
            Phase::DeactivationPending => {
                debug!("activated event while deactivation is pending; ignoring stale confirmation");
                Vec::new()
            }
        }
    }

    fn on_server_deactivated(&mut self, now: Instant) -> Vec<SessionEffect> {
        self.origin = Origin::ServerInitiated;
        let mut effects = Vec::new();
        if self.phase.is_pending() {
            effects.push(SessionEffect::CancelTimeout);
        }
        effects.extend(self.transition(Phase::Idle, now));
        effects
    }

    fn on_disconnect(&mut self, now: Instant) -> Vec<SessionEffect> {
        self.connected = false;
        if self.phase == Phase::Idle {
            return Vec::new();
        }
        info!(phase = %self.phase, "channel lost; forcing session idle");
        let mut effects = vec![SessionEffect::CancelTimeout];
        effects.extend(self.transition(Phase::Idle, now));
        effects
    }

    fn on_connect(&mut self, server_active: Option<bool>, now: Instant) -> Vec<SessionEffect> {
        self.connected = true;
        let mut effects = Vec::new();
        if self.phase.is_pending() {
            effects.push(SessionEffect::CancelTimeout);
        }
        let next = match server_active {
            Some(true) => Phase::Active,
            Some(false) | None => Phase::Idle,
        };
        if next != self.phase {
            self.origin = Origin::ServerInitiated;
        }
        debug!(?server_active, next = %next, "reconciling session after connect");
        effects.extend(self.transition(next, now));
        effects
    }

    fn on_timeout(&mut self, generation: u64, now: Instant) -> Vec<SessionEffect> {
        if generation != self.timer_generation {
            debug!(generation, current = self.timer_generation, "stale pending timeout; ignoring");
            return Vec::new();
        }
        let (revert_to, kind, message) = match self.phase {
            Phase::ActivationPending => (
                Phase::Idle,
                ErrorKind::ActivationTimeout,
                "EVA did not confirm activation in time",
            ),
            Phase::DeactivationPending => (
                Phase::Active,
                ErrorKind::DeactivationTimeout,
                "EVA did not confirm deactivation in time",
            ),
            Phase::Idle | Phase::Active => return Vec::new(),
        };
        warn!(phase = %self.phase, kind = %kind, "pending transition timed out");
        let mut effects: Vec<_> = self.transition(revert_to, now).into_iter().collect();
        effects.push(SessionEffect::Error(kind, message.to_owned()));
        effects
    }

    fn on_intent_failed(&mut self, now: Instant) -> Vec<SessionEffect> {
        let revert_to = match self.phase {
            Phase::ActivationPending => Phase::Idle,
            Phase::DeactivationPending => Phase::Active,
            Phase::Idle | Phase::Active => return Vec::new(),
        };
        let mut effects = vec![SessionEffect::CancelTimeout];
        effects.extend(self.transition(revert_to, now));
        effects.push(SessionEffect::Error(
            ErrorKind::ChannelUnavailable,
            "Could not reach the EVA server".to_owned(),
        ));
        effects
    }

    fn arm_timeout(&mut self) -> SessionEffect {
        self.timer_generation = self.timer_generation.wrapping_add(1);
        SessionEffect::ArmTimeout {
            generation: self.timer_generation,
            after: self.pending_timeout,
        }
    }

    /// Move to `next`, returning a phase notification only if it changed.
    fn transition(&mut self, next: Phase, now: Instant) -> Option<SessionEffect> {
        if next == self.phase {
            return None;
        }
        debug!(from = %self.phase, to = %next, origin = ?self.origin, "session transition");
        self.phase = next;
        self.last_transition_at = now;
        Some(SessionEffect::PhaseChanged(next))
    }
}
