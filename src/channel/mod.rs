//! Event channel to the assistant server.
//!
//! The reactor talks to the server through the [`Transport`] trait and
//! receives [`ChannelEvent`]s in arrival order. [`WsChannel`] is the
//! WebSocket implementation with automatic reconnection.

pub mod protocol;
pub mod websocket;

pub use protocol::{ClientEvent, Envelope, ProtocolError, ServerEvent};
pub use websocket::WsChannel;

use crate::error::Result;

/// Lifecycle and server events delivered to the reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A connection was (re-)established.
    ///
    /// `server_active` carries the server's answer to the `status` query, or
    /// `None` if the query is disabled or went unanswered.
    Connected { server_active: Option<bool> },
    /// The connection dropped. The channel keeps reconnecting in the
    /// background.
    Disconnected { reason: String },
    /// A named event from the server.
    Server(ServerEvent),
}

/// Connection status of a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying (shut down).
    Disconnected,
    /// Establishing the first connection.
    Connecting,
    /// Connected to the server.
    Connected,
    /// Waiting to retry after a failure.
    Reconnecting {
        /// Failed attempts since the last successful connection.
        attempt: u32,
    },
}

impl ConnectionStatus {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
        }
    }
}

/// Outbound half of the event channel.
pub trait Transport: Send {
    /// Queue `event` for delivery to the server.
    ///
    /// # Errors
    ///
    /// [`EvaError::Channel`](crate::error::EvaError::Channel) when there is
    /// no live connection; the event is not queued for later delivery.
    fn send(&self, event: ClientEvent) -> Result<()>;

    /// Current connection status.
    fn status(&self) -> ConnectionStatus;
}
