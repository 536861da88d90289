//! WebSocket transport with automatic reconnection.
//!
//! [`WsChannel::connect`] spawns a background task that owns the socket. The
//! task reconnects with exponential backoff, performs the `status` handshake
//! after every connect, and forwards lifecycle and server events to the
//! returned receiver in arrival order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ClientEvent, ServerEvent};
use super::{ChannelEvent, ConnectionStatus, Transport};
use crate::config::ChannelConfig;
use crate::error::{EvaError, Result};

/// Handle to the background WebSocket connection.
///
/// Dropping the handle (or calling [`shutdown`](Self::shutdown)) closes the
/// socket and stops reconnecting.
pub struct WsChannel {
    url: String,
    status: Arc<Mutex<ConnectionStatus>>,
    /// Serialized frames for the background task.
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl WsChannel {
    /// Validate the server URL and start the connection task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`EvaError::Config`] if `server_url` is not a `ws://` or `wss://` URL.
    pub fn connect(
        config: &ChannelConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let url = url::Url::parse(&config.server_url)
            .map_err(|e| EvaError::Config(format!("invalid server_url {}: {e}", config.server_url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(EvaError::Config(format!(
                "server_url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        let url = url.to_string();

        let status = Arc::new(Mutex::new(ConnectionStatus::Connecting));
        let (tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let link = Link {
            url: url.clone(),
            config: config.clone(),
            status: Arc::clone(&status),
            events_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            link.run(outbound_rx).await;
        });

        Ok((
            Self {
                url,
                status,
                tx,
                cancel,
            },
            events_rx,
        ))
    }

    /// Server URL this channel connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the connection and stop reconnecting.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Transport for WsChannel {
    fn send(&self, event: ClientEvent) -> Result<()> {
        if !self.status().is_connected() {
            return Err(EvaError::Channel(format!(
                "cannot send `{}`: not connected",
                event.name()
            )));
        }
        let frame = event.to_frame()?;
        self.tx
            .send(frame)
            .map_err(|_| EvaError::Channel("connection task stopped".to_owned()))
    }

    fn status(&self) -> ConnectionStatus {
        match self.status.lock() {
            Ok(s) => s.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a connection ended.
enum Ended {
    /// Shutdown requested or the event receiver went away.
    Stopped,
    /// Connect failed or an established connection dropped.
    Failed(String),
}

impl From<String> for Ended {
    fn from(reason: String) -> Self {
        Self::Failed(reason)
    }
}

/// State owned by the background task.
struct Link {
    url: String,
    config: ChannelConfig,
    status: Arc<Mutex<ConnectionStatus>>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
}

impl Link {
    fn set_status(&self, status: ConnectionStatus) {
        match self.status.lock() {
            Ok(mut s) => *s = status,
            Err(p) => *p.into_inner() = status,
        }
    }

    fn is_connected(&self) -> bool {
        match self.status.lock() {
            Ok(s) => s.is_connected(),
            Err(p) => p.into_inner().is_connected(),
        }
    }

    fn forward(&self, event: ChannelEvent) -> std::result::Result<(), Ended> {
        self.events_tx.send(event).map_err(|_| Ended::Stopped)
    }

    /// Connection loop with exponential backoff.
    async fn run(self, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
        let mut attempt: u32 = 0;

        loop {
            self.set_status(if attempt == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting { attempt }
            });

            let reason = match self.try_connect(&mut outbound_rx).await {
                Ok(()) | Err(Ended::Stopped) => break,
                Err(Ended::Failed(reason)) => reason,
            };

            if self.is_connected() {
                warn!(url = %self.url, %reason, "connection lost");
                attempt = 0;
                // Refuse sends before the reactor hears about the drop.
                self.set_status(ConnectionStatus::Reconnecting { attempt: 1 });
                if self.forward(ChannelEvent::Disconnected { reason }).is_err() {
                    break;
                }
            } else {
                warn!(url = %self.url, attempt, %reason, "connection attempt failed");
            }

            attempt = attempt.saturating_add(1);
            let delay = self.config.reconnect_delay(attempt);
            self.set_status(ConnectionStatus::Reconnecting { attempt });
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        debug!(url = %self.url, "connection task stopped");
    }

    /// One connection. `Ok(())` on shutdown, `Err` on failure or drop.
    async fn try_connect(
        &self,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> std::result::Result<(), Ended> {
        let ws_stream = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            res = tokio_tungstenite::connect_async(self.url.as_str()) => {
                res.map_err(|e| format!("connect: {e}"))?.0
            }
        };
        let (mut write, mut read) = ws_stream.split();

        // Frames queued before this connection belong to a dead session.
        let mut stale = 0usize;
        while outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "dropped frames queued while disconnected");
        }

        let mut early = Vec::new();
        let server_active = if self.config.query_status_on_connect {
            send_event(&mut write, &ClientEvent::Status).await?;
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                res = await_status(&mut read, self.config.status_timeout(), &mut early) => res?,
            }
        } else {
            None
        };

        self.set_status(ConnectionStatus::Connected);
        info!(url = %self.url, ?server_active, "connected to assistant server");
        self.forward(ChannelEvent::Connected { server_active })?;
        for event in early {
            self.forward(ChannelEvent::Server(event))?;
        }

        let mut ping_interval = tokio::time::interval(self.config.ping_interval());
        // Skip the first immediate tick.
        ping_interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match decode(&text) {
                        Some(ServerEvent::Pong) | None => {}
                        Some(event) => self.forward(ChannelEvent::Server(event))?,
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(Ended::Failed("connection closed by server".into()));
                    }
                    Some(Err(e)) => return Err(Ended::Failed(format!("read error: {e}"))),
                    _ => {} // Binary, Ping/Pong frames handled by tungstenite.
                },
                Some(frame) = outbound_rx.recv() => {
                    write
                        .send(Message::Text(frame))
                        .await
                        .map_err(|e| format!("send error: {e}"))?;
                }
                _ = ping_interval.tick() => send_event(&mut write, &ClientEvent::Ping).await?,
            }
        }
    }
}

/// Wait for the `status` answer. Other events that arrive first are kept in
/// `early` and delivered after the connect notification.
///
/// When the answer arrives it supersedes any listening-state event buffered
/// before it; those are dropped so the snapshot is not overwritten by older
/// news. Without an answer every buffered event is kept.
async fn await_status<S>(
    read: &mut S,
    wait: Duration,
    early: &mut Vec<ServerEvent>,
) -> std::result::Result<Option<bool>, String>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let Ok(msg) = tokio::time::timeout_at(deadline, read.next()).await else {
            debug!("no status answer from server; assuming idle");
            return Ok(None);
        };
        match msg {
            Some(Ok(Message::Text(text))) => match decode(&text) {
                Some(ServerEvent::Status { active }) => {
                    let before = early.len();
                    early.retain(|event| !is_listening_state(event));
                    if early.len() < before {
                        debug!(
                            dropped = before - early.len(),
                            active, "status answer supersedes earlier listening-state events"
                        );
                    }
                    return Ok(Some(active));
                }
                Some(ServerEvent::Pong) | None => {}
                Some(event) => early.push(event),
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err("connection closed during status handshake".into());
            }
            Some(Err(e)) => return Err(format!("read error: {e}")),
            _ => {}
        }
    }
}

fn is_listening_state(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::Activated | ServerEvent::Deactivated)
}

async fn send_event<W>(write: &mut W, event: &ClientEvent) -> std::result::Result<(), String>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = event
        .to_frame()
        .map_err(|e| format!("encode {}: {e}", event.name()))?;
    write
        .send(Message::Text(frame))
        .await
        .map_err(|e| format!("send {}: {e}", event.name()))
}

fn decode(text: &str) -> Option<ServerEvent> {
    match ServerEvent::from_frame(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "ignoring server frame");
            None
        }
    }
}
