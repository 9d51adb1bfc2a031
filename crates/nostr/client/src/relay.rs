//! Single relay connection.
//!
//! A [`RelayConnection`] owns one WebSocket session. Writes go through a shared
//! sink; reads happen on one background task that parses each text frame and
//! hands it to the connection's [`RequestCorrelator`], in arrival order.
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Closing -> Closed
//!                      \                  \------> Closed
//!                       \-----------------------> Closed
//! ```

use crate::auth::{AuthRequirement, AuthSession};
use crate::config::RelayClientConfig;
use crate::correlator::{CorrelationKey, RequestCorrelator, RequestKind};
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nostr_core::{canonical_relay_url, verify_event};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on sending our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet opened
    Disconnected,
    /// WebSocket handshake in progress
    Connecting,
    /// Ready to send
    Open,
    /// Explicit close in progress
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

/// State shared between the connection handle and its receive task.
struct Shared {
    url: String,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<WsSink>>,
    correlator: RequestCorrelator,
    challenge: watch::Sender<Option<String>>,
    auth: StdMutex<AuthSession>,
    verify_events: bool,
}

impl Shared {
    fn new(url: String, verify_events: bool) -> Self {
        Self {
            url,
            state: watch::Sender::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            correlator: RequestCorrelator::new(),
            challenge: watch::Sender::new(None),
            auth: StdMutex::new(AuthSession::new()),
            verify_events,
        }
    }

    /// Apply a transition if the state machine allows it.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!("Relay {} state {:?} -> {:?}", self.url, current, next);
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn auth(&self) -> MutexGuard<'_, AuthSession> {
        self.auth
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_text(&self, text: &str) {
        debug!("Received from {}: {}", self.url, text);

        let msg = match RelayMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping malformed frame from {}: {}", self.url, e);
                return;
            }
        };

        match &msg {
            RelayMessage::Auth { challenge } => {
                debug!("Relay {} sent AUTH challenge", self.url);
                self.challenge.send_replace(Some(challenge.clone()));
                self.auth().on_auth_required();
                return;
            }
            RelayMessage::Notice { message } => {
                warn!("NOTICE from {}: {}", self.url, message);
            }
            RelayMessage::Event { event, .. } if self.verify_events => {
                if !matches!(verify_event(event), Ok(true)) {
                    debug!("Dropping event {} from {}: failed verification", event.id, self.url);
                    return;
                }
            }
            _ => {}
        }

        self.correlator.dispatch(msg);
    }

    async fn recv_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_text(text.as_str()),
                Ok(Message::Ping(data)) => {
                    if let Some(sink) = self.writer.lock().await.as_mut() {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Relay {} closed connection", self.url);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error from {}: {}", self.url, e);
                    break;
                }
            }
        }

        self.transition(ConnectionState::Closed);
        self.correlator.cancel_all();
    }
}

/// Relay endpoint and what is known about its auth requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    /// Relay URL (canonical)
    pub url: String,
    pub auth: AuthRequirement,
}

impl RelayEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: canonical_relay_url(url),
            auth: AuthRequirement::Unknown,
        }
    }
}

/// One open session to one relay.
pub struct RelayConnection {
    shared: Arc<Shared>,
    recv_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    /// Open a connection, bounded by `config.connect_timeout`.
    pub async fn open(url: &str, config: &RelayClientConfig) -> Result<Self> {
        let canonical = canonical_relay_url(url);
        let parsed = Url::parse(&canonical)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed.scheme()
            )));
        }

        let shared = Arc::new(Shared::new(canonical, config.verify_events));
        shared.transition(ConnectionState::Connecting);

        info!("Connecting to relay: {}", shared.url);
        let connect_start = Instant::now();

        let ws_stream = match timeout(config.connect_timeout, connect_async(parsed.as_str())).await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                shared.transition(ConnectionState::Closed);
                warn!("Failed to connect to {}: {}", shared.url, e);
                return Err(ClientError::ConnectRefused(format!("{}: {}", shared.url, e)));
            }
            Err(_) => {
                shared.transition(ConnectionState::Closed);
                warn!("Connection to {} timed out", shared.url);
                return Err(ClientError::ConnectTimeout(format!(
                    "{} after {:?}",
                    shared.url, config.connect_timeout
                )));
            }
        };

        let (sink, stream) = ws_stream.split();
        *shared.writer.lock().await = Some(sink);
        shared.transition(ConnectionState::Open);

        info!(
            "Connected to relay: {} (took {:?})",
            shared.url,
            connect_start.elapsed()
        );

        let recv_task = tokio::spawn(Arc::clone(&shared).recv_loop(stream));

        Ok(Self {
            shared,
            recv_task: StdMutex::new(Some(recv_task)),
        })
    }

    /// Canonical relay URL (no trailing slash)
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.shared.correlator
    }

    /// Most recent AUTH challenge from the relay.
    pub fn challenge(&self) -> Option<String> {
        self.shared.challenge.borrow().clone()
    }

    pub fn auth_requirement(&self) -> AuthRequirement {
        self.shared.auth().requirement()
    }

    /// Snapshot of this connection's endpoint.
    pub fn endpoint(&self) -> RelayEndpoint {
        RelayEndpoint {
            auth: self.auth_requirement(),
            ..RelayEndpoint::new(&self.shared.url)
        }
    }

    /// Run `f` against this connection's auth state.
    pub fn with_auth<R>(&self, f: impl FnOnce(&mut AuthSession) -> R) -> R {
        f(&mut self.shared.auth())
    }

    /// Send a frame without waiting for any answer.
    pub async fn send(&self, msg: &ClientMessage) -> Result<()> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }

        let text = msg
            .to_json()
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        debug!("Sending to {}: {}", self.shared.url, text);

        let mut writer = self.shared.writer.lock().await;
        let sink = writer.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))
    }

    /// Register an awaiter for `key`, send `msg`, and wait for the answer.
    pub async fn request(
        &self,
        msg: &ClientMessage,
        key: CorrelationKey,
        kind: RequestKind,
        timeout: Duration,
    ) -> Result<RelayMessage> {
        let pending = self.shared.correlator.register(key, kind, timeout)?;
        self.send(msg).await?;
        pending.wait().await
    }

    /// Wait until the relay has sent an AUTH challenge.
    ///
    /// Returns a buffered challenge immediately. Fails with `Cancelled` if the
    /// connection closes first.
    pub async fn wait_for_challenge(&self, wait: Duration) -> Result<String> {
        let mut challenge = self.shared.challenge.subscribe();
        let mut state = self.shared.state.subscribe();

        let watch_for_challenge = async {
            loop {
                let current = challenge.borrow_and_update().clone();
                if let Some(value) = current {
                    return Ok(value);
                }
                let closed = *state.borrow_and_update() == ConnectionState::Closed;
                if closed {
                    return Err(ClientError::Cancelled);
                }
                let changed = tokio::select! {
                    changed = challenge.changed() => changed,
                    changed = state.changed() => changed,
                };
                if changed.is_err() {
                    return Err(ClientError::Cancelled);
                }
            }
        };

        timeout(wait, watch_for_challenge).await.map_err(|_| {
            ClientError::RequestTimeout(format!(
                "no AUTH challenge from {} within {:?}",
                self.shared.url, wait
            ))
        })?
    }

    /// Close the connection and cancel pending requests. Safe to call twice.
    pub async fn close(&self) {
        let explicit = self.shared.transition(ConnectionState::Closing);
        self.shared.correlator.cancel_all();

        if let Some(mut sink) = self.shared.writer.lock().await.take() {
            if explicit {
                info!("Disconnecting from relay: {}", self.shared.url);
            }
            let _ = timeout(CLOSE_GRACE, sink.close()).await;
        }
        if let Some(handle) = self.take_recv_task() {
            handle.abort();
        }

        self.shared.transition(ConnectionState::Closed);
    }

    fn take_recv_task(&self) -> Option<JoinHandle<()>> {
        self.recv_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.take_recv_task() {
            handle.abort();
        }
        self.shared.correlator.cancel_all();
        self.shared.transition(ConnectionState::Closed);
    }
}
