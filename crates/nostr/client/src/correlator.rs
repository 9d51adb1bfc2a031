//! Matching relay responses to the requests that caused them.
//!
//! Every outbound request registers an awaiter *before* its frame is sent. The
//! connection's receive task then calls [`RequestCorrelator::dispatch`] for each
//! inbound frame, in order:
//!
//! - `OK` resolves the awaiter keyed by its event id
//! - `EVENT`, `EOSE` and `CLOSED` resolve the awaiter keyed by their subscription id
//! - `NOTICE` resolves the oldest generic awaiter, never a keyed one
//!
//! Frames with no awaiter are stale and dropped.

use crate::error::{ClientError, Result};
use crate::message::RelayMessage;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

/// Identifier a relay echoes back in its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Event id, answered by `OK` (publish and auth)
    Event(String),
    /// Subscription id, answered by `EVENT`, `EOSE` or `CLOSED`
    Subscription(String),
}

impl CorrelationKey {
    /// Key a relay frame is addressed to, if any.
    pub fn for_message(msg: &RelayMessage) -> Option<Self> {
        match msg {
            RelayMessage::Ok { event_id, .. } => Some(CorrelationKey::Event(event_id.clone())),
            RelayMessage::Event {
                subscription_id, ..
            }
            | RelayMessage::Eose { subscription_id }
            | RelayMessage::Closed {
                subscription_id, ..
            } => Some(CorrelationKey::Subscription(subscription_id.clone())),
            RelayMessage::Notice { .. } | RelayMessage::Auth { .. } => None,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Event(id) => write!(f, "event {}", id),
            CorrelationKey::Subscription(id) => write!(f, "subscription {}", id),
        }
    }
}

/// What an awaiter is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Publish,
    Query,
    Auth,
    /// Catch-all, resolved by `NOTICE`
    Generic,
}

/// An in-flight request as seen by the correlator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// `None` for generic awaiters
    pub key: Option<CorrelationKey>,
    pub kind: RequestKind,
    pub created_at: Instant,
    pub deadline: Instant,
}

struct Slot {
    token: u64,
    request: PendingRequest,
    tx: oneshot::Sender<Result<RelayMessage>>,
}

#[derive(Default)]
struct Inner {
    keyed: HashMap<CorrelationKey, Slot>,
    generic: VecDeque<Slot>,
    next_token: u64,
    closed: bool,
}

/// Per-connection table of pending requests.
#[derive(Clone, Default)]
pub struct RequestCorrelator {
    inner: Arc<Mutex<Inner>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Slots stay consistent even if a holder panicked.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an awaiter for `key`. Fails if one already exists.
    pub fn register(
        &self,
        key: CorrelationKey,
        kind: RequestKind,
        timeout: Duration,
    ) -> Result<PendingResponse> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ClientError::Cancelled);
        }
        if inner.keyed.contains_key(&key) {
            return Err(ClientError::DuplicateAwaiter(key.to_string()));
        }

        let (slot, response) = self.new_slot(&mut inner, Some(key.clone()), kind, timeout);
        inner.keyed.insert(key, slot);
        Ok(response)
    }

    /// Register a catch-all awaiter resolved by the next `NOTICE`.
    pub fn register_generic(&self, timeout: Duration) -> Result<PendingResponse> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ClientError::Cancelled);
        }

        let (slot, response) = self.new_slot(&mut inner, None, RequestKind::Generic, timeout);
        inner.generic.push_back(slot);
        Ok(response)
    }

    fn new_slot(
        &self,
        inner: &mut Inner,
        key: Option<CorrelationKey>,
        kind: RequestKind,
        timeout: Duration,
    ) -> (Slot, PendingResponse) {
        let token = inner.next_token;
        inner.next_token += 1;

        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (tx, rx) = oneshot::channel();

        let slot = Slot {
            token,
            request: PendingRequest {
                key: key.clone(),
                kind,
                created_at,
                deadline,
            },
            tx,
        };
        let response = PendingResponse {
            rx,
            token,
            key,
            deadline,
            correlator: self.clone(),
        };
        (slot, response)
    }

    /// Route an inbound frame to its awaiter. Returns whether one was resolved.
    pub fn dispatch(&self, msg: RelayMessage) -> bool {
        let mut inner = self.lock();

        if let RelayMessage::Notice { .. } = msg {
            while let Some(slot) = inner.generic.pop_front() {
                if slot.tx.send(Ok(msg.clone())).is_ok() {
                    return true;
                }
            }
            debug!("No generic awaiter for NOTICE");
            return false;
        }

        let Some(key) = CorrelationKey::for_message(&msg) else {
            return false;
        };
        match inner.keyed.remove(&key) {
            Some(slot) => slot.tx.send(Ok(msg)).is_ok(),
            None => {
                debug!("Dropping stale {} frame for {}", msg.tag(), key);
                false
            }
        }
    }

    /// Fail every pending awaiter with `Cancelled` and refuse new ones.
    pub fn cancel_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;

        let keyed: Vec<Slot> = inner.keyed.drain().map(|(_, slot)| slot).collect();
        let generic: Vec<Slot> = inner.generic.drain(..).collect();
        drop(inner);

        let count = keyed.len() + generic.len();
        for slot in keyed.into_iter().chain(generic) {
            let _ = slot.tx.send(Err(ClientError::Cancelled));
        }
        if count > 0 {
            debug!("Cancelled {} pending requests", count);
        }
    }

    /// Whether `cancel_all` has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Snapshot of the pending requests.
    pub fn pending(&self) -> Vec<PendingRequest> {
        let inner = self.lock();
        inner
            .keyed
            .values()
            .chain(inner.generic.iter())
            .map(|slot| slot.request.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.keyed.len() + inner.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: Option<&CorrelationKey>, token: u64) {
        let mut inner = self.lock();
        match key {
            Some(key) => {
                if inner.keyed.get(key).is_some_and(|slot| slot.token == token) {
                    inner.keyed.remove(key);
                }
            }
            None => inner.generic.retain(|slot| slot.token != token),
        }
    }
}

/// Handle to one registered awaiter. Dropping it unregisters the awaiter.
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<RelayMessage>>,
    token: u64,
    key: Option<CorrelationKey>,
    deadline: Instant,
    correlator: RequestCorrelator,
}

impl PendingResponse {
    pub fn key(&self) -> Option<&CorrelationKey> {
        self.key.as_ref()
    }

    /// Wait for the response until the registered deadline.
    pub async fn wait(mut self) -> Result<RelayMessage> {
        match timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => Err(ClientError::RequestTimeout(match &self.key {
                Some(key) => format!("no response for {}", key),
                None => "no notice".to_string(),
            })),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.correlator.remove(self.key.as_ref(), self.token);
    }
}
