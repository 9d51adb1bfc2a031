//! NIP-42 authentication.
//!
//! [`AuthSession`] is the per-connection state machine:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated
//!                                   \-> Failed
//! ```
//!
//! with a retry budget of one. [`AuthNegotiator`] drives it: on an
//! `auth-required:` rejection it signs a kind 22242 event for the most recent
//! challenge, sends it, and waits for the correlated `OK`.

use crate::correlator::{CorrelationKey, RequestKind};
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use crate::relay::RelayConnection;
use nostr_core::{EventSigner, create_auth_template};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Authentication attempts allowed per connection
pub const AUTH_RETRY_BUDGET: u8 = 1;

/// What we know about a relay's authentication requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthRequirement {
    #[default]
    Unknown,
    Required,
    NotRequired,
    Authenticated,
}

/// Handshake progress on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed(String),
}

/// Per-connection authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    phase: AuthPhase,
    requirement: AuthRequirement,
    retries_left: u8,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
            requirement: AuthRequirement::Unknown,
            retries_left: AUTH_RETRY_BUDGET,
        }
    }

    pub fn phase(&self) -> &AuthPhase {
        &self.phase
    }

    pub fn requirement(&self) -> AuthRequirement {
        self.requirement
    }

    pub fn retries_left(&self) -> u8 {
        self.retries_left
    }

    /// Whether another attempt may start.
    pub fn can_retry(&self) -> bool {
        self.retries_left > 0 && self.phase != AuthPhase::Authenticating
    }

    /// Relay sent a challenge or rejected with `auth-required:`.
    pub fn on_auth_required(&mut self) {
        if self.requirement == AuthRequirement::Unknown {
            self.requirement = AuthRequirement::Required;
        }
    }

    /// Relay accepted a request before any authentication.
    pub fn on_accepted(&mut self) {
        if self.requirement == AuthRequirement::Unknown {
            self.requirement = AuthRequirement::NotRequired;
        }
    }

    /// Start an attempt, consuming the retry budget.
    pub fn begin(&mut self) -> Result<()> {
        if self.phase == AuthPhase::Authenticating {
            return Err(ClientError::Internal(
                "authentication already in progress".to_string(),
            ));
        }
        if self.retries_left == 0 {
            return Err(ClientError::AuthRequired(
                "authentication retry budget exhausted".to_string(),
            ));
        }
        self.retries_left -= 1;
        self.phase = AuthPhase::Authenticating;
        self.on_auth_required();
        Ok(())
    }

    pub fn succeed(&mut self) {
        self.phase = AuthPhase::Authenticated;
        self.requirement = AuthRequirement::Authenticated;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.phase = AuthPhase::Failed(reason.into());
    }
}

/// Builds, signs and sends auth events.
#[derive(Debug, Clone)]
pub struct AuthNegotiator {
    timeout: Duration,
}

impl AuthNegotiator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Answer `challenge` on `conn`, waiting for the relay's `OK`.
    pub async fn authenticate(
        &self,
        conn: &RelayConnection,
        challenge: &str,
        signer: &dyn EventSigner,
    ) -> Result<()> {
        let template = create_auth_template(challenge, conn.url());
        let event = match signer.sign(&template) {
            Ok(event) => event,
            Err(e) => {
                conn.with_auth(|session| session.fail(e.to_string()));
                return Err(e.into());
            }
        };

        debug!("Authenticating to {} as {}", conn.url(), event.pubkey);
        let key = CorrelationKey::Event(event.id.clone());
        let reply = conn
            .request(&ClientMessage::Auth(event), key, RequestKind::Auth, self.timeout)
            .await;

        match reply {
            Ok(RelayMessage::Ok { success: true, .. }) => {
                conn.with_auth(AuthSession::succeed);
                info!("Authenticated to relay: {}", conn.url());
                Ok(())
            }
            Ok(RelayMessage::Ok { message, .. }) => {
                warn!("Relay {} rejected authentication: {}", conn.url(), message);
                conn.with_auth(|session| session.fail(message.clone()));
                Err(ClientError::AuthRejected(message))
            }
            Ok(other) => {
                conn.with_auth(|session| session.fail("unexpected reply"));
                Err(ClientError::Internal(format!(
                    "unexpected {} reply to AUTH",
                    other.tag()
                )))
            }
            Err(e) => {
                warn!("Authentication to {} failed: {}", conn.url(), e);
                conn.with_auth(|session| session.fail(e.to_string()));
                Err(e)
            }
        }
    }

    /// React to an `auth-required:` rejection carrying `message`.
    ///
    /// Succeeds when the caller should retry its request once. Fails with
    /// `AuthRequired(message)` when there is no signer or the budget is spent.
    pub async fn handle_auth_required(
        &self,
        conn: &RelayConnection,
        message: &str,
        signer: Option<&dyn EventSigner>,
    ) -> Result<()> {
        conn.with_auth(AuthSession::on_auth_required);

        let Some(signer) = signer else {
            warn!("Relay {} requires authentication but no signer was supplied", conn.url());
            return Err(ClientError::AuthRequired(message.to_string()));
        };
        if conn.with_auth(AuthSession::begin).is_err() {
            warn!("Relay {} still requires authentication: {}", conn.url(), message);
            return Err(ClientError::AuthRequired(message.to_string()));
        }

        let challenge = match conn.challenge() {
            Some(challenge) => challenge,
            None => match conn.wait_for_challenge(self.timeout).await {
                Ok(challenge) => challenge,
                Err(e) => {
                    conn.with_auth(|session| session.fail(e.to_string()));
                    return Err(e);
                }
            },
        };

        self.authenticate(conn, &challenge, signer).await
    }
}
