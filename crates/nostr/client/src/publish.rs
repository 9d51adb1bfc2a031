//! Publishing one event to many relays.
//!
//! Each relay runs as its own task: open, send `EVENT`, wait for the
//! correlated `OK`, authenticate and retry once on `auth-required:`, close.
//! The coordinator waits for every task and reports per-relay outcomes; one
//! relay failing, timing out or panicking never affects the others.

use crate::auth::{AuthNegotiator, AuthSession};
use crate::config::RelayClientConfig;
use crate::correlator::{CorrelationKey, RequestKind};
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use crate::relay::RelayConnection;
use futures::FutureExt;
use nostr_core::{Event, EventSigner, canonical_relay_url, is_auth_required};
use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Terminal result of one relay handling one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Relay URL (canonical)
    pub url: String,
    /// Whether the relay accepted the request
    pub accepted: bool,
    /// Relay message (or error text when the relay never answered)
    pub message: String,
    /// Events returned, for queries
    pub events: Vec<Event>,
    /// Why the relay failed, if it did
    pub error: Option<ClientError>,
}

impl RelayOutcome {
    pub fn accepted(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            accepted: true,
            message: message.into(),
            events: Vec::new(),
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: ClientError) -> Self {
        let message = error
            .relay_message()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        Self {
            url: url.into(),
            accepted: false,
            message,
            events: Vec::new(),
            error: Some(error),
        }
    }
}

/// A relay that did not accept the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRelay {
    pub url: String,
    pub error: ClientError,
}

/// Aggregate result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    /// Relays that answered `OK(true)`
    pub successful_urls: BTreeSet<String>,
    /// Everyone else, in input order
    pub failed: Vec<FailedRelay>,
    /// One outcome per relay attempted, in input order
    pub outcomes: Vec<RelayOutcome>,
}

impl PublishResult {
    pub fn from_outcomes(outcomes: Vec<RelayOutcome>) -> Self {
        let mut successful_urls = BTreeSet::new();
        let mut failed = Vec::new();
        for outcome in &outcomes {
            if outcome.accepted {
                successful_urls.insert(outcome.url.clone());
            } else {
                failed.push(FailedRelay {
                    url: outcome.url.clone(),
                    error: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| ClientError::Rejected(outcome.message.clone())),
                });
            }
        }
        Self {
            successful_urls,
            failed,
            outcomes,
        }
    }

    /// At least one relay accepted.
    pub fn is_success(&self) -> bool {
        !self.successful_urls.is_empty()
    }

    /// Number of relays attempted.
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "accepted by {}/{} relays",
            self.successful_urls.len(),
            self.attempted()
        );
        if !self.failed.is_empty() {
            let reasons: Vec<String> = self
                .failed
                .iter()
                .map(|f| {
                    let reason = f
                        .error
                        .relay_message()
                        .map(str::to_string)
                        .unwrap_or_else(|| f.error.to_string());
                    format!("{} ({})", f.url, reason)
                })
                .collect();
            summary.push_str("; failed: ");
            summary.push_str(&reasons.join(", "));
        }
        summary
    }
}

/// Fans a publish out to every relay and joins the outcomes.
#[derive(Debug, Clone)]
pub struct PublishCoordinator {
    config: RelayClientConfig,
    negotiator: AuthNegotiator,
}

impl PublishCoordinator {
    pub fn new(config: RelayClientConfig) -> Self {
        let negotiator = AuthNegotiator::new(config.auth_timeout);
        Self { config, negotiator }
    }

    pub fn config(&self) -> &RelayClientConfig {
        &self.config
    }

    /// Publish `event` to every relay in `relay_urls`.
    ///
    /// Only an empty relay list is an error; per-relay failures are in the
    /// result. Dropping the returned future aborts all relay tasks.
    pub async fn publish<S: AsRef<str>>(
        &self,
        event: &Event,
        relay_urls: &[S],
        signer: Option<Arc<dyn EventSigner>>,
    ) -> Result<PublishResult> {
        let urls = dedup_relays(relay_urls);
        if urls.is_empty() {
            return Err(ClientError::NoRelays);
        }

        info!("Publishing event {} to {} relays", event.id, urls.len());

        let mut tasks = JoinSet::new();
        for (index, url) in urls.iter().enumerate() {
            let url = url.clone();
            let event = event.clone();
            let signer = signer.clone();
            let config = self.config.clone();
            let negotiator = self.negotiator.clone();

            tasks.spawn(async move {
                let attempt = AssertUnwindSafe(publish_to_relay(
                    &url,
                    &event,
                    signer.as_deref(),
                    &config,
                    &negotiator,
                ))
                .catch_unwind()
                .await;
                let outcome = attempt.unwrap_or_else(|_| {
                    warn!("Publish task for {} panicked", url);
                    RelayOutcome::failed(
                        url.clone(),
                        ClientError::Internal("relay task panicked".to_string()),
                    )
                });
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<RelayOutcome>> = vec![None; urls.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!("Publish task did not complete: {}", e),
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| {
                    RelayOutcome::failed(
                        url,
                        ClientError::Internal("relay task did not complete".to_string()),
                    )
                })
            })
            .collect();

        let result = PublishResult::from_outcomes(outcomes);
        info!("Event {} {}", event.id, result.summary());
        Ok(result)
    }
}

/// Canonical, de-duplicated relay list in input order.
fn dedup_relays<S: AsRef<str>>(relay_urls: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    relay_urls
        .iter()
        .map(|url| canonical_relay_url(url.as_ref()))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

async fn publish_to_relay(
    url: &str,
    event: &Event,
    signer: Option<&dyn EventSigner>,
    config: &RelayClientConfig,
    negotiator: &AuthNegotiator,
) -> RelayOutcome {
    let conn = match RelayConnection::open(url, config).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Publish to {} failed: {}", url, e);
            return RelayOutcome::failed(url, e);
        }
    };

    let result = publish_with_auth(&conn, event, signer, config, negotiator).await;
    conn.close().await;

    match result {
        Ok(message) => {
            debug!("Relay {} accepted event {}", url, event.id);
            RelayOutcome::accepted(url, message)
        }
        Err(e) => {
            warn!("Publish to {} failed: {}", url, e);
            RelayOutcome::failed(url, e)
        }
    }
}

/// Send `EVENT` until the relay gives a final answer.
///
/// Loops at most twice: the auth retry budget refuses a second handshake.
async fn publish_with_auth(
    conn: &RelayConnection,
    event: &Event,
    signer: Option<&dyn EventSigner>,
    config: &RelayClientConfig,
    negotiator: &AuthNegotiator,
) -> Result<String> {
    loop {
        let reply = conn
            .request(
                &ClientMessage::Event(event.clone()),
                CorrelationKey::Event(event.id.clone()),
                RequestKind::Publish,
                config.ok_timeout,
            )
            .await?;

        match reply {
            RelayMessage::Ok {
                success: true,
                message,
                ..
            } => {
                conn.with_auth(AuthSession::on_accepted);
                return Ok(message);
            }
            RelayMessage::Ok { message, .. } if is_auth_required(&message) => {
                negotiator
                    .handle_auth_required(conn, &message, signer)
                    .await?;
            }
            RelayMessage::Ok { message, .. } => return Err(ClientError::Rejected(message)),
            other => {
                return Err(ClientError::Internal(format!(
                    "unexpected {} reply to EVENT",
                    other.tag()
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_relays() {
        let urls = dedup_relays(&[
            "wss://a.example/",
            "wss://b.example",
            "wss://a.example",
            " wss://b.example/ ",
        ]);
        assert_eq!(urls, vec!["wss://a.example", "wss://b.example"]);
    }

    #[test]
    fn test_from_outcomes_partitions() {
        let result = PublishResult::from_outcomes(vec![
            RelayOutcome::accepted("ws://a", ""),
            RelayOutcome::failed("ws://b", ClientError::Rejected("blocked: spam".into())),
            RelayOutcome::failed("ws://c", ClientError::RequestTimeout("no OK".into())),
        ]);

        assert!(result.is_success());
        assert_eq!(result.successful_urls, BTreeSet::from(["ws://a".to_string()]));
        assert_eq!(
            result.failed,
            vec![
                FailedRelay {
                    url: "ws://b".into(),
                    error: ClientError::Rejected("blocked: spam".into()),
                },
                FailedRelay {
                    url: "ws://c".into(),
                    error: ClientError::RequestTimeout("no OK".into()),
                },
            ]
        );
        assert_eq!(result.successful_urls.len() + result.failed.len(), 3);
    }

    #[test]
    fn test_summary() {
        let result = PublishResult::from_outcomes(vec![
            RelayOutcome::accepted("ws://a", ""),
            RelayOutcome::failed("ws://b", ClientError::Rejected("blocked: spam".into())),
        ]);
        assert_eq!(
            result.summary(),
            "accepted by 1/2 relays; failed: ws://b (blocked: spam)"
        );

        let none = PublishResult::from_outcomes(vec![RelayOutcome::failed(
            "ws://a",
            ClientError::Cancelled,
        )]);
        assert!(!none.is_success());
    }

    #[test]
    fn test_failed_outcome_message() {
        let outcome = RelayOutcome::failed("ws://a", ClientError::Rejected("pow: too low".into()));
        assert_eq!(outcome.message, "pow: too low");
        assert!(!outcome.accepted);

        let outcome = RelayOutcome::failed("ws://a", ClientError::NotConnected);
        assert_eq!(outcome.message, "Not connected to relay");
    }

    #[tokio::test]
    async fn test_empty_relay_list() {
        let coordinator = PublishCoordinator::new(RelayClientConfig::new());
        let event = nostr_core::SecretKeySigner::generate()
            .unwrap()
            .sign(&nostr_core::EventTemplate::new(1, vec![], "hello"))
            .unwrap();
        let relays: &[&str] = &[];
        assert_eq!(
            coordinator.publish(&event, relays, None).await,
            Err(ClientError::NoRelays)
        );
    }
}
