//! One-shot single-result queries against one relay.
//!
//! A query sends `REQ` with a fresh subscription id and settles on the first of:
//! `EVENT` (found), `EOSE` (nothing stored), `CLOSED` (rejected) or `NOTICE`
//! (relay gave up). `CLOSED` with `auth-required:` authenticates and retries
//! once under a new subscription id.
//!
//! `CLOSE` follows every settled subscription except one ended by `CLOSED`:
//! the relay has already dropped it, so after an auth-required `CLOSED` the
//! next frame is `AUTH`.
//!
//! Only profile lookups go through the [`QueryCache`]. Plain queries always
//! reach the relay.

use crate::auth::{AuthNegotiator, AuthSession};
use crate::cache::{CacheKey, QueryCache};
use crate::config::RelayClientConfig;
use crate::correlator::{CorrelationKey, RequestKind};
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage, generate_subscription_id};
use crate::relay::RelayConnection;
use nostr_core::{Event, EventSigner, KIND_METADATA, canonical_relay_url, is_auth_required};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a single-result query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Relay URL (canonical)
    pub url: String,
    /// First matching event, if any
    pub event: Option<Event>,
    /// Why the query failed, if it did
    pub error: Option<ClientError>,
}

impl QueryResult {
    fn settled(url: String, result: Result<Option<Event>>) -> Self {
        match result {
            Ok(event) => Self {
                url,
                event,
                error: None,
            },
            Err(error) => Self {
                url,
                event: None,
                error: Some(error),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Option<Event>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.event),
        }
    }
}

/// How one `REQ` ended.
enum QueryReply {
    Found(Event),
    Empty,
    Closed(String),
}

/// Runs queries. Profile lookups may be served from a [`QueryCache`].
#[derive(Clone)]
pub struct QueryCoordinator {
    config: RelayClientConfig,
    negotiator: AuthNegotiator,
    cache: Option<Arc<QueryCache>>,
}

impl QueryCoordinator {
    pub fn new(config: RelayClientConfig) -> Self {
        let negotiator = AuthNegotiator::new(config.auth_timeout);
        Self {
            config,
            negotiator,
            cache: None,
        }
    }

    /// Serve repeated profile lookups from `cache`.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    /// Query `relay_url` for the first event matching `filter`.
    pub async fn query(
        &self,
        filter: &Filter,
        relay_url: &str,
        signer: Option<&dyn EventSigner>,
    ) -> QueryResult {
        let url = canonical_relay_url(relay_url);
        let result = self.query_relay(&url, filter, signer).await;
        QueryResult::settled(url, result)
    }

    /// [`query`](Self::query) as a `Result`.
    pub async fn query_event(
        &self,
        filter: &Filter,
        relay_url: &str,
        signer: Option<&dyn EventSigner>,
    ) -> Result<Option<Event>> {
        self.query(filter, relay_url, signer).await.into_result()
    }

    /// Latest profile (kind 0) for `pubkey`.
    pub async fn fetch_profile(&self, pubkey: &str, relay_url: &str) -> Result<Option<Event>> {
        let filter = Filter::new()
            .kinds(vec![KIND_METADATA])
            .authors(vec![pubkey.to_string()])
            .limit(1);
        self.query_cached(&filter, relay_url).await
    }

    /// Display name from `pubkey`'s profile (`display_name`, then `name`).
    pub async fn resolve_name(&self, pubkey: &str, relay_url: &str) -> Result<Option<String>> {
        let Some(profile) = self.fetch_profile(pubkey, relay_url).await? else {
            return Ok(None);
        };
        Ok(profile_name(&profile.content))
    }

    /// Like [`query_event`](Self::query_event), answered from the cache when possible.
    async fn query_cached(&self, filter: &Filter, relay_url: &str) -> Result<Option<Event>> {
        let url = canonical_relay_url(relay_url);
        let Some(cache) = &self.cache else {
            return self.query_relay(&url, filter, None).await;
        };

        let key = CacheKey::new(&url, filter);
        if let Some(event) = cache.get(&key) {
            debug!("Query cache hit for {} on {}", key.filter, url);
            return Ok(Some(event));
        }

        let found = self.query_relay(&url, filter, None).await?;
        if let Some(event) = &found {
            cache.insert(key, event.clone());
        }
        Ok(found)
    }

    async fn query_relay(
        &self,
        url: &str,
        filter: &Filter,
        signer: Option<&dyn EventSigner>,
    ) -> Result<Option<Event>> {
        let conn = RelayConnection::open(url, &self.config)
            .await
            .inspect_err(|e| warn!("Query to {} failed: {}", url, e))?;

        let result = self.query_with_auth(&conn, filter, signer).await;
        conn.close().await;

        match &result {
            Ok(Some(_)) => {}
            Ok(None) => debug!("Query to {} found nothing", url),
            Err(e) => warn!("Query to {} failed: {}", url, e),
        }
        result
    }

    async fn query_with_auth(
        &self,
        conn: &RelayConnection,
        filter: &Filter,
        signer: Option<&dyn EventSigner>,
    ) -> Result<Option<Event>> {
        loop {
            match self.query_once(conn, filter).await? {
                QueryReply::Found(event) => {
                    conn.with_auth(AuthSession::on_accepted);
                    return Ok(Some(event));
                }
                QueryReply::Empty => {
                    conn.with_auth(AuthSession::on_accepted);
                    return Ok(None);
                }
                QueryReply::Closed(reason) if is_auth_required(&reason) => {
                    self.negotiator
                        .handle_auth_required(conn, &reason, signer)
                        .await?;
                }
                QueryReply::Closed(reason) => return Err(ClientError::Rejected(reason)),
            }
        }
    }

    async fn query_once(&self, conn: &RelayConnection, filter: &Filter) -> Result<QueryReply> {
        let subscription_id = generate_subscription_id();
        let timeout = self.config.query_timeout;

        let correlator = conn.correlator();
        let keyed = correlator.register(
            CorrelationKey::Subscription(subscription_id.clone()),
            RequestKind::Query,
            timeout,
        )?;
        let notice = correlator.register_generic(timeout)?;

        conn.send(&ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters: vec![filter.clone()],
        })
        .await?;

        let reply = tokio::select! {
            biased;
            reply = keyed.wait() => reply,
            reply = notice.wait() => reply,
        };

        let reply = match reply {
            Ok(RelayMessage::Event { event, .. }) => Ok(QueryReply::Found(event)),
            Ok(RelayMessage::Eose { .. }) => Ok(QueryReply::Empty),
            // The relay already dropped the subscription.
            Ok(RelayMessage::Closed { message, .. }) => return Ok(QueryReply::Closed(message)),
            Ok(RelayMessage::Notice { message }) => Err(ClientError::Rejected(message)),
            Ok(other) => Err(ClientError::Internal(format!(
                "unexpected {} reply to REQ",
                other.tag()
            ))),
            Err(e) => Err(e),
        };

        if let Err(e) = conn
            .send(&ClientMessage::Close {
                subscription_id: subscription_id.clone(),
            })
            .await
        {
            debug!("Could not close subscription {}: {}", subscription_id, e);
        }

        reply
    }
}

/// Name from kind 0 profile content.
fn profile_name(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    ["display_name", "name"]
        .iter()
        .filter_map(|field| value.get(field).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}
