//! High-level client bundling config, signer and cache.

use crate::cache::QueryCache;
use crate::config::RelayClientConfig;
use crate::error::{ClientError, Result};
use crate::message::Filter;
use crate::publish::{PublishCoordinator, PublishResult};
use crate::query::{QueryCoordinator, QueryResult};
use nostr_core::{Event, EventSigner, EventTemplate};
use std::sync::Arc;

/// Relay client for one identity.
#[derive(Clone)]
pub struct RelayClient {
    config: RelayClientConfig,
    signer: Option<Arc<dyn EventSigner>>,
    publisher: PublishCoordinator,
    queries: QueryCoordinator,
}

impl RelayClient {
    /// Client with its own profile cache.
    pub fn new(config: RelayClientConfig) -> Self {
        Self::with_cache(config, Arc::new(QueryCache::new()))
    }

    pub fn with_cache(config: RelayClientConfig, cache: Arc<QueryCache>) -> Self {
        Self {
            publisher: PublishCoordinator::new(config.clone()),
            queries: QueryCoordinator::new(config.clone()).with_cache(cache),
            config,
            signer: None,
        }
    }

    /// Use `signer` to sign events and answer AUTH challenges.
    pub fn with_signer(mut self, signer: Arc<dyn EventSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &RelayClientConfig {
        &self.config
    }

    pub fn signer(&self) -> Option<&Arc<dyn EventSigner>> {
        self.signer.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.queries.cache()
    }

    /// Sign a template with the configured signer.
    pub fn sign(&self, template: &EventTemplate) -> Result<Event> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ClientError::Signing("no signer configured".to_string()))?;
        Ok(signer.sign(template)?)
    }

    pub async fn publish<S: AsRef<str>>(
        &self,
        event: &Event,
        relay_urls: &[S],
    ) -> Result<PublishResult> {
        self.publisher
            .publish(event, relay_urls, self.signer.clone())
            .await
    }

    /// Publish to `config.default_relays`.
    pub async fn publish_to_default(&self, event: &Event) -> Result<PublishResult> {
        self.publish(event, &self.config.default_relays).await
    }

    /// Sign `template` and publish it to `config.default_relays`.
    pub async fn sign_and_publish(&self, template: &EventTemplate) -> Result<PublishResult> {
        let event = self.sign(template)?;
        self.publish_to_default(&event).await
    }

    pub async fn query(&self, filter: &Filter, relay_url: &str) -> QueryResult {
        self.queries
            .query(filter, relay_url, self.signer.as_deref())
            .await
    }

    pub async fn query_event(&self, filter: &Filter, relay_url: &str) -> Result<Option<Event>> {
        self.query(filter, relay_url).await.into_result()
    }

    pub async fn fetch_profile(&self, pubkey: &str, relay_url: &str) -> Result<Option<Event>> {
        self.queries.fetch_profile(pubkey, relay_url).await
    }

    pub async fn resolve_name(&self, pubkey: &str, relay_url: &str) -> Result<Option<String>> {
        self.queries.resolve_name(pubkey, relay_url).await
    }
}
