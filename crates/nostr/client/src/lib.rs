//! Relay publishing and authentication client for the community badge app.
//!
//! This crate provides:
//! - WebSocket connections to relays with a single ordered inbound path
//! - Request/response correlation for `OK`, `EVENT`, `EOSE`, `CLOSED` and `NOTICE`
//! - NIP-42 authentication with a one-retry policy
//! - Concurrent publish to many relays with per-relay outcomes
//! - Single-result queries, with a TTL cache for profile lookups
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_client::{RelayClient, RelayClientConfig};
//! use nostr_core::{EventTemplate, SecretKeySigner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> relay_client::Result<()> {
//!     let signer = Arc::new(SecretKeySigner::generate()?);
//!     let client = RelayClient::new(RelayClientConfig::default()).with_signer(signer);
//!
//!     let result = client
//!         .sign_and_publish(&EventTemplate::new(1, vec![], "hello"))
//!         .await?;
//!     println!("{}", result.summary());
//!
//!     for failed in &result.failed {
//!         println!("{} rejected: {}", failed.url, failed.error);
//!     }
//!     Ok(())
//! }
//! ```

mod auth;
mod cache;
mod client;
mod config;
mod correlator;
mod error;
mod message;
mod publish;
mod query;
mod relay;

pub use auth::{AUTH_RETRY_BUDGET, AuthNegotiator, AuthPhase, AuthRequirement, AuthSession};
pub use cache::{CacheConfig, CacheKey, QueryCache};
pub use client::RelayClient;
pub use config::{
    DEFAULT_AUTH_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OK_TIMEOUT, DEFAULT_QUERY_TIMEOUT,
    DEFAULT_RELAYS, RelayClientConfig,
};
pub use correlator::{
    CorrelationKey, PendingRequest, PendingResponse, RequestCorrelator, RequestKind,
};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage, generate_subscription_id};
pub use publish::{FailedRelay, PublishCoordinator, PublishResult, RelayOutcome};
pub use query::{QueryCoordinator, QueryResult};
pub use relay::{ConnectionState, RelayConnection, RelayEndpoint};
