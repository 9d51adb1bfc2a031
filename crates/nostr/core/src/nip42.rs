//! NIP-42: Authentication of clients to relays
//!
//! A relay sends `["AUTH", <challenge>]`. The client answers with
//! `["AUTH", <signed event>]` where the event is:
//!
//! - `kind`: 22242 (ephemeral, never stored by relays)
//! - `tags`: `[["challenge", <challenge>], ["relay", <relay url>]]`
//! - `content`: empty
//!
//! Relays signal that a request needs authentication by prefixing the
//! rejection message of an `OK` or `CLOSED` frame with `auth-required:`.

use crate::nip01::{Event, EventTemplate, unix_now};
use thiserror::Error;

/// Event kind for client authentication events
pub const AUTH_KIND: u16 = 22242;

/// Machine-readable prefix relays use when a request needs authentication
pub const AUTH_REQUIRED_PREFIX: &str = "auth-required:";

/// Maximum age (and future skew) accepted for an auth event, in seconds
pub const MAX_AUTH_AGE: u64 = 600;

/// Errors that can occur during NIP-42 operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Nip42Error {
    #[error("invalid event kind: expected {expected}, got {actual}")]
    InvalidKind { expected: u16, actual: u16 },

    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("relay mismatch: expected {expected}, got {actual}")]
    RelayMismatch { expected: String, actual: String },

    #[error("auth event timestamp outside the accepted window")]
    InvalidTimestamp,
}

/// Canonical form of a relay URL: trimmed, without a trailing slash.
pub fn canonical_relay_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Build the unsigned auth event for a challenge from `relay_url`.
pub fn create_auth_template(challenge: &str, relay_url: &str) -> EventTemplate {
    EventTemplate {
        created_at: unix_now(),
        kind: AUTH_KIND,
        tags: vec![
            vec!["challenge".to_string(), challenge.to_string()],
            vec!["relay".to_string(), canonical_relay_url(relay_url)],
        ],
        content: String::new(),
    }
}

/// Whether a relay rejection message asks the client to authenticate.
pub fn is_auth_required(message: &str) -> bool {
    message.starts_with(AUTH_REQUIRED_PREFIX)
}

/// Check an auth event the way a relay would (signature excluded).
pub fn validate_auth_event(
    event: &Event,
    challenge: &str,
    relay_url: &str,
) -> Result<(), Nip42Error> {
    if event.kind != AUTH_KIND {
        return Err(Nip42Error::InvalidKind {
            expected: AUTH_KIND,
            actual: event.kind,
        });
    }

    let got_challenge = event
        .tag_value("challenge")
        .ok_or(Nip42Error::MissingTag("challenge"))?;
    if got_challenge != challenge {
        return Err(Nip42Error::ChallengeMismatch);
    }

    let got_relay = event
        .tag_value("relay")
        .ok_or(Nip42Error::MissingTag("relay"))?;
    let expected = canonical_relay_url(relay_url);
    if canonical_relay_url(got_relay) != expected {
        return Err(Nip42Error::RelayMismatch {
            expected,
            actual: got_relay.to_string(),
        });
    }

    if unix_now().abs_diff(event.created_at) > MAX_AUTH_AGE {
        return Err(Nip42Error::InvalidTimestamp);
    }

    Ok(())
}
