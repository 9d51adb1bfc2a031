//! Nostr event primitives used by the community badge relay client.
//!
//! This crate provides:
//! - NIP-01: the signed event record, id hashing, Schnorr signing and verification
//! - NIP-42: authentication event templates and relay URL canonicalisation
//! - [`EventSigner`]: the signing capability handed to the relay client
//!
//! Application event kinds (profiles, offers, payment requests, RSVPs) are built
//! elsewhere; this crate only turns an [`EventTemplate`] into a signed [`Event`].

mod nip01;
mod nip42;
mod signer;

#[cfg(test)]
mod tests;

// NIP-01: Basic protocol
pub use nip01::{
    Event, EventTemplate, KIND_METADATA, KIND_SHORT_TEXT_NOTE, Nip01Error, UnsignedEvent,
    finalize_event, generate_secret_key, get_event_hash, get_public_key, get_public_key_hex,
    serialize_event, unix_now, validate_event, validate_unsigned_event, verify_event,
};

// NIP-42: Authentication of clients to relays
pub use nip42::{
    AUTH_KIND, AUTH_REQUIRED_PREFIX, Nip42Error, canonical_relay_url, create_auth_template,
    is_auth_required, validate_auth_event,
};

// Signing capability
pub use signer::{EventSigner, SecretKeySigner, SignerError};
