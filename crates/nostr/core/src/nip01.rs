//! NIP-01: the signed event record.
//!
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical serialization `[0, pubkey, created_at, kind, tags, content]` for hashing
//! - BIP-340 Schnorr signing over the event id
//! - Structural validation and full signature verification

use bitcoin::hashes::{Hash, sha256};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}

/// A signed Nostr event. Never mutated once produced by a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded x-only public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Ordered tags, each an ordered list of strings
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex Schnorr signature over `id`
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

/// An unsigned event, used for hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A template for creating events. The pubkey comes from the signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Ordered tags
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time.
    pub fn new(kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags,
            content: content.into(),
        }
    }
}

pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;

/// Current unix time in seconds (0 if the clock is before the epoch).
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Generate a random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Get the x-only public key (32 bytes) for a secret key.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidSecretKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(xonly.serialize())
}

/// Get the public key as lowercase hex.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    Ok(hex::encode(get_public_key(secret_key)?))
}

/// Serialize an unsigned event for hashing: `[0, pubkey, created_at, kind, tags, content]`.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !validate_unsigned_event(event) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Compute the event id (hex sha256 of the canonical serialization).
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Validate an unsigned event structure.
pub fn validate_unsigned_event(event: &UnsignedEvent) -> bool {
    is_lower_hex(&event.pubkey, 64)
}

/// Validate a signed event's structure (no signature check).
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64) && is_lower_hex(&event.pubkey, 64) && is_lower_hex(&event.sig, 128)
}

/// Sign an event template with a secret key.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidSecretKey(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly_pk, _parity) = keypair.x_only_public_key();
    let pubkey = hex::encode(xonly_pk.serialize());

    let unsigned = UnsignedEvent {
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    let id = get_event_hash(&unsigned)?;

    let id_bytes =
        hex::decode(&id).map_err(|e| Nip01Error::Signing(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Nip01Error::Signing(format!("invalid message: {}", e)))?;
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Verify an event's id and signature.
///
/// Returns `Ok(false)` for well-formed events that do not verify, and an error
/// only when the hex fields cannot be decoded at all.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !validate_event(event) {
        return Ok(false);
    }

    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    if get_event_hash(&unsigned)? != event.id {
        return Ok(false);
    }

    let id_bytes = hex::decode(&event.id)
        .map_err(|e| Nip01Error::Verification(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Nip01Error::Verification(format!("invalid message: {}", e)))?;

    let sig_bytes = hex::decode(&event.sig)
        .map_err(|e| Nip01Error::Verification(format!("invalid sig hex: {}", e)))?;
    let Ok(sig) = schnorr::Signature::from_slice(&sig_bytes) else {
        return Ok(false);
    };

    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| Nip01Error::Verification(format!("invalid pubkey hex: {}", e)))?;
    let Ok(pubkey) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
        return Ok(false);
    };

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}
