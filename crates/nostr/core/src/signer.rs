//! Signing capability handed to the relay client.
//!
//! The client never sees key material directly; it asks an [`EventSigner`] to
//! turn a template into a signed [`Event`]. [`SecretKeySigner`] is the local
//! in-memory implementation.

use crate::nip01::{
    Event, EventTemplate, Nip01Error, finalize_event, generate_secret_key, get_public_key_hex,
};
use std::fmt;
use thiserror::Error;

/// Errors raised by a signer.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<Nip01Error> for SignerError {
    fn from(err: Nip01Error) -> Self {
        match err {
            Nip01Error::InvalidSecretKey(msg) => SignerError::InvalidKey(msg),
            other => SignerError::Signing(other.to_string()),
        }
    }
}

/// Something that can sign event templates for one identity.
///
/// Shared across relay tasks as `Arc<dyn EventSigner>`.
pub trait EventSigner: Send + Sync {
    /// Hex x-only public key of the signing identity
    fn public_key(&self) -> String;

    /// Sign a template, producing a finalized event
    fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError>;
}

/// Signer backed by a secret key held in memory.
#[derive(Clone)]
pub struct SecretKeySigner {
    secret_key: [u8; 32],
    public_key: String,
}

impl SecretKeySigner {
    pub fn new(secret_key: [u8; 32]) -> Result<Self, SignerError> {
        let public_key = get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Fresh random identity.
    pub fn generate() -> Result<Self, SignerError> {
        Self::new(generate_secret_key())
    }

    /// Parse a 64-character hex secret key.
    pub fn from_hex(secret_key_hex: &str) -> Result<Self, SignerError> {
        let bytes =
            hex::decode(secret_key_hex.trim()).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let secret_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("expected 32 bytes".to_string()))?;
        Self::new(secret_key)
    }
}

impl fmt::Debug for SecretKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeySigner")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl EventSigner for SecretKeySigner {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        Ok(finalize_event(template, &self.secret_key)?)
    }
}
