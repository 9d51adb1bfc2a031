//! Relay protocol frames.
//!
//! This module implements the frames exchanged with a relay (NIP-01, NIP-42):
//! - Client to Relay: EVENT, REQ, CLOSE, AUTH
//! - Relay to Client: EVENT, OK, EOSE, CLOSED, NOTICE, AUTH
//!
//! Anything else is a [`MessageError`] and is dropped by the connection.

use nostr_core::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

/// Generate a fresh subscription id (16 lowercase hex characters).
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },

    /// Authentication (NIP-42): ["AUTH", <event JSON>]
    Auth(Event),
}

impl ClientMessage {
    /// Serialize to JSON array for sending to relay.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr: Vec<Value> = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
            ClientMessage::Auth(event) => serde_json::json!(["AUTH", event]),
        };
        Ok(value.to_string())
    }

    /// Frame tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::Event(_) => "EVENT",
            ClientMessage::Req { .. } => "REQ",
            ClientMessage::Close { .. } => "CLOSE",
            ClientMessage::Auth(_) => "AUTH",
        }
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

fn string_at(arr: &[Value], index: usize, field: &str) -> Result<String, MessageError> {
    arr.get(index)
        .ok_or_else(|| MessageError::MissingField(field.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}

/// Optional trailing message: missing or non-string is treated as empty.
fn message_at(arr: &[Value], index: usize) -> String {
    arr.get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl RelayMessage {
    /// Parse a JSON message from the relay.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        if arr.len() < 2 {
            return Err(MessageError::InvalidFormat(format!(
                "expected at least 2 elements, got {}",
                arr.len()
            )));
        }

        let msg_type = arr[0]
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))?;

        match msg_type {
            "EVENT" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let event_value = arr
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("event".to_string()))?;
                let event: Event = serde_json::from_value(event_value.clone())?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = string_at(&arr, 1, "event_id")?;
                let success = arr
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("success".to_string()))?
                    .as_bool()
                    .ok_or_else(|| {
                        MessageError::InvalidFormat("success not a boolean".to_string())
                    })?;
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message: message_at(&arr, 3),
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
                message: message_at(&arr, 2),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&arr, 1, "message")?,
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: string_at(&arr, 1, "challenge")?,
            }),
            _ => Err(MessageError::UnknownType(msg_type.to_string())),
        }
    }

    /// Frame tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            RelayMessage::Event { .. } => "EVENT",
            RelayMessage::Ok { .. } => "OK",
            RelayMessage::Eose { .. } => "EOSE",
            RelayMessage::Closed { .. } => "CLOSED",
            RelayMessage::Notice { .. } => "NOTICE",
            RelayMessage::Auth { .. } => "AUTH",
        }
    }
}

/// Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries keyed by `#<letter>`
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event IDs.
    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    /// Filter by kinds.
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Filter by events since timestamp.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Filter by events until timestamp.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. The key is the tag letter (e.g., "e", "p", "d").
    pub fn tag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{}", key.into()), values);
        self
    }

    /// Stable JSON form, used as a cache key.
    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}
