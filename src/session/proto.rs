//! Wire protocol for the EventSub websocket: envelope decoding and the five
//! message payloads.
//!
//! Decoding is a pure mapping from raw frame text to a typed [`Envelope`];
//! rejects carry enough detail for the caller to log and drop the frame
//! without touching session state.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::helix::Subscription;

/// Outer wrapper of every inbound push message.
///
/// `id` is the deduplication key and is guaranteed non-empty by the decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Welcome(_) => MessageKind::Welcome,
            Payload::Keepalive => MessageKind::Keepalive,
            Payload::Notification(_) => MessageKind::Notification,
            Payload::Reconnect(_) => MessageKind::Reconnect,
            Payload::Revocation(_) => MessageKind::Revocation,
        }
    }
}

/// Discriminant of the five known message types.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageKind {
    Welcome,
    Keepalive,
    Notification,
    Reconnect,
    Revocation,
}

/// Typed message payload, closed over the five known kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Welcome(SessionInfo),
    Keepalive,
    Notification(Notification),
    Reconnect(SessionInfo),
    Revocation(RevokedSubscription),
}

/// Connection description carried by welcome and reconnect messages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub status: String,
    /// Longest silence to expect before a keepalive; also the window for
    /// subscribing after a welcome. Null on reconnect messages.
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    /// Target URL for a server-requested reconnect. Null on welcomes.
    #[serde(default)]
    pub reconnect_url: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// A delivered event together with the subscription that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub subscription_type: String,
    pub subscription_version: String,
    pub subscription: Subscription,
    /// Event payload; its shape depends on the subscription type.
    pub event: Value,
}

/// Subscription record carried by a revocation, with the reason in `status`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RevokedSubscription {
    pub id: String,
    pub status: RevocationReason,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub condition: Value,
    pub cost: u64,
    pub created_at: DateTime<Utc>,
}

/// Machine-readable reason a subscription was revoked.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    AuthorizationRevoked,
    UserRemoved,
    VersionRemoved,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationRevoked => "authorization_revoked",
            Self::UserRemoved => "user_removed",
            Self::VersionRemoved => "version_removed",
        }
    }
}

/// Reasons an inbound frame was rejected by the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON, or a known type tag whose payload does not parse.
    #[error("malformed message payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// No non-empty `metadata.message_id`; such frames must never reach
    /// deduplication or the state machine.
    #[error("message carries no id")]
    MissingId,

    /// A type tag outside the five known kinds. Non-fatal by contract so
    /// that future message types do not kill the connection.
    #[error("unknown message type `{0}`")]
    UnknownKind(String),
}

/// Decodes one raw frame into a typed envelope.
///
/// The id check runs before the type tag is inspected, so a frame without an
/// id is always a [`DecodeError::MissingId`] even when its type tag would be
/// unknown.
pub fn decode_envelope(text: &str) -> Result<Envelope, DecodeError> {
    let raw: Value = serde_json::from_str(text)?;
    let metadata = raw.get("metadata");
    let payload = raw.get("payload");

    let id = metadata
        .and_then(|m| m.get("message_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(DecodeError::MissingId)?
        .to_string();

    let timestamp: DateTime<Utc> = field(metadata, "message_timestamp")?;

    let kind = metadata
        .and_then(|m| m.get("message_type"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let payload = match kind {
        "session_welcome" => Payload::Welcome(field(payload, "session")?),
        "session_keepalive" => Payload::Keepalive,
        "notification" => Payload::Notification(Notification {
            subscription_type: field(metadata, "subscription_type")?,
            subscription_version: field(metadata, "subscription_version")?,
            subscription: field(payload, "subscription")?,
            event: field(payload, "event")?,
        }),
        "session_reconnect" => Payload::Reconnect(field(payload, "session")?),
        "revocation" => Payload::Revocation(field(payload, "subscription")?),
        other => return Err(DecodeError::UnknownKind(other.to_string())),
    };

    Ok(Envelope {
        id,
        timestamp,
        payload,
    })
}

fn field<T: DeserializeOwned>(object: Option<&Value>, name: &str) -> Result<T, serde_json::Error> {
    let value = object
        .and_then(|object| object.get(name))
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(value)
}
