//! Session state machine binding the transport, decoder, deduplicator, and
//! registrar into one consumer-facing event stream.
//!
//! `EventSession` owns exactly one logical session. The transport under it
//! may be replaced across connects, but shared state (dedup set, quota)
//! lives for the session value's lifetime and is only touched from the
//! single recv/connect/disconnect path, so no locking is involved.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::helix::Subscription;
use crate::session::client::{SocketClient, Transport, TransportEvent};
use crate::session::dedup::DeliveryDedup;
use crate::session::proto::{decode_envelope, DecodeError, Payload, RevocationReason, SessionInfo};
use crate::session::registrar::{Quota, RegistrationError, SubscriptionRegistrar};

/// The subscription a session registers once the service issues a welcome.
#[derive(Clone, Debug, PartialEq)]
pub struct EventTarget {
    pub kind: String,
    pub version: String,
    pub condition: Value,
}

impl EventTarget {
    pub fn new(kind: impl Into<String>, version: impl Into<String>, condition: Value) -> Self {
        Self {
            kind: kind.into(),
            version: version.into(),
            condition,
        }
    }

    /// Chat messages in `broadcaster_user_id`'s channel, read as `user_id`.
    pub fn channel_chat_message(broadcaster_user_id: &str, user_id: &str) -> Self {
        Self::new(
            "channel.chat.message",
            "1",
            serde_json::json!({
                "broadcaster_user_id": broadcaster_user_id,
                "user_id": user_id,
            }),
        )
    }
}

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingWelcome,
    Active,
}

/// Consumer-facing events emitted by [`EventSession::recv`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The welcome arrived and the target subscription registered.
    Connected {
        session_id: String,
        subscription: Subscription,
    },
    /// A novel notification, with its timestamp normalized to UTC.
    Message {
        subscription_type: String,
        timestamp: DateTime<Utc>,
        event: Value,
    },
    /// The service revoked a subscription. The connection stays open.
    Revoked {
        subscription_id: String,
        reason: RevocationReason,
    },
    /// The transport closed or failed. Session state has been torn down.
    Disconnected { reason: Option<String> },
}

/// One logical push session over a replaceable websocket transport.
pub struct EventSession {
    client: SocketClient,
    registrar: SubscriptionRegistrar,
    state: SessionState,
    transport: Option<Transport>,
    target: Option<EventTarget>,
    session_id: Option<String>,
    keepalive_timeout: Option<Duration>,
    reconnect_url: Option<String>,
    dedup: DeliveryDedup,
    subscriptions: HashMap<String, Subscription>,
    epoch: u64,
}

impl EventSession {
    pub fn new(client: SocketClient, registrar: SubscriptionRegistrar) -> Self {
        Self {
            client,
            registrar,
            state: SessionState::Disconnected,
            transport: None,
            target: None,
            session_id: None,
            keepalive_timeout: None,
            reconnect_url: None,
            dedup: DeliveryDedup::new(),
            subscriptions: HashMap::new(),
            epoch: 0,
        }
    }

    /// Opens the transport and arms `target` for registration on the next
    /// welcome. A no-op while a transport is already connecting or open, so
    /// repeated calls cannot create duplicate sockets.
    pub fn connect(&mut self, target: EventTarget) {
        if self.state != SessionState::Disconnected {
            debug!(event = "connect_ignored", state = ?self.state);
            return;
        }

        self.target = Some(target);
        self.transport = Some(self.client.open());
        self.state = SessionState::Connecting;
    }

    /// Connects to an explicit URL, such as a server-provided reconnect
    /// target from [`EventSession::reconnect_url`]. Same no-op guard as
    /// [`EventSession::connect`].
    pub fn connect_url(&mut self, url: &str, target: EventTarget) {
        if self.state != SessionState::Disconnected {
            debug!(event = "connect_ignored", state = ?self.state);
            return;
        }

        self.target = Some(target);
        self.transport = Some(self.client.open_url(url));
        self.state = SessionState::Connecting;
    }

    /// Asks the transport to close. Safe to call from any state, including
    /// repeatedly or while already disconnected; never errors. The final
    /// `Disconnected` event is delivered through [`EventSession::recv`]
    /// once the socket confirms the close.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }

    /// Drives the state machine and returns the next consumer event.
    ///
    /// Keepalives, duplicates, decode rejects, and reconnect signals are
    /// absorbed here; only the four event variants surface. Returns `None`
    /// once the session is disconnected and the final `Disconnected` event
    /// has already been delivered.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let transport = self.transport.as_mut()?;
            match transport.next_event().await {
                Some(TransportEvent::Opened) => {
                    debug!(event = "transport_opened");
                    self.state = SessionState::AwaitingWelcome;
                }
                Some(TransportEvent::Frame(text)) => {
                    if let Some(event) = self.handle_frame(&text).await {
                        return Some(event);
                    }
                }
                Some(TransportEvent::Closed { reason }) => {
                    self.teardown();
                    return Some(SessionEvent::Disconnected { reason });
                }
                None => {
                    self.teardown();
                    return Some(SessionEvent::Disconnected { reason: None });
                }
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id assigned by the most recent welcome.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Keepalive window announced by the most recent welcome. Informational
    /// only; the service-side timeout is authoritative and no timer runs
    /// here.
    pub fn keepalive_timeout(&self) -> Option<Duration> {
        self.keepalive_timeout
    }

    /// Target URL from the most recent reconnect signal, if any. Moving to
    /// it is the consumer's decision; this session never reconnects on its
    /// own.
    pub fn reconnect_url(&self) -> Option<&str> {
        self.reconnect_url.as_deref()
    }

    /// Cost accounting as of the last registration response.
    pub fn quota(&self) -> Quota {
        self.registrar.quota()
    }

    /// Subscriptions registered on this session and not yet revoked or
    /// unregistered.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.values().cloned().collect()
    }

    /// Unregisters a subscription and drops it from the session table.
    pub async fn unregister(&mut self, subscription_id: &str) -> Result<(), RegistrationError> {
        self.registrar.unregister(subscription_id).await?;
        self.subscriptions.remove(subscription_id);
        Ok(())
    }

    fn teardown(&mut self) {
        // The dedup set intentionally survives: the service may resend a
        // message it already delivered on the previous transport.
        self.transport = None;
        self.state = SessionState::Disconnected;
        self.session_id = None;
        self.keepalive_timeout = None;
        self.subscriptions.clear();
        self.epoch += 1;
    }

    async fn handle_frame(&mut self, text: &str) -> Option<SessionEvent> {
        let envelope = match decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(DecodeError::UnknownKind(kind)) => {
                warn!(event = "unknown_message_kind", kind);
                return None;
            }
            Err(err) => {
                error!(event = "message_decode_failed", error = %err);
                return None;
            }
        };

        if !self.dedup.observe(&envelope.id, envelope.kind()) {
            trace!(event = "duplicate_message_dropped", id = %envelope.id);
            return None;
        }

        match envelope.payload {
            Payload::Welcome(session) => self.on_welcome(session).await,
            Payload::Keepalive => {
                trace!(event = "keepalive");
                None
            }
            Payload::Notification(notification) => Some(SessionEvent::Message {
                subscription_type: notification.subscription_type,
                timestamp: envelope.timestamp,
                event: notification.event,
            }),
            Payload::Reconnect(session) => {
                warn!(event = "reconnect_requested", url = ?session.reconnect_url);
                self.reconnect_url = session.reconnect_url;
                None
            }
            Payload::Revocation(revoked) => {
                self.subscriptions.remove(&revoked.id);
                Some(SessionEvent::Revoked {
                    subscription_id: revoked.id,
                    reason: revoked.status,
                })
            }
        }
    }

    async fn on_welcome(&mut self, session: SessionInfo) -> Option<SessionEvent> {
        if self.state == SessionState::Active {
            debug!(event = "welcome_repeated", session_id = %session.id);
            return None;
        }

        self.session_id = Some(session.id.clone());
        self.keepalive_timeout = session.keepalive_timeout_seconds.map(Duration::from_secs);
        self.state = SessionState::Active;

        let Some(target) = self.target.clone() else {
            error!(event = "welcome_without_target");
            return None;
        };

        let epoch = self.epoch;
        let outcome = self
            .registrar
            .register(&target.kind, &target.version, target.condition, &session.id)
            .await;

        if epoch != self.epoch {
            // The transport went away while the registration was in flight;
            // the result belongs to a session that no longer exists.
            debug!(event = "stale_registration_discarded", session_id = %session.id);
            return None;
        }

        match outcome {
            Ok(subscription) => {
                self.subscriptions
                    .insert(subscription.id.clone(), subscription.clone());
                Some(SessionEvent::Connected {
                    session_id: session.id,
                    subscription,
                })
            }
            Err(err) => {
                error!(event = "registration_failed", error = %err);
                None
            }
        }
    }

    #[cfg(test)]
    fn attach_for_test(&mut self, transport: Transport, target: EventTarget) {
        self.target = Some(target);
        self.transport = Some(transport);
        self.state = SessionState::Connecting;
    }
}
