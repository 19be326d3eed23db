//! Low-level websocket transport for the EventSub push endpoint.
//!
//! A background worker owns the socket and forwards a sequential stream of
//! transport events. The worker never reconnects on its own and sends no
//! protocol frames outbound; the push protocol requires none from the
//! client. Websocket-level pings are answered here so they never reach the
//! session layer.

use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use futures_util::{SinkExt, StreamExt};
use tracing::debug;

/// Production EventSub websocket endpoint.
pub const EVENTSUB_ENDPOINT: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Entry point for opening websocket transports.
#[derive(Clone, Debug, Default)]
pub struct SocketClient {
    endpoint_override: Option<String>,
}

impl SocketClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit websocket endpoint override.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim().to_string());
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint_override
            .as_deref()
            .unwrap_or(EVENTSUB_ENDPOINT)
    }

    /// Opens a transport to the configured endpoint.
    ///
    /// The handshake runs on the background worker; a handshake failure
    /// surfaces as a `Closed` event rather than an eager error, so callers
    /// observe every outcome through the same event stream.
    pub fn open(&self) -> Transport {
        self.open_url(self.endpoint())
    }

    /// Opens a transport to an explicit URL, such as a server-provided
    /// reconnect target.
    pub fn open_url(&self, url: &str) -> Transport {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let url = url.to_string();

        tokio::spawn(async move {
            transport_worker(url, event_tx, close_rx).await;
        });

        Transport {
            events: event_rx,
            close: Some(close_tx),
        }
    }
}

/// Lifecycle and frame events delivered by the worker, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; the socket is open.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket closed or failed. No further events follow.
    Closed { reason: Option<String> },
}

/// Handle to a live websocket transport.
///
/// Dropping the handle closes the socket once the worker notices the event
/// channel is gone.
#[derive(Debug)]
pub struct Transport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    close: Option<oneshot::Sender<()>>,
}

impl Transport {
    pub(crate) fn from_parts(
        events: mpsc::UnboundedReceiver<TransportEvent>,
        close: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            close: Some(close),
        }
    }

    /// Next transport event; `None` once the worker has stopped and the
    /// channel has drained.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Asks the worker to close the socket. Idempotent.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
    }
}

async fn transport_worker(
    url: String,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let mut socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(err) => {
            debug!(event = "transport_handshake_failed", error = %err);
            let _ = event_tx.send(TransportEvent::Closed {
                reason: Some(err.to_string()),
            });
            return;
        }
    };

    let _ = event_tx.send(TransportEvent::Opened);

    loop {
        tokio::select! {
            // Resolves on an explicit close request and also when the
            // transport handle is dropped.
            _ = &mut close_rx => {
                let _ = socket.close(None).await;
                let _ = event_tx.send(TransportEvent::Closed { reason: None });
                return;
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(TransportEvent::Frame(text)).is_err() {
                            let _ = socket.close(None).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            let _ = event_tx.send(TransportEvent::Closed {
                                reason: Some("failed to answer websocket ping".to_string()),
                            });
                            return;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|frame| frame.reason.to_string());
                        let _ = event_tx.send(TransportEvent::Closed { reason });
                        return;
                    }
                    Some(Ok(_)) => {
                        // Binary and raw frames are outside the protocol.
                    }
                    Some(Err(err)) => {
                        let _ = event_tx.send(TransportEvent::Closed {
                            reason: Some(err.to_string()),
                        });
                        return;
                    }
                    None => {
                        let _ = event_tx.send(TransportEvent::Closed { reason: None });
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{mpsc, oneshot};

    use super::{SocketClient, Transport, TransportEvent, EVENTSUB_ENDPOINT};

    #[test]
    fn socket_client_uses_production_endpoint_by_default() {
        let client = SocketClient::new();
        assert_eq!(client.endpoint(), EVENTSUB_ENDPOINT);
    }

    #[test]
    fn endpoint_override_is_trimmed() {
        let client = SocketClient::new().with_endpoint("ws://localhost:9090/ws   \n");
        assert_eq!(client.endpoint(), "ws://localhost:9090/ws");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reaches_the_worker() {
        let (_event_tx, event_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let mut transport = Transport::from_parts(event_rx, close_tx);

        transport.close();
        transport.close();

        close_rx.await.expect("close request should be delivered");
    }

    #[tokio::test]
    async fn events_drain_in_arrival_order() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (close_tx, _close_rx) = oneshot::channel();
        let mut transport = Transport::from_parts(event_rx, close_tx);

        event_tx.send(TransportEvent::Opened).expect("send opened");
        event_tx
            .send(TransportEvent::Frame("first".to_string()))
            .expect("send frame");
        event_tx
            .send(TransportEvent::Closed { reason: None })
            .expect("send closed");
        drop(event_tx);

        assert_eq!(transport.next_event().await, Some(TransportEvent::Opened));
        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Frame("first".to_string()))
        );
        assert_eq!(
            transport.next_event().await,
            Some(TransportEvent::Closed { reason: None })
        );
        assert_eq!(transport.next_event().await, None);
    }
}
