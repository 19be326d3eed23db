//! Realtime EventSub session modules.
//!
//! - `client`: websocket transport and its sequential event stream.
//! - `proto`: envelope decoding and the five message payload types.
//! - `dedup`: at-least-once delivery deduplication.
//! - `registrar`: subscription registration and cost/quota tracking.
//! - `session`: the session state machine and consumer event bus.

/// Websocket transport and connection worker.
pub mod client;
/// Message id deduplication.
pub mod dedup;
/// Push protocol envelope and payload types.
pub mod proto;
/// Control-plane registration with quota tracking.
pub mod registrar;
/// Session state machine and consumer events.
pub mod session;
