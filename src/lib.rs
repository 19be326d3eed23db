//! Rust SDK for the Twitch EventSub websocket transport.
//!
//! The crate is organized by transport surface:
//! - `helix`: HTTP client for the subscription control plane.
//! - `session`: realtime websocket client, protocol decoding, delivery
//!   deduplication, and the session state machine with its event bus.
//!
//! Credentials (bearer token and application client id) are supplied by the
//! caller at construction time; the crate never reads the process
//! environment.

/// Helix control-plane client and subscription types.
pub mod helix;
/// Realtime session client, protocol types, and state machine.
pub mod session;
