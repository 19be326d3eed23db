//! At-least-once delivery guard keyed by message id.

use std::collections::HashMap;

use crate::session::proto::MessageKind;

/// Tracks message ids already processed during a session's lifetime.
///
/// The push service delivers at least once and resends a message under the
/// same id when it is unsure a notification arrived, so the first sighting
/// wins and every later one is dropped. Entries are never evicted; for the
/// short interactive sessions this crate targets the growth is bounded by
/// traffic volume, not time.
#[derive(Debug, Default)]
pub struct DeliveryDedup {
    seen: HashMap<String, MessageKind>,
}

impl DeliveryDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting of `id`.
    ///
    /// Returns true the first time the id is observed (the message should be
    /// processed) and false on every later sighting (the message must be
    /// ignored).
    pub fn observe(&mut self, id: &str, kind: MessageKind) -> bool {
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_string(), kind);
        true
    }

    /// Kind recorded when `id` was first observed.
    pub fn kind_of(&self, id: &str) -> Option<MessageKind> {
        self.seen.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
