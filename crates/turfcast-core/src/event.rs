//! Push event types.
//!
//! Events are what the hub fans out to subscribers: a well-known event
//! name plus a JSON payload, shared behind an `Arc` so broadcast never
//! clones the payload per subscriber.

use serde_json::Value;

/// The named event kinds carried on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// One-time handshake sent on attach, before anything else.
    Hello,
    /// Relevant feed items, newest first.
    Feed,
    /// Full replacement stats snapshot for the tracked user.
    Stats,
    /// Presence snapshot(s), always including the tracked user.
    Location,
}

impl EventKind {
    /// The event name as written on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Feed => "feed",
            Self::Stats => "stats",
            Self::Location => "location",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event with its JSON payload.
#[derive(Debug, Clone)]
pub struct PushEvent {
    /// Which kind of event this is.
    pub kind: EventKind,
    /// The payload, serialized at the transport edge.
    pub data: Value,
}

impl PushEvent {
    /// Create a new push event.
    #[must_use]
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }
}
