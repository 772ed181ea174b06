//! # turfcast-core
//!
//! The event-distribution engine behind the turfcast overlay server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Fan-out broadcast of named push events to all subscribers
//! - **RequestQueue** - FIFO upstream call serialization with minimum spacing
//! - **Poller** - Self-re-arming poll loops with exponential backoff
//! - **Feed** - Cursor tracking and relevance filtering of feed batches
//! - **Stats / Presence** - Normalized replacement snapshots for the tracked user
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Poller    │────▶│ RequestQueue│────▶│  upstream   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐     ┌─────────────┐
//! │ Feed/Stats/ │────▶│     Hub     │────▶ subscribers
//! │  Presence   │     └─────────────┘
//! └─────────────┘
//! ```

pub mod event;
pub mod feed;
pub mod hub;
pub mod poller;
pub mod presence;
pub mod queue;
pub mod stats;

pub use event::{EventKind, PushEvent};
pub use feed::{extract_feed, FeedCursor, FeedItem};
pub use hub::{Hub, SubscriberId};
pub use poller::{spawn_poller, Backoff, PollerHandle};
pub use presence::{reconcile_presence, LocationRecord, PresenceRecord};
pub use queue::{QueueError, RequestQueue};
pub use stats::{normalize_stats, StatsSnapshot, UserRecord};
