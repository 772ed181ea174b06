//! Feed delta extraction.
//!
//! Each upstream feed poll returns a newest-first batch of items. This
//! module advances the feed cursor and filters the batch down to the
//! items that concern the tracked user.
//!
//! The cursor is the upstream's own `time` string, kept verbatim: it
//! goes back out as the `afterDate` lower bound on the next poll, so
//! it is never reparsed or reformatted. Relevant items are likewise
//! rebroadcast as the raw JSON the upstream sent, because the overlay
//! renders fields (zone names, medal ids) this module does not model.

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// A reference to a player inside a feed item.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerRef {
    /// The player's display name.
    pub name: Option<String>,
}

impl PlayerRef {
    fn is_named(&self, tracked: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| name.to_lowercase() == tracked.to_lowercase())
    }
}

/// A zone takeover: ownership changed hands.
#[derive(Debug, Clone, Deserialize)]
pub struct TakeoverItem {
    /// Who held the zone before.
    #[serde(rename = "previousOwner")]
    pub previous_owner: Option<PlayerRef>,
    /// Who holds it now.
    #[serde(rename = "currentOwner")]
    pub current_owner: Option<PlayerRef>,
    /// Players credited with an assist.
    #[serde(default)]
    pub assists: Vec<PlayerRef>,
}

/// A medal (achievement) award.
#[derive(Debug, Clone, Deserialize)]
pub struct MedalItem {
    /// The player who earned the medal.
    pub user: Option<PlayerRef>,
}

/// A chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatItem {
    /// Who sent the message.
    pub sender: Option<PlayerRef>,
}

/// A feed item, tagged by its upstream `type` field.
///
/// Kinds the overlay does not care about (zone creations and anything
/// the upstream adds later) collapse into [`FeedItem::Other`], which is
/// never relevant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedItem {
    /// Ownership change.
    Takeover(TakeoverItem),
    /// Achievement earned.
    Medal(MedalItem),
    /// Chat message.
    Chat(ChatItem),
    /// Any other kind.
    #[serde(other)]
    Other,
}

impl FeedItem {
    /// Does this item concern the tracked user?
    ///
    /// Takeovers count when the user is the new owner, the previous
    /// owner, or among the assists; medals when the user earned them;
    /// chat when the user sent it. Name comparison is case-insensitive.
    #[must_use]
    pub fn concerns(&self, tracked: &str) -> bool {
        match self {
            Self::Takeover(t) => {
                t.current_owner.as_ref().is_some_and(|p| p.is_named(tracked))
                    || t.previous_owner.as_ref().is_some_and(|p| p.is_named(tracked))
                    || t.assists.iter().any(|p| p.is_named(tracked))
            }
            Self::Medal(m) => m.user.as_ref().is_some_and(|p| p.is_named(tracked)),
            Self::Chat(c) => c.sender.as_ref().is_some_and(|p| p.is_named(tracked)),
            Self::Other => false,
        }
    }
}

/// The "newest item already processed" marker.
///
/// Starts unset; once advanced it only ever moves to the newest time
/// observed, and an empty batch leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedCursor(Option<String>);

impl FeedCursor {
    /// Create an unset cursor (first poll fetches the whole feed).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The verbatim upstream time string, if set.
    #[must_use]
    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    fn advance(&mut self, time: &str) {
        trace!(cursor = time, "Feed cursor advanced");
        self.0 = Some(time.to_string());
    }
}

/// Process one feed batch: advance the cursor, keep the relevant items.
///
/// The batch is newest-first, so the cursor takes the head item's
/// `time` (read from the raw JSON, so unmodeled kinds still advance
/// it). Items that fail to parse are treated as not relevant.
pub fn extract_feed(batch: &[Value], cursor: &mut FeedCursor, tracked: &str) -> Vec<Value> {
    if let Some(newest) = batch
        .first()
        .and_then(|item| item.get("time"))
        .and_then(Value::as_str)
    {
        cursor.advance(newest);
    }

    batch
        .iter()
        .filter(|item| {
            serde_json::from_value::<FeedItem>((*item).clone())
                .map(|it| it.concerns(tracked))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
