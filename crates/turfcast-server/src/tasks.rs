//! The poll tasks that drive the overlay.
//!
//! Three pollers share one rate-limited upstream: the activity feed,
//! the tracked user's stats, and presence. Each backs off
//! independently; all are gated on having at least one subscriber.
//!
//! Mutation rights are deliberately narrow: only the feed poll touches
//! the cursor, only the stats poll resolves the tracked id, and only
//! the hub touches the subscriber set.

use crate::config::Config;
use crate::metrics;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use turfcast_core::{
    extract_feed, normalize_stats, reconcile_presence, spawn_poller, Backoff, EventKind,
    FeedCursor, Hub, PollerHandle, PushEvent,
};
use turfcast_upstream::{UpstreamApi, UpstreamError};

/// Process-scoped polling state for the tracked user.
pub struct Tracker {
    hub: Arc<Hub>,
    upstream: Arc<dyn UpstreamApi>,
    tracked_user: String,
    show_coords: bool,
    /// "Newest feed item already processed". Only `poll_feed` moves it.
    cursor: Mutex<FeedCursor>,
    /// Resolved by the first successful stats poll, fixed thereafter.
    tracked_id: OnceLock<u64>,
}

impl Tracker {
    /// Create the tracker.
    #[must_use]
    pub fn new(
        hub: Arc<Hub>,
        upstream: Arc<dyn UpstreamApi>,
        tracked_user: impl Into<String>,
        show_coords: bool,
    ) -> Self {
        Self {
            hub,
            upstream,
            tracked_user: tracked_user.into(),
            show_coords,
            cursor: Mutex::new(FeedCursor::new()),
            tracked_id: OnceLock::new(),
        }
    }

    /// The tracked user's upstream id, once resolved.
    #[must_use]
    pub fn tracked_id(&self) -> Option<u64> {
        self.tracked_id.get().copied()
    }

    /// One feed tick: fetch items newer than the cursor, advance it,
    /// broadcast whatever concerns the tracked user.
    pub async fn poll_feed(&self) -> Result<(), UpstreamError> {
        let after = self.cursor.lock().await.get().map(str::to_string);
        let batch = self.upstream.feed_since(after.as_deref()).await?;

        let mut cursor = self.cursor.lock().await;
        let relevant = extract_feed(&batch, &mut cursor, &self.tracked_user);
        drop(cursor);

        debug!(batch = batch.len(), relevant = relevant.len(), "Feed tick");

        if !relevant.is_empty() {
            self.push(EventKind::Feed, Value::Array(relevant));
        }
        Ok(())
    }

    /// One stats tick: look the tracked user up, resolve their id on
    /// first sight, broadcast a full replacement snapshot.
    pub async fn poll_stats(&self) -> Result<(), UpstreamError> {
        let users = self.upstream.lookup_user(&self.tracked_user).await?;
        let Some(user) = users.first() else {
            debug!(user = %self.tracked_user, "Stats lookup returned no match");
            return Ok(());
        };

        if let Some(id) = user.id {
            if self.tracked_id.set(id).is_ok() {
                info!(user = %self.tracked_user, id, "Tracked user resolved");
            }
        }

        match serde_json::to_value(normalize_stats(user)) {
            Ok(payload) => self.push(EventKind::Stats, payload),
            Err(err) => warn!(error = %err, "Dropping unserializable stats snapshot"),
        }
        Ok(())
    }

    /// One presence tick. Skipped (successfully) until the stats
    /// poller has resolved the tracked id.
    pub async fn poll_location(&self) -> Result<(), UpstreamError> {
        let Some(tracked_id) = self.tracked_id() else {
            debug!("Tracked user not yet resolved, skipping presence poll");
            return Ok(());
        };

        let records = self.upstream.locations().await?;
        let presence =
            reconcile_presence(&records, tracked_id, &self.tracked_user, self.show_coords);

        match serde_json::to_value(presence) {
            Ok(payload) => self.push(EventKind::Location, payload),
            Err(err) => warn!(error = %err, "Dropping unserializable presence snapshot"),
        }
        Ok(())
    }

    fn push(&self, kind: EventKind, payload: Value) {
        metrics::record_event(kind.as_str());
        self.hub.broadcast(PushEvent::new(kind, payload));
    }
}

/// Spawn the three pollers against the shared tracker.
pub fn spawn_pollers(tracker: &Arc<Tracker>, config: &Config) -> Vec<PollerHandle> {
    let ceiling = config.backoff_ceiling();
    let backoff = |ms: u64| Backoff::new(std::time::Duration::from_millis(ms), ceiling);
    let gate = |hub: Arc<Hub>| move || !hub.is_empty();

    let feed = {
        let tracker = Arc::clone(tracker);
        spawn_poller(
            "feed",
            backoff(config.poll.feed_ms),
            gate(Arc::clone(&tracker.hub)),
            move || {
                let tracker = Arc::clone(&tracker);
                async move { observe("feed", tracker.poll_feed().await) }
            },
        )
    };

    let stats = {
        let tracker = Arc::clone(tracker);
        spawn_poller(
            "stats",
            backoff(config.poll.stats_ms),
            gate(Arc::clone(&tracker.hub)),
            move || {
                let tracker = Arc::clone(&tracker);
                async move { observe("stats", tracker.poll_stats().await) }
            },
        )
    };

    let location = {
        let tracker = Arc::clone(tracker);
        spawn_poller(
            "location",
            backoff(config.poll.location_ms),
            gate(Arc::clone(&tracker.hub)),
            move || {
                let tracker = Arc::clone(&tracker);
                async move { observe("location", tracker.poll_location().await) }
            },
        )
    };

    vec![feed, stats, location]
}

/// Count the tick before handing the result back to the poller.
fn observe(
    poller: &'static str,
    result: Result<(), UpstreamError>,
) -> Result<(), UpstreamError> {
    match &result {
        Ok(()) => metrics::record_poll(poller, "ok"),
        Err(err) => {
            metrics::record_poll(poller, "error");
            metrics::record_upstream_error(if err.is_rate_limited() {
                "rate_limited"
            } else {
                "upstream"
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use turfcast_core::{LocationRecord, UserRecord};
    use turfcast_upstream::BoundingBox;

    /// Scripted upstream: pops one canned response per call.
    #[derive(Default)]
    struct ScriptedUpstream {
        feed: StdMutex<VecDeque<Vec<Value>>>,
        users: StdMutex<VecDeque<Vec<Value>>>,
        locations: StdMutex<VecDeque<Vec<Value>>>,
        feed_calls: StdMutex<Vec<Option<String>>>,
        location_calls: StdMutex<Vec<()>>,
    }

    impl ScriptedUpstream {
        fn with_feed(self, batches: &[Value]) -> Self {
            let mut queue = VecDeque::new();
            for batch in batches {
                queue.push_back(batch.as_array().unwrap().clone());
            }
            *self.feed.lock().unwrap() = queue;
            self
        }

        fn with_users(self, batches: &[Value]) -> Self {
            let mut queue = VecDeque::new();
            for batch in batches {
                queue.push_back(batch.as_array().unwrap().clone());
            }
            *self.users.lock().unwrap() = queue;
            self
        }

        fn with_locations(self, batches: &[Value]) -> Self {
            let mut queue = VecDeque::new();
            for batch in batches {
                queue.push_back(batch.as_array().unwrap().clone());
            }
            *self.locations.lock().unwrap() = queue;
            self
        }
    }

    #[async_trait]
    impl UpstreamApi for ScriptedUpstream {
        async fn feed_since(&self, after: Option<&str>) -> Result<Vec<Value>, UpstreamError> {
            self.feed_calls
                .lock()
                .unwrap()
                .push(after.map(str::to_string));
            Ok(self.feed.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn lookup_user(&self, _name: &str) -> Result<Vec<UserRecord>, UpstreamError> {
            let batch = self.users.lock().unwrap().pop_front().unwrap_or_default();
            Ok(batch
                .into_iter()
                .map(|v| serde_json::from_value(v).unwrap())
                .collect())
        }

        async fn locations(&self) -> Result<Vec<LocationRecord>, UpstreamError> {
            self.location_calls.lock().unwrap().push(());
            let batch = self
                .locations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(batch
                .into_iter()
                .map(|v| serde_json::from_value(v).unwrap())
                .collect())
        }

        async fn zones_within(&self, _bbox: BoundingBox) -> Result<Value, UpstreamError> {
            Ok(json!([]))
        }
    }

    fn tracker(upstream: ScriptedUpstream) -> (Arc<Tracker>, Arc<ScriptedUpstream>) {
        let upstream = Arc::new(upstream);
        let tracker = Arc::new(Tracker::new(
            Arc::new(Hub::new()),
            Arc::clone(&upstream) as Arc<dyn UpstreamApi>,
            "alice",
            false,
        ));
        (tracker, upstream)
    }

    #[tokio::test]
    async fn test_feed_tick_broadcasts_relevant_and_advances_cursor() {
        let upstream = ScriptedUpstream::default().with_feed(&[
            json!([
                {"type": "takeover", "currentOwner": {"name": "alice"}, "time": "T2"},
                {"type": "takeover", "currentOwner": {"name": "bob"}, "time": "T1"},
            ]),
            json!([]),
        ]);
        let (tracker, upstream) = tracker(upstream);
        let (_id, mut rx) = tracker.hub.attach(json!({}));

        tracker.poll_feed().await.unwrap();
        tracker.poll_feed().await.unwrap();

        // First call has no cursor; second carries the advanced one.
        assert_eq!(
            *upstream.feed_calls.lock().unwrap(),
            vec![None, Some("T2".to_string())]
        );

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Hello);
        let feed = rx.recv().await.unwrap();
        assert_eq!(feed.kind, EventKind::Feed);
        let items = feed.data.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["currentOwner"]["name"], "alice");

        // The empty second batch produced no event.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_irrelevant_batch_advances_cursor_without_broadcast() {
        let upstream = ScriptedUpstream::default().with_feed(&[
            json!([{"type": "takeover", "currentOwner": {"name": "carol"}, "time": "T5"}]),
            json!([]),
        ]);
        let (tracker, upstream) = tracker(upstream);
        let (_id, mut rx) = tracker.hub.attach(json!({}));

        tracker.poll_feed().await.unwrap();
        tracker.poll_feed().await.unwrap();

        assert_eq!(
            *upstream.feed_calls.lock().unwrap(),
            vec![None, Some("T5".to_string())]
        );
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Hello);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats_resolves_id_once_and_broadcasts_snapshot() {
        let upstream = ScriptedUpstream::default().with_users(&[
            json!([{"id": 1234, "name": "alice", "points": 10, "zones": [{"id": 1}]}]),
            json!([{"id": 9999, "name": "alice", "points": 20}]),
        ]);
        let (tracker, _upstream) = tracker(upstream);
        let (_id, mut rx) = tracker.hub.attach(json!({}));

        tracker.poll_stats().await.unwrap();
        tracker.poll_stats().await.unwrap();

        // The id is fixed by the first successful poll.
        assert_eq!(tracker.tracked_id(), Some(1234));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Hello);
        let stats = rx.recv().await.unwrap();
        assert_eq!(stats.kind, EventKind::Stats);
        assert_eq!(stats.data["zonesNow"], 1);

        // Each poll pushes a full replacement snapshot.
        let next = rx.recv().await.unwrap();
        assert_eq!(next.data["points"], 20);
        assert!(next.data.get("zonesNow").is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_leaves_identity_unresolved_and_gates_presence() {
        let upstream = ScriptedUpstream::default().with_users(&[json!([])]);
        let (tracker, upstream) = tracker(upstream);
        let (_id, mut rx) = tracker.hub.attach(json!({}));

        tracker.poll_stats().await.unwrap();
        assert_eq!(tracker.tracked_id(), None);

        // Presence polling is skipped entirely while unresolved: the
        // tick succeeds without an upstream call.
        tracker.poll_location().await.unwrap();
        assert!(upstream.location_calls.lock().unwrap().is_empty());

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Hello);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_location_tick_synthesizes_offline_tracked_user() {
        let upstream = ScriptedUpstream::default()
            .with_users(&[json!([{"id": 7, "name": "alice"}])])
            .with_locations(&[json!([
                {"id": 8, "name": "bob", "latitude": 1.0, "longitude": 2.0}
            ])]);
        let (tracker, _upstream) = tracker(upstream);
        let (_id, mut rx) = tracker.hub.attach(json!({}));

        tracker.poll_stats().await.unwrap();
        tracker.poll_location().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Hello);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Stats);

        let location = rx.recv().await.unwrap();
        assert_eq!(location.kind, EventKind::Location);
        let records = location.data.as_array().unwrap();
        assert_eq!(records.len(), 2);

        let tracked: Vec<_> = records
            .iter()
            .filter(|r| r["isTracked"] == true)
            .collect();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0]["id"], 7);
        assert_eq!(tracked[0]["online"], false);
        // Coordinates stay hidden with show_coords off.
        assert!(records[0].get("latitude").is_none());
    }
}
