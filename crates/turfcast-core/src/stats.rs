//! Stats reconciliation.
//!
//! Each stats poll produces a full replacement snapshot for the
//! tracked user, computed fresh from the upstream record. Snapshots
//! are never merged with previous ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user record as returned by the upstream user lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Upstream numeric user id.
    pub id: Option<u64>,
    /// Display name.
    pub name: Option<String>,
    /// Country code.
    pub country: Option<String>,
    /// Region object, passed through untouched.
    pub region: Option<Value>,
    /// Zone block time, seconds.
    pub blocktime: Option<u64>,
    /// Current rank level.
    pub rank: Option<u64>,
    /// Leaderboard place.
    pub place: Option<u64>,
    /// Current rate of point gain.
    pub points_per_hour: Option<i64>,
    /// Points in the current round.
    pub points: Option<i64>,
    /// Lifetime points.
    pub total_points: Option<i64>,
    /// Zones taken, lifetime.
    pub taken: Option<u64>,
    /// Distinct zones ever taken.
    pub unique_zones_taken: Option<u64>,
    /// Zones currently held, passed through untouched.
    pub zones: Option<Vec<Value>>,
}

/// The normalized stats payload pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Upstream numeric user id.
    pub id: Option<u64>,
    /// Display name.
    pub name: Option<String>,
    /// Country code.
    pub country: Option<String>,
    /// Region object.
    pub region: Option<Value>,
    /// Zone block time, seconds.
    pub blocktime: Option<u64>,
    /// Current rank level.
    pub rank: Option<u64>,
    /// Leaderboard place.
    pub place: Option<u64>,
    /// Current rate of point gain.
    pub points_per_hour: Option<i64>,
    /// Points in the current round.
    pub points: Option<i64>,
    /// Lifetime points.
    pub total_points: Option<i64>,
    /// Zones taken, lifetime.
    pub taken: Option<u64>,
    /// Distinct zones ever taken.
    pub unique_zones_taken: Option<u64>,
    /// Zones currently held.
    pub zones: Option<Vec<Value>>,
    /// Count of zones currently held.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones_now: Option<usize>,
}

/// Map one upstream user record into a replacement snapshot.
#[must_use]
pub fn normalize_stats(user: &UserRecord) -> StatsSnapshot {
    StatsSnapshot {
        id: user.id,
        name: user.name.clone(),
        country: user.country.clone(),
        region: user.region.clone(),
        blocktime: user.blocktime,
        rank: user.rank,
        place: user.place,
        points_per_hour: user.points_per_hour,
        points: user.points,
        total_points: user.total_points,
        taken: user.taken,
        unique_zones_taken: user.unique_zones_taken,
        zones_now: user.zones.as_ref().map(Vec::len),
        zones: user.zones.clone(),
    }
}
