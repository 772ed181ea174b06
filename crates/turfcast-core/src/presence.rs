//! Presence reconciliation.
//!
//! Each location poll is mapped into per-user online state. The
//! tracked user always gets exactly one record: present in the
//! upstream result means online, absent means a synthesized offline
//! record, never an omission.

use serde::{Deserialize, Serialize};

/// One user as returned by the upstream location query.
///
/// Every field is optional: a partial record degrades to omitted
/// fields downstream, it never fails the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationRecord {
    /// Upstream numeric user id.
    pub id: Option<u64>,
    /// Display name.
    pub name: Option<String>,
    /// Latitude, degrees.
    pub latitude: Option<f64>,
    /// Longitude, degrees.
    pub longitude: Option<f64>,
}

/// The normalized presence payload pushed to subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Upstream numeric user id, when the upstream record carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Display name.
    pub name: Option<String>,
    /// Whether the user is currently online.
    pub online: bool,
    /// Whether this is the tracked user.
    pub is_tracked: bool,
    /// Latitude, only when coordinate exposure is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude, only when coordinate exposure is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Map a location result into presence records.
///
/// Everyone in the result is online. If the tracked id is missing, an
/// offline record for it is appended so downstream always sees exactly
/// one record for the tracked user. Coordinates are stripped unless
/// `show_coords` is set.
#[must_use]
pub fn reconcile_presence(
    records: &[LocationRecord],
    tracked_id: u64,
    tracked_name: &str,
    show_coords: bool,
) -> Vec<PresenceRecord> {
    let mut out: Vec<PresenceRecord> = records
        .iter()
        .map(|record| PresenceRecord {
            id: record.id,
            name: record.name.clone(),
            online: true,
            is_tracked: record.id == Some(tracked_id),
            latitude: record.latitude.filter(|_| show_coords),
            longitude: record.longitude.filter(|_| show_coords),
        })
        .collect();

    if !out.iter().any(|record| record.is_tracked) {
        out.push(PresenceRecord {
            id: Some(tracked_id),
            name: Some(tracked_name.to_string()),
            online: false,
            is_tracked: true,
            latitude: None,
            longitude: None,
        });
    }

    out
}
