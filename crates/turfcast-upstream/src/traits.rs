//! Upstream API abstraction.
//!
//! The poll tasks are written against [`UpstreamApi`] rather than the
//! concrete HTTP client, so scenario tests can script the upstream's
//! responses without a network.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use turfcast_core::{LocationRecord, QueueError, UserRecord};

/// Upstream call errors.
///
/// All variants feed the poller backoff identically; `RateLimited` is
/// distinguished only so diagnostics can name it.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network-level failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream said too many requests (HTTP 429).
    #[error("upstream rate limited")]
    RateLimited,

    /// Any other non-2xx response.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: reqwest::StatusCode,
        /// The response body, best effort.
        body: String,
    },

    /// The shared request queue is gone.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl UpstreamError {
    /// Is this the distinguished rate-limit failure?
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// The HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::RateLimited => Some(reqwest::StatusCode::TOO_MANY_REQUESTS),
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::Queue(_) => None,
        }
    }
}

/// A coordinate pair in the upstream's wire shape.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatLng {
    /// Latitude, degrees.
    pub latitude: f64,
    /// Longitude, degrees.
    pub longitude: f64,
}

/// A zone-query bounding box.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// North-east corner.
    pub north_east: LatLng,
    /// South-west corner.
    pub south_west: LatLng,
}

impl BoundingBox {
    /// Build a square box spanning `half` degrees out from a center.
    #[must_use]
    pub fn around(lat: f64, lng: f64, half: f64) -> Self {
        Self {
            north_east: LatLng {
                latitude: lat + half,
                longitude: lng + half,
            },
            south_west: LatLng {
                latitude: lat - half,
                longitude: lng - half,
            },
        }
    }
}

/// The upstream operations the engine drives.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Fetch takeover and medal feed items newer than `after`
    /// (a cursor string previously issued by the upstream, sent back
    /// verbatim). `None` fetches the whole feed. Newest first.
    async fn feed_since(&self, after: Option<&str>) -> Result<Vec<Value>, UpstreamError>;

    /// Look up users by name. The upstream returns an empty list for
    /// unknown names rather than an error.
    async fn lookup_user(&self, name: &str) -> Result<Vec<UserRecord>, UpstreamError>;

    /// Fetch the current online-user location list.
    async fn locations(&self) -> Result<Vec<LocationRecord>, UpstreamError>;

    /// Fetch all zones inside a bounding box, passed through raw.
    async fn zones_within(&self, bbox: BoundingBox) -> Result<Value, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_around() {
        let bbox = BoundingBox::around(59.3, 18.0, 0.05);
        assert!((bbox.north_east.latitude - 59.35).abs() < 1e-9);
        assert!((bbox.south_west.longitude - 17.95).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box_wire_shape() {
        let bbox = BoundingBox::around(1.0, 2.0, 0.5);
        let value = serde_json::to_value(bbox).unwrap();
        assert_eq!(value["northEast"]["latitude"], 1.5);
        assert_eq!(value["southWest"]["longitude"], 1.5);
    }

    #[test]
    fn test_rate_limit_is_distinguished() {
        let err = UpstreamError::RateLimited;
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(reqwest::StatusCode::TOO_MANY_REQUESTS));

        let err = UpstreamError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(!err.is_rate_limited());
        assert_eq!(err.status(), Some(reqwest::StatusCode::BAD_GATEWAY));
    }
}
