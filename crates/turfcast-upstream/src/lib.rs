//! # turfcast-upstream
//!
//! Client for the Turf API (v5). Every call is funneled through the
//! shared [`turfcast_core::RequestQueue`], so the minimum inter-request
//! spacing holds across all pollers regardless of which endpoint they
//! hit.
//!
//! The [`UpstreamApi`] trait is the seam the server's poll tasks are
//! written against, so tests can substitute a scripted upstream.

pub mod client;
pub mod traits;

pub use client::TurfClient;
pub use traits::{BoundingBox, LatLng, UpstreamApi, UpstreamError};
