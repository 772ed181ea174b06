//! HTTP surface for the overlay server.
//!
//! `/stream` is the push channel: one SSE response per viewer, fed by
//! the broadcast hub. `/api/zones` is a stateless bounding-box proxy
//! for the map panel. `/health` is a liveness probe.

use crate::config::Config;
use crate::metrics::{self, SubscriberMetricsGuard};
use crate::tasks::{spawn_pollers, Tracker};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use turfcast_core::{Hub, PushEvent, RequestQueue, SubscriberId};
use turfcast_upstream::{BoundingBox, TurfClient, UpstreamApi};

/// Shared server state.
pub struct AppState {
    /// The broadcast hub.
    pub hub: Arc<Hub>,
    /// The upstream API client.
    pub upstream: Arc<dyn UpstreamApi>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, wiring the client through the shared queue.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let queue = RequestQueue::new(config.min_spacing());
        let client = TurfClient::new(config.upstream.base_url.clone(), queue);

        Self {
            hub: Arc::new(Hub::new()),
            upstream: Arc::new(client),
            config,
        }
    }

    /// The one-time handshake payload sent to every new subscriber.
    #[must_use]
    pub fn hello_payload(&self) -> serde_json::Value {
        let overlay = &self.config.overlay;
        json!({
            "message": "connected",
            "tracking": self.config.tracked_user,
            "showCoords": overlay.show_coords,
            "showMap": overlay.show_map,
            "map": {
                "tileUrl": overlay.tile_url,
                "attribution": overlay.attribution,
                "zoom": overlay.zoom,
            },
        })
    }
}

/// Run the HTTP server and the pollers behind it.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let tracker = Arc::new(Tracker::new(
        Arc::clone(&state.hub),
        Arc::clone(&state.upstream),
        config.tracked_user.clone(),
        config.overlay.show_coords,
    ));
    let _pollers = spawn_pollers(&tracker, &config);

    let app = Router::new()
        .route("/stream", get(stream_handler))
        .route("/api/zones", get(zones_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("turfcast listening on {}", addr);
    info!("Tracking user: {}", config.tracked_user);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One subscriber's half of the push channel.
///
/// Wraps the hub receiver as an SSE event stream; dropping it (the
/// viewer disconnected, or the response errored) detaches the
/// subscriber from the hub exactly once.
struct EventStream {
    id: SubscriberId,
    hub: Arc<Hub>,
    rx: mpsc::UnboundedReceiver<Arc<PushEvent>>,
    _metrics: SubscriberMetricsGuard,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    match Event::default().event(event.kind.as_str()).json_data(&event.data) {
                        Ok(rendered) => return Poll::Ready(Some(Ok(rendered))),
                        Err(err) => {
                            warn!(subscriber = this.id, error = %err, "Skipping unrenderable event");
                        }
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

/// SSE endpoint: attach to the hub and stream events until disconnect.
async fn stream_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.hub.attach(state.hello_payload());
    debug!(subscriber = id, "Stream opened");

    let stream = EventStream {
        id,
        hub: Arc::clone(&state.hub),
        rx,
        _metrics: SubscriberMetricsGuard::new(),
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Query parameters for the zones proxy.
#[derive(Debug, Deserialize)]
struct ZonesQuery {
    lat: f64,
    lng: f64,
    half: Option<f64>,
}

/// Zones proxy: one upstream bounding-box query per request.
async fn zones_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ZonesQuery>,
) -> Response {
    let half = query.half.unwrap_or(state.config.overlay.zones_halfspan);
    if !query.lat.is_finite() || !query.lng.is_finite() || !half.is_finite() || half <= 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid parameters"})),
        )
            .into_response();
    }

    let bbox = BoundingBox::around(query.lat, query.lng, half);
    match state.upstream.zones_within(bbox).await {
        Ok(zones) => Json(json!({
            "zones": zones,
            "northEast": bbox.north_east,
            "southWest": bbox.south_west,
        }))
        .into_response(),
        Err(err) => {
            warn!(error = %err, "Zones proxy failed");
            let status = err
                .status()
                .and_then(|s| StatusCode::from_u16(s.as_u16()).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(json!({"error": err.to_string()}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        toml::from_str(
            r#"
            tracked_user = "alice"

            [overlay]
            show_map = true
            zoom = 13
        "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_hello_payload_carries_overlay_config() {
        let state = AppState::new(test_config());
        let hello = state.hello_payload();

        assert_eq!(hello["tracking"], "alice");
        assert_eq!(hello["showMap"], true);
        assert_eq!(hello["map"]["zoom"], 13);
        assert_eq!(hello["message"], "connected");
    }

    #[tokio::test]
    async fn test_event_stream_drop_detaches() {
        let state = AppState::new(test_config());
        let (id, rx) = state.hub.attach(state.hello_payload());
        assert_eq!(state.hub.subscriber_count(), 1);

        let stream = EventStream {
            id,
            hub: Arc::clone(&state.hub),
            rx,
            _metrics: SubscriberMetricsGuard::new(),
        };
        drop(stream);

        assert_eq!(state.hub.subscriber_count(), 0);
        // A second detach for the same id is a no-op.
        assert!(!state.hub.detach(id));
    }
}
