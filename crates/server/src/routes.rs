use std::sync::Arc;

use api_types::{GeoSample, TraceStats};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use futures_util::{Stream, StreamExt};
use geotrace_core::{BroadcastHub, SampleSink};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub store: Arc<dyn SampleSink>,
    pub chart_limit: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stream-geo-info", get(stream_geo_info))
        .route("/chart-info", get(chart_info))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// One `data: <json>` event per tick until the client goes away.
async fn stream_geo_info(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.hub.subscribe();

    Sse::new(subscription.map(|sample| Event::default().json_data(sample)))
}

async fn chart_info(
    State(state): State<AppState>,
) -> Result<Json<Vec<GeoSample>>, (StatusCode, String)> {
    match state.store.recent(state.chart_limit).await {
        Ok(samples) => Ok(Json(samples)),
        Err(error) => {
            warn!(%error, "failed to read stored samples");
            Err((StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))
        }
    }
}

async fn stats(State(state): State<AppState>) -> Json<TraceStats> {
    Json(state.hub.stats())
}

async fn health() -> &'static str {
    "OK"
}
