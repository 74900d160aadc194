//! Endpoint SSE des évènements de la station
//!
//! Route type : `GET /watch_event`. Les trames sont préformatées par le hub
//! (`event: <type>\ndata: <json>\n\n`) et renvoyées telles quelles ; le flux
//! se termine après la sentinelle `shutdown`.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::debug;

use crate::station::Station;

/// Router portant l'endpoint `/watch_event`.
pub fn events_router(station: Station) -> Router {
    Router::new()
        .route("/watch_event", get(watch_events))
        .with_state(station)
}

async fn watch_events(State(station): State<Station>) -> Response {
    debug!("client connected to the event stream");
    let mut subscriber = station.watch_events();

    let body = Body::from_stream(async_stream::stream! {
        while let Some(frame) = subscriber.next().await {
            yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(frame));
        }
        debug!("event stream client disconnected");
    });

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
