//! API REST de la station
//!
//! Routes montées par l'application :
//! - `/queue` : consultation paginée, ajout, skip, file automatique
//! - `/np`, `/nowplaying` : piste en cours et piste suivante
//! - `/stream` : le flux audio Ogg/Opus en chunked
//!
//! Toutes les réponses JSON partagent la même enveloppe
//! `{ "msg": ..., "error": ..., "data": ... }`.

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::StationError;
use crate::station::Station;

/// Enveloppe commune des réponses JSON.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub msg: String,
    pub error: bool,
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl Envelope {
    pub fn success(msg: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            msg: msg.into(),
            error: false,
            data,
            additional_data: None,
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            error: true,
            data: None,
            additional_data: None,
        }
    }
}

fn envelope_response(status: StatusCode, envelope: Envelope) -> Response {
    (status, Json(envelope)).into_response()
}

/// Router `/queue` : consultation et manipulation des files.
pub fn queue_api_router(station: Station) -> Router {
    Router::new()
        .route("/", get(queue_info))
        .route("/add", post(add_track))
        .route("/auto", get(auto_queue))
        .route("/skip", post(skip_track))
        .with_state(station)
}

/// Router racine : piste en cours et flux audio.
pub fn station_router(station: Station) -> Router {
    Router::new()
        .route("/np", get(now_playing))
        .route("/nowplaying", get(now_playing))
        .route("/stream", get(stream))
        .with_state(station)
}

#[derive(Debug, Deserialize)]
struct AddTrackRequest {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueueQuery {
    index: Option<usize>,
    page: Option<usize>,
    use_autoplay: Option<String>,
}

async fn queue_info(State(station): State<Station>, Query(query): Query<QueueQuery>) -> Response {
    let page = query.index.or(query.page).unwrap_or(0);
    let mut data = json!({ "queue": station.queue_page(page).await });

    if matches!(query.use_autoplay.as_deref(), Some("1") | Some("true")) {
        let auto = station.auto_queue().await;
        if !auto.is_empty() {
            data["auto_queue"] = json!(auto);
        }
    }

    envelope_response(StatusCode::OK, Envelope::success("success", Some(data)))
}

async fn add_track(
    State(station): State<Station>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(url) = extract_url(&headers, &body) else {
        return envelope_response(
            StatusCode::BAD_REQUEST,
            Envelope::failure("Missing required argument: url"),
        );
    };

    info!("adding track to queue: {url}");
    match station.add_track(&url) {
        Ok(()) => envelope_response(
            StatusCode::OK,
            Envelope::success("Track added to queue successfully", None),
        ),
        Err(e) => envelope_response(StatusCode::OK, Envelope::failure(e.to_string())),
    }
}

/// Extrait le paramètre `url` d'un corps JSON ou formulaire.
fn extract_url(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        return serde_json::from_slice::<AddTrackRequest>(body)
            .ok()
            .map(|request| request.url);
    }

    let body = std::str::from_utf8(body).ok()?;
    for pair in body.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some("url") {
            let raw = parts.next().unwrap_or("").replace('+', " ");
            return urlencoding::decode(&raw).ok().map(|url| url.into_owned());
        }
    }
    None
}

async fn auto_queue(State(station): State<Station>) -> Response {
    let auto = station.auto_queue().await;
    envelope_response(
        StatusCode::OK,
        Envelope::success("success", Some(json!({ "auto_queue": auto }))),
    )
}

async fn skip_track(State(station): State<Station>) -> Response {
    info!("skipping current track");
    station.skip_track();
    envelope_response(
        StatusCode::OK,
        Envelope::success("Track skipped successfully", None),
    )
}

async fn now_playing(State(station): State<Station>) -> Response {
    let mut data = json!({ "now_playing": station.now_playing().await });
    if let Some(next) = station.next_up().await {
        data["next_up"] = json!(next);
    }
    envelope_response(StatusCode::OK, Envelope::success("success", Some(data)))
}

/// Flux audio : le header une fois, puis une page Ogg par chunk.
async fn stream(State(station): State<Station>) -> Response {
    if !station.is_alive() {
        return envelope_response(
            StatusCode::SERVICE_UNAVAILABLE,
            Envelope::failure("Audio stream not available"),
        );
    }

    let header = match station.wait_for_header().await {
        Ok(header) => header,
        Err(StationError::Timeout) => {
            return envelope_response(
                StatusCode::GATEWAY_TIMEOUT,
                Envelope::failure("Timed out waiting for the audio stream"),
            );
        }
        Err(_) => {
            return envelope_response(
                StatusCode::SERVICE_UNAVAILABLE,
                Envelope::failure("Audio stream interrupted"),
            );
        }
    };

    let mut frames = station.subscribe_frames();
    let body = Body::from_stream(async_stream::stream! {
        yield Ok::<Bytes, std::convert::Infallible>(header);
        while station.is_alive() {
            if frames.changed().await.is_err() {
                break;
            }
            let frame = frames.borrow_and_update().clone();
            if frame.is_empty() {
                continue;
            }
            yield Ok(frame);
        }
    });

    (
        StatusCode::OK,
        [(CONTENT_TYPE, "audio/ogg"), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response()
}
