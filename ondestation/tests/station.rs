//! Tests de la façade sur une station dégradée (sans ffmpeg disponible).
//!
//! Le mode dégradé exerce le cycle de vie complet de la façade : files,
//! évènements et arrêt fonctionnent alors que le flux audio est mort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ondesource::{Resolved, SourceError, TrackRef, TrackSource};
use ondestation::{Station, StationError, StationOptions};

struct StubSource;

#[async_trait]
impl TrackSource for StubSource {
    async fn resolve(&self, url: &str, _process: bool) -> Result<Resolved, SourceError> {
        let id = url.rsplit('=').next().unwrap_or("unknown").to_string();
        Ok(Resolved::Metadata(TrackRef {
            title: format!("title {id}"),
            id,
            webpage_url: url.to_string(),
            duration: 90.0,
            channel: Some("Channel".into()),
            channel_url: None,
            extractor: Some("youtube".into()),
            need_reencode: false,
            process: false,
        }))
    }

    async fn related(&self, _track: &TrackRef) -> Vec<TrackRef> {
        Vec::new()
    }
}

async fn degraded_station() -> Station {
    Station::new(
        Arc::new(StubSource),
        StationOptions {
            ffmpeg: "/nonexistent/ffmpeg-for-tests".into(),
        },
    )
    .await
}

#[tokio::test]
async fn degraded_station_reports_itself_dead() {
    let station = degraded_station().await;

    assert!(!station.is_alive());
    assert!(!station.mixer_initialized());
    assert!(matches!(
        station.wait_for_header().await,
        Err(StationError::Interrupted)
    ));
    assert!(matches!(station.buffer(), Err(StationError::Interrupted)));
}

#[tokio::test]
async fn add_track_enqueues_and_emits_queueadd() {
    let station = degraded_station().await;
    let mut events = station.watch_events();

    assert!(station
        .add_track("https://www.youtube.com/watch?v=abc123")
        .is_ok());

    let frame = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("queueadd frame expected")
        .unwrap();
    assert!(frame.starts_with("event: queueadd\ndata: "));
    assert!(frame.ends_with("\n\n"));
    assert!(frame.contains("\"id\":\"abc123\""));

    let queue = station.queue().await;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, "abc123");
    assert_eq!(station.next_up().await.unwrap().id, "abc123");
}

#[tokio::test]
async fn non_youtube_urls_are_rejected_synchronously() {
    let station = degraded_station().await;
    assert!(matches!(
        station.add_track("https://example.com/track.mp3"),
        Err(StationError::Source(SourceError::NotYouTube))
    ));
    assert!(station.queue().await.is_empty());
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_subscribers() {
    let station = degraded_station().await;
    let mut events = station.watch_events();

    station.shutdown().await;
    station.shutdown().await;

    let frame = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("shutdown frame expected")
        .unwrap();
    assert!(frame.starts_with("event: shutdown\n"));
    assert!(tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("subscriber should close")
        .is_none());

    assert!(!station.is_alive());
    assert!(matches!(
        station.add_track("https://www.youtube.com/watch?v=late"),
        Err(StationError::Interrupted)
    ));
}

#[tokio::test]
async fn skip_flag_survives_without_a_scheduler() {
    // En mode dégradé le skip n'a pas d'ordonnanceur à réveiller : il doit
    // rester sans effet visible et sans panique.
    let station = degraded_station().await;
    station.skip_track();
    station.skip_track();
    assert!(station.now_playing().await.is_none());
}
