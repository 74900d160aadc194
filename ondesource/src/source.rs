//! Contrat de source de pistes et implémentation yt-dlp.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{ResolvedTrack, TrackRef};
use crate::related::WatchNextClient;
use crate::ytdlp::YtDlp;
use crate::{MAX_DURATION_SECONDS, MAX_RELATED_TRACKS};

/// Résultat d'une résolution, selon que l'URL de média direct a été
/// demandée ou non.
#[derive(Debug, Clone)]
pub enum Resolved {
    Metadata(TrackRef),
    Playable(ResolvedTrack),
}

impl Resolved {
    pub fn into_metadata(self) -> TrackRef {
        match self {
            Resolved::Metadata(track) => track,
            Resolved::Playable(resolved) => resolved.track,
        }
    }
}

/// Source de pistes de la station.
///
/// `resolve` échoue sur les pistes indisponibles, en direct ou trop longues.
/// `related` est best-effort : elle consulte ses backends dans l'ordre,
/// retourne le premier résultat non vide et une liste vide sur échec total,
/// jamais une erreur.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn resolve(&self, url: &str, process: bool) -> Result<Resolved>;

    async fn related(&self, track: &TrackRef) -> Vec<TrackRef>;
}

/// Vérification rapide du domaine avant mise en file.
pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtu")
}

/// Source branchée sur yt-dlp, avec les pistes liées servies par la radio
/// YouTube Music puis, en secours, par la colonne watch-next.
pub struct YtDlpSource {
    ytdlp: YtDlp,
    watch_next: WatchNextClient,
}

impl YtDlpSource {
    pub fn new(ytdlp_binary: impl Into<String>) -> Self {
        Self {
            ytdlp: YtDlp::new(ytdlp_binary),
            watch_next: WatchNextClient::new(),
        }
    }

    pub fn with_watch_next(ytdlp_binary: impl Into<String>, watch_next: WatchNextClient) -> Self {
        Self {
            ytdlp: YtDlp::new(ytdlp_binary),
            watch_next,
        }
    }
}

#[async_trait]
impl TrackSource for YtDlpSource {
    async fn resolve(&self, url: &str, process: bool) -> Result<Resolved> {
        self.ytdlp.resolve(url, process).await
    }

    async fn related(&self, track: &TrackRef) -> Vec<TrackRef> {
        match self.ytdlp.radio_entries(&track.id).await {
            Ok(entries) => {
                let filtered = filter_suggestions(entries, &track.id);
                if !filtered.is_empty() {
                    debug!(
                        "youtube music radio returned {} suggestions for {}",
                        filtered.len(),
                        track.id
                    );
                    return filtered;
                }
            }
            Err(e) => warn!("youtube music radio lookup failed for {}: {e}", track.id),
        }

        filter_suggestions(self.watch_next.related(track).await, &track.id)
    }
}

/// Écarte la piste de départ et les pistes hors gabarit, borne la liste.
fn filter_suggestions(tracks: Vec<TrackRef>, seed_id: &str) -> Vec<TrackRef> {
    tracks
        .into_iter()
        .filter(|t| t.id != seed_id)
        .filter(|t| t.duration > 0.0 && t.duration <= MAX_DURATION_SECONDS)
        .take(MAX_RELATED_TRACKS)
        .collect()
}
