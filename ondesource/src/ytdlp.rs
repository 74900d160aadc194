//! Client yt-dlp en sous-processus
//!
//! yt-dlp est invoqué avec `-J` (dump JSON) et son résultat est projeté sur
//! [`TrackRef`] / [`ResolvedTrack`]. Les playlists sont réduites à leur
//! première entrée.

use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SourceError};
use crate::model::{ResolvedTrack, TrackRef};
use crate::source::Resolved;
use crate::MAX_DURATION_SECONDS;

/// Sélection de format audio, identique pour toutes les invocations.
const AUDIO_FORMAT: &str = "bestaudio[ext=webm]/bestaudio/best";

/// Invocation de yt-dlp par sous-processus.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Résout une URL en piste.
    ///
    /// Avec `process`, le dump contient l'URL de média direct du format
    /// audio choisi et la piste retournée est jouable. Sans `process`, seules
    /// les métadonnées sont retournées.
    pub async fn resolve(&self, url: &str, process: bool) -> Result<Resolved> {
        debug!(url, process, "resolving track with yt-dlp");
        let dump = self.dump(url, false, "1").await?;
        let entry = first_entry(dump)?;
        entry_to_resolved(&entry, url, process)
    }

    /// Entrées de la playlist radio YouTube Music dérivée d'une vidéo.
    pub async fn radio_entries(&self, video_id: &str) -> Result<Vec<TrackRef>> {
        let url = format!("https://music.youtube.com/watch?v={video_id}&list=RDAMVM{video_id}");
        let dump = self.dump(&url, true, "1-25").await?;

        let entries = match dump.get("entries").and_then(Value::as_array) {
            Some(entries) => entries.clone(),
            None => return Ok(Vec::new()),
        };

        let mut tracks = Vec::new();
        for entry in &entries {
            match entry_to_track(entry, "") {
                Ok(track) => tracks.push(track),
                Err(e) => debug!("skipping radio entry: {e}"),
            }
        }
        Ok(tracks)
    }

    async fn dump(&self, url: &str, flat: bool, playlist_items: &str) -> Result<Value> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-J")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--no-check-certificates")
            .arg("--restrict-filenames")
            .args(["--format", AUDIO_FORMAT])
            .args(["--source-address", "0.0.0.0"])
            .args(["--playlist-items", playlist_items]);
        if flat {
            command.arg("--flat-playlist");
        }
        command
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(SourceError::Unavailable(format!(
                "yt-dlp exited with status {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| SourceError::Unavailable(format!("invalid yt-dlp output: {e}")))
    }
}

/// Réduit un dump playlist à sa première entrée, rend les dumps vidéo tels
/// quels.
pub(crate) fn first_entry(dump: Value) -> Result<Value> {
    if !dump.get("entries").map(Value::is_array).unwrap_or(false) {
        return Ok(dump);
    }
    dump.get("entries")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .cloned()
        .ok_or_else(|| SourceError::Unavailable("playlist has no entries".into()))
}

/// Projette une entrée de dump sur [`TrackRef`].
pub(crate) fn entry_to_track(entry: &Value, fallback_url: &str) -> Result<TrackRef> {
    if entry
        .get("is_live")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(SourceError::Live);
    }

    // Sans durée connue, la piste est considérée trop longue.
    let duration = entry
        .get("duration")
        .and_then(Value::as_f64)
        .unwrap_or(-1.0);
    if duration < 0.0 || duration > MAX_DURATION_SECONDS {
        return Err(SourceError::OverLength { duration });
    }

    let sample_rate = entry.get("asr").and_then(Value::as_f64).unwrap_or(0.0);
    let codec = entry
        .get("acodec")
        .and_then(Value::as_str)
        .unwrap_or("none");
    let need_reencode = sample_rate != 48000.0 || codec != "opus";

    let webpage_url = string_field(entry, "webpage_url")
        .or_else(|| string_field(entry, "original_url"))
        .or_else(|| string_field(entry, "url"))
        .unwrap_or_else(|| fallback_url.to_string());

    Ok(TrackRef {
        title: string_field(entry, "title").unwrap_or_else(|| "Unknown Title".into()),
        id: string_field(entry, "id").unwrap_or_else(|| "unknown".into()),
        webpage_url,
        duration,
        channel: string_field(entry, "uploader"),
        channel_url: string_field(entry, "uploader_url").or_else(|| string_field(entry, "channel_url")),
        extractor: string_field(entry, "extractor"),
        need_reencode,
        process: false,
    })
}

pub(crate) fn entry_to_resolved(entry: &Value, fallback_url: &str, process: bool) -> Result<Resolved> {
    let mut track = entry_to_track(entry, fallback_url)?;
    if !process {
        return Ok(Resolved::Metadata(track));
    }

    let url = string_field(entry, "url")
        .ok_or_else(|| SourceError::Unavailable("no direct media url in yt-dlp output".into()))?;
    track.process = true;

    Ok(Resolved::Playable(ResolvedTrack {
        track,
        url,
        format_duration: string_field(entry, "duration_string").unwrap_or_else(|| "0:00".into()),
    }))
}

fn string_field(entry: &Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
