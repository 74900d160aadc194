//! Représentation des pistes telles qu'elles circulent dans la station.

use serde::{Deserialize, Serialize};

/// Référence de piste : métadonnées seules, sans URL de média direct.
///
/// C'est la forme stockée dans les files (utilisateur et automatique) et
/// diffusée dans l'évènement `queueadd`. Le champ `process` reste `false`
/// tant que la piste n'a pas été résolue pour lecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub title: String,
    pub id: String,
    pub webpage_url: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default)]
    pub need_reencode: bool,
    #[serde(default)]
    pub process: bool,
}

/// Piste résolue pour lecture : métadonnées plus l'URL de média direct.
///
/// Produite juste avant la lecture, consommée par le transcodeur de piste,
/// diffusée dans l'évènement `nowplaying`. Son champ `process` vaut `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTrack {
    #[serde(flatten)]
    pub track: TrackRef,
    pub url: String,
    pub format_duration: String,
}

impl ResolvedTrack {
    pub fn title(&self) -> &str {
        &self.track.title
    }

    pub fn id(&self) -> &str {
        &self.track.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_track_flattens_on_the_wire() {
        let resolved = ResolvedTrack {
            track: TrackRef {
                title: "Song".into(),
                id: "abc123".into(),
                webpage_url: "https://www.youtube.com/watch?v=abc123".into(),
                duration: 180.0,
                channel: Some("Channel".into()),
                channel_url: None,
                extractor: Some("youtube".into()),
                need_reencode: false,
                process: true,
            },
            url: "https://cdn.example/audio.webm".into(),
            format_duration: "3:00".into(),
        };

        let value = serde_json::to_value(&resolved).unwrap();
        assert_eq!(value["title"], "Song");
        assert_eq!(value["process"], true);
        assert_eq!(value["url"], "https://cdn.example/audio.webm");
        assert_eq!(value["format_duration"], "3:00");
        assert!(value.get("channel_url").is_none());
    }
}
