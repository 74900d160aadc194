//! Résolution de pistes YouTube et suggestions de pistes liées
//!
//! Ce crate fournit la source de pistes de la station : résolution d'une URL
//! en métadonnées (et en URL de média direct au moment de la lecture) via
//! yt-dlp, et récupération de pistes liées pour alimenter la file
//! automatique.
//!
//! Deux backends de pistes liées sont interrogés dans l'ordre, le premier
//! résultat non vide gagne :
//! 1. la playlist radio YouTube Music (`RDAMVM<id>`)
//! 2. la colonne watch-next de YouTube (API InnerTube)

pub mod error;
pub mod model;
pub mod related;
pub mod source;
pub mod ytdlp;

pub use error::SourceError;
pub use model::{ResolvedTrack, TrackRef};
pub use source::{is_youtube_url, Resolved, TrackSource, YtDlpSource};

/// Durée maximale d'une piste acceptée par la station (8 minutes).
pub const MAX_DURATION_SECONDS: f64 = 481.0;

/// Nombre maximal de pistes liées retournées par un backend.
pub const MAX_RELATED_TRACKS: usize = 25;
