//! Types d'erreurs pour ondesource

/// Erreurs de résolution d'une piste.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("track is unavailable: {0}")]
    Unavailable(String),

    #[error("live streams are not supported")]
    Live,

    #[error("track duration {duration}s exceeds the 8 minute limit")]
    OverLength { duration: f64 },

    #[error("only YouTube links are accepted")]
    NotYouTube,
}

/// Type Result spécialisé pour ondesource
pub type Result<T> = std::result::Result<T, SourceError>;
