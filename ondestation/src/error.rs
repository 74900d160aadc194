//! Types d'erreurs pour ondestation

use ondesource::SourceError;

/// Erreurs exposées par la façade de la station.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    /// Le header du flux n'est pas arrivé dans le délai imparti.
    #[error("timed out waiting for the stream header")]
    Timeout,

    /// La station est arrêtée ou morte, l'opération n'aboutira plus.
    #[error("station is not available")]
    Interrupted,

    #[error("failed to spawn transcoder: {0}")]
    TranscoderSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Type Result spécialisé pour ondestation
pub type Result<T> = std::result::Result<T, StationError>;
