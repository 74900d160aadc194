//! Cœur de la station : file de lecture, ordonnanceur, transcodeurs,
//! recollage Ogg et diffusion aux auditeurs
//!
//! La station maintient un unique flux logique Ogg/Opus. Les pistes sont
//! résolues par [`ondesource`], transcodées une à une par un ffmpeg de piste
//! dont la sortie est épissée dans l'entrée d'un ffmpeg "mixeur" longue
//! durée. La sortie du mixeur est redécoupée en pages Ogg par [`ondeogg`] et
//! chaque page est publiée telle quelle aux auditeurs HTTP, ce qui garantit
//! qu'un client qui rejoint le flux en cours reçoit toujours des frontières
//! de pages alignées.
//!
//! La façade [`station::Station`] est la seule surface vue par la couche
//! HTTP.

pub mod api;
pub mod error;
pub mod events;
pub mod queue;
pub mod sse;
pub mod station;

mod scheduler;
mod splicer;
mod transcode;

pub use error::{Result, StationError};
pub use events::{EventHub, EventKind, EventSubscriber};
pub use queue::QueueManager;
pub use station::{Station, StationOptions};

// Les pistes circulent sous les types de la source.
pub use ondesource::{ResolvedTrack, TrackRef};
