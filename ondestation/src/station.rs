//! Façade de la station
//!
//! [`Station`] compose la file de lecture, l'ordonnanceur, le mixeur, le
//! recolleur Ogg et le hub d'évènements, et détient seule les processus et
//! les tâches de fond. C'est la seule surface vue par la couche HTTP.
//!
//! Cycle de vie : à la construction le mixeur principal est lancé puis les
//! tâches de recollage et d'ordonnancement démarrent. Si le mixeur ne peut
//! pas être lancé, la station reste en mode dégradé : les files et les
//! évènements fonctionnent mais `is_alive()` est faux et le flux audio est
//! indisponible. `shutdown()` est l'unique chemin vers l'état terminal et
//! est idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ondesource::{is_youtube_url, ResolvedTrack, SourceError, TrackRef, TrackSource};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, StationError};
use crate::events::{EventHub, EventSubscriber};
use crate::queue::QueueManager;
use crate::scheduler;
use crate::splicer;
use crate::transcode::{Mixer, MixerState, TranscoderRegistry};

/// Délai maximal d'attente du header du flux.
const HEADER_WAIT: Duration = Duration::from_secs(30);

/// Options de construction de la station.
#[derive(Debug, Clone)]
pub struct StationOptions {
    /// Binaire ffmpeg utilisé pour le mixeur et les transcodeurs de piste.
    pub ffmpeg: String,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
        }
    }
}

pub(crate) struct StationInner {
    pub(crate) source: Arc<dyn TrackSource>,
    pub(crate) queue: QueueManager,
    pub(crate) events: EventHub,
    pub(crate) now_playing: RwLock<Option<ResolvedTrack>>,
    pub(crate) header_tx: watch::Sender<Option<Bytes>>,
    pub(crate) header_rx: watch::Receiver<Option<Bytes>>,
    pub(crate) frame_tx: watch::Sender<Bytes>,
    pub(crate) frame_rx: watch::Receiver<Bytes>,
    pub(crate) skip: AtomicBool,
    pub(crate) shutdown: CancellationToken,
    pub(crate) stopped: AtomicBool,
    pub(crate) healthy: AtomicBool,
    pub(crate) mixer_up: AtomicBool,
    pub(crate) mixer: Mutex<MixerState>,
    pub(crate) registry: TranscoderRegistry,
    pub(crate) options: StationOptions,
}

impl StationInner {
    pub(crate) fn new(source: Arc<dyn TrackSource>, options: StationOptions) -> Arc<Self> {
        let events = EventHub::new();
        let queue = QueueManager::new(source.clone(), events.clone());
        let (header_tx, header_rx) = watch::channel(None);
        let (frame_tx, frame_rx) = watch::channel(Bytes::new());

        Arc::new(Self {
            source,
            queue,
            events,
            now_playing: RwLock::new(None),
            header_tx,
            header_rx,
            frame_tx,
            frame_rx,
            skip: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            mixer_up: AtomicBool::new(false),
            mixer: Mutex::new(MixerState::NotInitialized),
            registry: TranscoderRegistry::default(),
            options,
        })
    }

    pub(crate) async fn last_played(&self) -> Option<TrackRef> {
        self.now_playing
            .read()
            .await
            .as_ref()
            .map(|resolved| resolved.track.clone())
    }
}

/// Façade de la station, clonable et partageable avec la couche HTTP.
#[derive(Clone)]
pub struct Station {
    inner: Arc<StationInner>,
}

impl Station {
    /// Construit la station et démarre ses tâches de fond.
    ///
    /// L'échec du lancement du mixeur principal ne fait pas échouer la
    /// construction : la station démarre en mode dégradé.
    pub async fn new(source: Arc<dyn TrackSource>, options: StationOptions) -> Station {
        let inner = StationInner::new(source, options);

        match Mixer::spawn(&inner.options.ffmpeg) {
            Ok((mixer, stdin, stdout)) => {
                *inner.mixer.lock().await = MixerState::Running(mixer);
                inner.mixer_up.store(true, Ordering::SeqCst);
                tokio::spawn(splicer::run_splicer(stdout, inner.clone()));
                tokio::spawn(scheduler::run_scheduler(inner.clone(), stdin));
                info!("station started");
            }
            Err(e) => {
                error!("failed to start the main mixer, station is degraded: {e}");
                *inner.mixer.lock().await = MixerState::Dead;
                inner.healthy.store(false, Ordering::SeqCst);
            }
        }

        Station { inner }
    }

    /// Résout et enfile une URL sans bloquer l'appelant.
    ///
    /// Seule la validité du domaine est vérifiée de façon synchrone, la
    /// résolution s'exécute dans une tâche détachée qui journalise ses
    /// échecs.
    pub fn add_track(&self, url: &str) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(StationError::Interrupted);
        }
        if !is_youtube_url(url) {
            return Err(StationError::Source(SourceError::NotYouTube));
        }

        let inner = self.inner.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            match inner.source.resolve(&url, false).await {
                Ok(resolved) => inner.queue.add(resolved.into_metadata()).await,
                Err(e) => warn!("failed to enqueue {url}: {e}"),
            }
        });

        Ok(())
    }

    /// Demande la fin de la piste en cours.
    pub fn skip_track(&self) {
        self.inner.skip.store(true, Ordering::SeqCst);
    }

    pub async fn queue(&self) -> Vec<TrackRef> {
        self.inner.queue.snapshot_user().await
    }

    /// Page de la file utilisateur, voir [`QueueManager::page`].
    pub async fn queue_page(&self, page: usize) -> Vec<TrackRef> {
        let snapshot = self.inner.queue.snapshot_user().await;
        QueueManager::page(&snapshot, page)
    }

    pub async fn auto_queue(&self) -> Vec<TrackRef> {
        self.inner.queue.snapshot_auto().await
    }

    pub async fn now_playing(&self) -> Option<ResolvedTrack> {
        self.inner.now_playing.read().await.clone()
    }

    pub async fn next_up(&self) -> Option<TrackRef> {
        self.inner.queue.first_pending().await
    }

    /// Attend le header du flux (les deux premières pages Ogg).
    ///
    /// # Erreurs
    ///
    /// [`StationError::Timeout`] après 30 secondes sans header,
    /// [`StationError::Interrupted`] si la station est morte entre temps.
    pub async fn wait_for_header(&self) -> Result<Bytes> {
        let mut rx = self.inner.header_rx.clone();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(header) = current {
                    return Ok(header);
                }
                if !self.is_alive() {
                    return Err(StationError::Interrupted);
                }
                if rx.changed().await.is_err() {
                    return Err(StationError::Interrupted);
                }
            }
        };

        match timeout(HEADER_WAIT, wait).await {
            Ok(result) => result,
            Err(_) => Err(StationError::Timeout),
        }
    }

    /// Dernière trame diffusée.
    pub fn buffer(&self) -> Result<Bytes> {
        let frame = self.inner.frame_rx.borrow().clone();
        if frame.is_empty() && !self.is_alive() {
            return Err(StationError::Interrupted);
        }
        Ok(frame)
    }

    /// Cellule de trame courante, à la fois signal de réveil et valeur.
    ///
    /// Chaque publication de page réveille tous les récepteurs une seule
    /// fois ; un auditeur trop lent lit la page courante et perd les pages
    /// intermédiaires.
    pub fn subscribe_frames(&self) -> watch::Receiver<Bytes> {
        self.inner.frame_rx.clone()
    }

    /// Abonnement au flux d'évènements SSE.
    pub fn watch_events(&self) -> EventSubscriber {
        self.inner.events.subscribe()
    }

    /// Vrai tant que le recolleur tourne et qu'aucun arrêt n'est demandé.
    pub fn is_alive(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst) && !self.inner.shutdown.is_cancelled()
    }

    /// Vrai si le mixeur principal a pu être lancé à la construction.
    pub fn mixer_initialized(&self) -> bool {
        self.inner.mixer_up.load(Ordering::SeqCst)
    }

    /// Arrête la station. Idempotent, seul chemin vers l'état terminal.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("station shutdown requested");

        self.inner.shutdown.cancel();
        self.inner.skip.store(true, Ordering::SeqCst);
        self.inner.events.shutdown().await;
        self.inner.registry.sweep().await;

        let state = std::mem::replace(&mut *self.inner.mixer.lock().await, MixerState::Dead);
        if let MixerState::Running(mixer) = state {
            mixer.stop().await;
        }
        self.inner.healthy.store(false, Ordering::SeqCst);

        // Réveiller les auditeurs en attente de header ou de trame.
        self.inner.header_tx.send_modify(|_| {});
        self.inner.frame_tx.send_modify(|_| {});

        info!("station stopped");
    }
}
