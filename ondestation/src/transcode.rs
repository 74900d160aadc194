//! Supervision des processus ffmpeg
//!
//! Deux invocations distinctes :
//! - le mixeur principal, unique et longue durée, qui recopie en temps réel
//!   (`-re`) l'Opus reçu sur son entrée standard vers sa sortie standard ;
//! - le transcodeur de piste, un processus par morceau, qui lit l'URL de
//!   média direct avec reconnexion automatique et produit de l'Opus, en le
//!   réencodant en libopus 128k/48kHz quand la source l'exige.
//!
//! Contrat d'arrêt : fermeture des tubes, attente bornée de la sortie du
//! processus, puis kill. Un registre des transcodeurs vivants permet à
//! l'arrêt de la station de balayer les retardataires.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ondesource::ResolvedTrack;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::StationError;

/// Délai accordé à un transcodeur de piste avant kill.
const TRACK_STOP_GRACE: Duration = Duration::from_secs(3);

/// Délai accordé au mixeur principal avant kill.
const MIXER_STOP_GRACE: Duration = Duration::from_secs(5);

/// État de l'emplacement du mixeur principal.
pub(crate) enum MixerState {
    NotInitialized,
    Running(Mixer),
    Dead,
}

/// Le processus mixeur principal.
///
/// Son entrée standard est le point d'épissure des pistes, sa sortie
/// standard alimente le recolleur Ogg. Les deux tubes sont extraits à la
/// création et confiés aux tâches concernées.
pub(crate) struct Mixer {
    child: Child,
}

impl Mixer {
    pub(crate) fn spawn(ffmpeg: &str) -> Result<(Mixer, ChildStdin, ChildStdout), StationError> {
        let mut child = Command::new(ffmpeg)
            .args([
                "-re", "-i", "-", "-threads", "2", "-c:a", "copy", "-f", "opus",
                "-loglevel", "error", "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(StationError::TranscoderSpawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StationError::TranscoderSpawn(std::io::Error::other("mixer stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StationError::TranscoderSpawn(std::io::Error::other("mixer stdout unavailable")))?;

        debug!("main mixer started (pid {:?})", child.id());
        Ok((Mixer { child }, stdin, stdout))
    }

    /// Attend la fin du mixeur, le tue passé le délai de grâce.
    ///
    /// Les tubes doivent déjà être fermés : le mixeur voit EOF sur son
    /// entrée et se termine de lui-même dans le cas nominal.
    pub(crate) async fn stop(mut self) {
        match timeout(MIXER_STOP_GRACE, self.child.wait()).await {
            Ok(status) => debug!("main mixer exited: {status:?}"),
            Err(_) => {
                warn!("main mixer did not exit in time, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("failed to kill main mixer: {e}");
                }
            }
        }
    }
}

/// Registre des transcodeurs de piste vivants.
#[derive(Clone, Default)]
pub(crate) struct TranscoderRegistry {
    children: Arc<StdMutex<HashMap<u64, Arc<Mutex<Child>>>>>,
    counter: Arc<AtomicU64>,
}

impl TranscoderRegistry {
    /// Arrête tous les transcodeurs encore enregistrés.
    pub(crate) async fn sweep(&self) {
        let children: Vec<Arc<Mutex<Child>>> = {
            let mut map = self.children.lock().unwrap();
            map.drain().map(|(_, child)| child).collect()
        };
        for child in children {
            stop_child(&child).await;
        }
    }

    fn register(&self, child: Child) -> (u64, Arc<Mutex<Child>>) {
        let token = self.counter.fetch_add(1, Ordering::Relaxed);
        let child = Arc::new(Mutex::new(child));
        self.children.lock().unwrap().insert(token, child.clone());
        (token, child)
    }

    fn unregister(&self, token: u64) {
        self.children.lock().unwrap().remove(&token);
    }
}

/// Un transcodeur de piste en cours d'exécution.
pub(crate) struct TrackTranscoder {
    token: u64,
    child: Arc<Mutex<Child>>,
    registry: TranscoderRegistry,
}

impl TrackTranscoder {
    /// Lance le transcodeur d'une piste résolue et rend sa sortie standard.
    pub(crate) fn spawn(
        ffmpeg: &str,
        track: &ResolvedTrack,
        registry: &TranscoderRegistry,
    ) -> Result<(TrackTranscoder, ChildStdout), StationError> {
        let mut command = Command::new(ffmpeg);
        command.args([
            "-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5", "-i",
        ]);
        command.arg(&track.url);
        command.args(["-threads", "2"]);
        if track.track.need_reencode {
            command.args(["-c:a", "libopus", "-b:a", "128k", "-ar", "48000"]);
        } else {
            command.args(["-c:a", "copy"]);
        }
        command.args(["-bufsize", "64k", "-f", "opus", "-vn", "-loglevel", "error", "pipe:1"]);

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(StationError::TranscoderSpawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StationError::TranscoderSpawn(std::io::Error::other("transcoder stdout unavailable")))?;

        debug!("track transcoder started for {} (pid {:?})", track.id(), child.id());
        let (token, child) = registry.register(child);

        Ok((
            TrackTranscoder {
                token,
                child,
                registry: registry.clone(),
            },
            stdout,
        ))
    }

    /// Vrai si le processus s'est déjà terminé.
    pub(crate) async fn has_exited(&self) -> bool {
        self.child
            .lock()
            .await
            .try_wait()
            .ok()
            .flatten()
            .is_some()
    }

    /// Applique le contrat d'arrêt et retire le processus du registre.
    pub(crate) async fn stop(self) {
        self.registry.unregister(self.token);
        stop_child(&self.child).await;
    }
}

async fn stop_child(child: &Arc<Mutex<Child>>) {
    let mut child = child.lock().await;
    match timeout(TRACK_STOP_GRACE, child.wait()).await {
        Ok(status) => debug!("track transcoder exited: {status:?}"),
        Err(_) => {
            warn!("track transcoder did not exit in time, killing it");
            if let Err(e) = child.kill().await {
                warn!("failed to kill track transcoder: {e}");
            }
        }
    }
}
