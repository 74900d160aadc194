//! Ordonnanceur de lecture
//!
//! Boucle unique et longue durée : retirer la prochaine piste, la résoudre
//! en URL de média direct, lancer son transcodeur et recopier sa sortie dans
//! l'entrée du mixeur principal jusqu'à la fin de piste, un skip, un arrêt
//! ou un tube cassé. Le rythme est imposé par le mixeur (`-re`) : la boucle
//! de recopie est naturellement freinée par l'acceptation de son entrée.
//!
//! Cinq échecs consécutifs (résolution ou lancement) arrêtent
//! l'ordonnanceur et marquent la station comme morte.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ondesource::Resolved;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::events::EventKind;
use crate::station::StationInner;
use crate::transcode::TrackTranscoder;

/// Taille des blocs recopiés vers le mixeur.
const CHUNK_SIZE: usize = 4096;

/// Attente quand les files sont vides.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Pause entre deux blocs pour céder la main.
const WRITE_YIELD: Duration = Duration::from_millis(1);

/// Nombre d'échecs consécutifs toléré avant d'arrêter l'ordonnanceur.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Issue d'une recopie de piste.
enum PumpEnd {
    Finished,
    Skipped,
    Shutdown,
    BrokenPipe,
}

pub(crate) async fn run_scheduler<W>(inner: Arc<StationInner>, mut mixer_stdin: W)
where
    W: AsyncWrite + Unpin + Send,
{
    info!("playback scheduler started");
    let mut consecutive_failures = 0u32;

    while !inner.shutdown.is_cancelled() {
        let last_played = inner.last_played().await;
        let Some(candidate) = inner.queue.next(last_played).await else {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = sleep(IDLE_WAIT) => {}
            }
            continue;
        };

        // Les files ne stockent que des métadonnées : l'URL de média direct
        // est obtenue juste avant lecture.
        let resolved = match inner.source.resolve(&candidate.webpage_url, true).await {
            Ok(Resolved::Playable(resolved)) => resolved,
            Ok(Resolved::Metadata(_)) => {
                warn!("no media url resolved for {}", candidate.webpage_url);
                if note_failure(&mut consecutive_failures) {
                    mark_unhealthy(&inner);
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!("skipping {}: {e}", candidate.webpage_url);
                if note_failure(&mut consecutive_failures) {
                    mark_unhealthy(&inner);
                    break;
                }
                continue;
            }
        };

        inner.queue.record_played(resolved.id()).await;
        *inner.now_playing.write().await = Some(resolved.clone());
        let payload = serde_json::to_value(&resolved).unwrap_or(serde_json::Value::Null);
        inner.events.emit(EventKind::NowPlaying, payload).await;
        info!("now playing: {}", resolved.title());

        let (transcoder, stdout) =
            match TrackTranscoder::spawn(&inner.options.ffmpeg, &resolved, &inner.registry) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("track transcoder failed to start: {e}");
                    if note_failure(&mut consecutive_failures) {
                        mark_unhealthy(&inner);
                        break;
                    }
                    continue;
                }
            };
        consecutive_failures = 0;

        let end = pump_track(stdout, &mut mixer_stdin, &inner, &transcoder).await;
        transcoder.stop().await;
        inner.skip.store(false, Ordering::SeqCst);

        match &end {
            PumpEnd::Finished => info!("track finished: {}", resolved.title()),
            PumpEnd::Skipped => info!("track skipped: {}", resolved.title()),
            PumpEnd::Shutdown => info!("track interrupted by shutdown: {}", resolved.title()),
            PumpEnd::BrokenPipe => warn!("mixer rejected track data: {}", resolved.title()),
        }

        inner
            .events
            .emit(
                EventKind::Next,
                json!({ "id": resolved.id(), "title": resolved.title() }),
            )
            .await;
    }

    info!("playback scheduler stopped");
}

/// Recopie la sortie du transcodeur vers le mixeur, bloc par bloc.
async fn pump_track<R, W>(
    mut stdout: R,
    mixer_stdin: &mut W,
    inner: &StationInner,
    transcoder: &TrackTranscoder,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        if inner.skip.load(Ordering::SeqCst) {
            return PumpEnd::Skipped;
        }
        if transcoder.has_exited().await {
            return PumpEnd::Finished;
        }

        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => return PumpEnd::Shutdown,
            read = stdout.read(&mut buffer) => read,
        };
        let count = match read {
            Ok(0) => return PumpEnd::Finished,
            Ok(count) => count,
            Err(e) => {
                warn!("track transcoder read failed: {e}");
                return PumpEnd::Finished;
            }
        };

        let write = tokio::select! {
            _ = inner.shutdown.cancelled() => return PumpEnd::Shutdown,
            write = write_chunk(mixer_stdin, &buffer[..count]) => write,
        };
        if let Err(e) = write {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                warn!("mixer stdin write failed: {e}");
            }
            return PumpEnd::BrokenPipe;
        }

        sleep(WRITE_YIELD).await;
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> std::io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}

fn note_failure(counter: &mut u32) -> bool {
    *counter += 1;
    *counter >= MAX_CONSECUTIVE_FAILURES
}

fn mark_unhealthy(inner: &StationInner) {
    error!("too many consecutive playback failures, stopping the scheduler");
    inner.healthy.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::StationOptions;
    use async_trait::async_trait;
    use ondesource::{SourceError, TrackRef, TrackSource};
    use std::time::Duration;

    fn track(id: &str) -> TrackRef {
        TrackRef {
            title: format!("track {id}"),
            id: id.into(),
            webpage_url: format!("https://www.youtube.com/watch?v={id}"),
            duration: 120.0,
            channel: None,
            channel_url: None,
            extractor: None,
            need_reencode: false,
            process: false,
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TrackSource for FailingSource {
        async fn resolve(&self, url: &str, _process: bool) -> Result<Resolved, SourceError> {
            Err(SourceError::Unavailable(url.to_string()))
        }

        async fn related(&self, _track: &TrackRef) -> Vec<TrackRef> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn five_consecutive_failures_stop_the_scheduler() {
        let inner = StationInner::new(Arc::new(FailingSource), StationOptions::default());
        for i in 0..(MAX_CONSECUTIVE_FAILURES + 2) {
            inner.queue.add(track(&format!("t{i}"))).await;
        }

        let scheduler = run_scheduler(inner.clone(), tokio::io::sink());
        tokio::time::timeout(Duration::from_secs(5), scheduler)
            .await
            .expect("scheduler should stop on its own");

        assert!(!inner.healthy.load(Ordering::SeqCst));
        // Seules les pistes des cinq tentatives ont été consommées.
        assert_eq!(
            inner.queue.snapshot_user().await.len(),
            2usize
        );
    }

    #[tokio::test]
    async fn scheduler_exits_on_shutdown_while_idle() {
        let inner = StationInner::new(Arc::new(FailingSource), StationOptions::default());

        let handle = tokio::spawn(run_scheduler(inner.clone(), tokio::io::sink()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        inner.shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should observe shutdown")
            .unwrap();
    }
}
