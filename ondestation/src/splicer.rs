//! Recollage de la sortie du mixeur en trames diffusables
//!
//! Lit la sortie standard du mixeur page Ogg par page Ogg. Les deux
//! premières pages (OpusHead puis OpusTags) sont concaténées et publiées
//! comme header du flux : c'est le préfixe servi une fois à chaque nouvel
//! auditeur. Chaque page suivante est réémise telle quelle, en une trame
//! autodélimitée, dans la cellule de trame courante ; la publication réveille
//! tous les auditeurs exactement une fois par page. Servir des pages
//! entières garantit qu'un démultiplexeur qui rejoint le flux en cours de
//! route retombe toujours sur une frontière valide.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use ondeogg::{OggError, PageReader, PAGE_MAGIC};
use tokio::io::AsyncRead;
use tracing::{info, warn};

use crate::station::StationInner;

pub(crate) async fn run_splicer<R>(output: R, inner: Arc<StationInner>)
where
    R: AsyncRead + Unpin,
{
    info!("ogg splicer started");
    let mut reader = PageReader::new(output);

    let mut header = Vec::new();
    match reader.next_page().await {
        Ok(page) if page.is_bos() => header.extend_from_slice(&page.raw()),
        Ok(page) => warn!(
            "first mixer page does not begin a stream (flag {:#x})",
            page.flag()
        ),
        Err(e) => {
            info!("mixer output ended before the stream header: {e}");
            finish(&inner);
            return;
        }
    }
    match reader.next_page().await {
        Ok(page) => header.extend_from_slice(&page.raw()),
        Err(e) => {
            info!("mixer output ended before the comment header: {e}");
            finish(&inner);
            return;
        }
    }
    inner.header_tx.send_replace(Some(Bytes::from(header)));

    loop {
        let page = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            page = reader.next_page() => page,
        };

        match page {
            Ok(page) => {
                let mut frame =
                    Vec::with_capacity(PAGE_MAGIC.len() + page.header.len() + page.segtable.len() + page.data.len());
                frame.extend_from_slice(PAGE_MAGIC);
                frame.extend_from_slice(&page.header);
                frame.extend_from_slice(&page.segtable);
                for (packet, _) in page.packets() {
                    frame.extend_from_slice(packet);
                }
                inner.frame_tx.send_replace(Bytes::from(frame));
            }
            Err(OggError::StreamEnded) => {
                info!("mixer output stream ended");
                break;
            }
            Err(e) => {
                warn!("ogg splicer stopping on error: {e}");
                break;
            }
        }
    }

    finish(&inner);
    info!("ogg splicer stopped");
}

fn finish(inner: &StationInner) {
    inner.healthy.store(false, Ordering::SeqCst);
    // Réveiller les auditeurs pour qu'ils observent la fin du flux.
    inner.header_tx.send_modify(|_| {});
    inner.frame_tx.send_modify(|_| {});
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::StationOptions;
    use async_trait::async_trait;
    use ondesource::{Resolved, SourceError, TrackRef, TrackSource};
    use ondeogg::HEADER_LEN;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct NullSource;

    #[async_trait]
    impl TrackSource for NullSource {
        async fn resolve(&self, url: &str, _process: bool) -> Result<Resolved, SourceError> {
            Err(SourceError::Unavailable(url.to_string()))
        }

        async fn related(&self, _track: &TrackRef) -> Vec<TrackRef> {
            Vec::new()
        }
    }

    fn build_page(flag: u8, sequence: u32, payload: &[u8]) -> Vec<u8> {
        let mut segtable = Vec::new();
        let mut remaining = payload.len();
        loop {
            let lacing = remaining.min(255);
            segtable.push(lacing as u8);
            remaining -= lacing;
            if lacing < 255 {
                break;
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(PAGE_MAGIC);
        out.push(0);
        out.push(flag);
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(segtable.len() as u8);
        out.extend_from_slice(&segtable);
        out.extend_from_slice(payload);
        out
    }

    /// Vérifie qu'une trame est une page Ogg autodélimitée.
    fn assert_page_aligned(frame: &[u8]) {
        assert_eq!(&frame[..4], PAGE_MAGIC);
        let segment_count = frame[4 + HEADER_LEN - 1] as usize;
        let segtable = &frame[4 + HEADER_LEN..4 + HEADER_LEN + segment_count];
        let body_len: usize = segtable.iter().map(|&b| b as usize).sum();
        assert_eq!(frame.len(), 4 + HEADER_LEN + segment_count + body_len);
    }

    #[tokio::test]
    async fn publishes_header_then_page_frames() {
        let inner = StationInner::new(Arc::new(NullSource), StationOptions::default());
        let (mut mixer_out, splicer_in) = tokio::io::duplex(64 * 1024);

        let splicer = tokio::spawn(run_splicer(splicer_in, inner.clone()));

        let bos = build_page(ondeogg::FLAG_BOS, 0, b"OpusHead....");
        let tags = build_page(0, 1, b"OpusTags....");
        mixer_out.write_all(&bos).await.unwrap();
        mixer_out.write_all(&tags).await.unwrap();

        let mut header_rx = inner.header_rx.clone();
        let header = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(header) = header_rx.borrow_and_update().clone() {
                    return header;
                }
                header_rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        // Le header est exactement la concaténation des deux premières
        // pages, la première portant le bit BOS.
        let mut expected = bos.clone();
        expected.extend_from_slice(&tags);
        assert_eq!(header.as_ref(), expected.as_slice());
        assert_eq!(header[4 + 1] & ondeogg::FLAG_BOS, ondeogg::FLAG_BOS);

        // Les pages suivantes sont publiées une par une, alignées.
        let mut frame_rx = inner.frame_rx.clone();
        for sequence in 2..5u32 {
            let page = build_page(0, sequence, &vec![0x5A; 600]);
            mixer_out.write_all(&page).await.unwrap();

            tokio::time::timeout(Duration::from_secs(5), frame_rx.changed())
                .await
                .unwrap()
                .unwrap();
            let frame = frame_rx.borrow_and_update().clone();
            assert_eq!(frame.as_ref(), page.as_slice());
            assert_page_aligned(&frame);
        }

        // EOF côté mixeur : le recolleur s'arrête et la station meurt.
        drop(mixer_out);
        tokio::time::timeout(Duration::from_secs(5), splicer)
            .await
            .unwrap()
            .unwrap();
        assert!(!inner.healthy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_header_pages_mark_the_station_dead() {
        let inner = StationInner::new(Arc::new(NullSource), StationOptions::default());
        let (mixer_out, splicer_in) = tokio::io::duplex(1024);

        let splicer = tokio::spawn(run_splicer(splicer_in, inner.clone()));
        drop(mixer_out);

        tokio::time::timeout(Duration::from_secs(5), splicer)
            .await
            .unwrap()
            .unwrap();
        assert!(!inner.healthy.load(Ordering::SeqCst));
        assert!(inner.header_rx.borrow().is_none());
    }
}
