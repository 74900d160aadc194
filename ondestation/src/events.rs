//! Diffusion des évènements de la station aux abonnés SSE
//!
//! Le hub reçoit des couples `(type, payload)` sur une file partagée. Une
//! tâche de distribution met chaque évènement en forme SSE une seule fois
//! (`event: <type>\ndata: <json>\n\n`) puis le dépose dans la file bornée de
//! chaque abonné, sans bloquer : un abonné saturé perd la trame plutôt que
//! de ralentir les producteurs.
//!
//! Un nouvel abonné reçoit immédiatement la dernière trame `nowplaying`
//! connue, puis les trames suivantes dans l'ordre d'émission.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacité de la file d'entrée du hub.
const INTAKE_CAPACITY: usize = 64;

/// Capacité de la file de chaque abonné.
const SUBSCRIBER_CAPACITY: usize = 32;

/// Période de scrutation d'un abonné, pour observer l'arrêt de la station.
const WATCH_POLL: Duration = Duration::from_secs(1);

/// Types d'évènements diffusés par la station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NowPlaying,
    QueueAdd,
    Next,
    Shutdown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NowPlaying => "nowplaying",
            EventKind::QueueAdd => "queueadd",
            EventKind::Next => "next",
            EventKind::Shutdown => "shutdown",
        }
    }
}

enum HubMessage {
    Event(EventKind, Value),
    Shutdown,
}

struct HubInner {
    intake: mpsc::Sender<HubMessage>,
    subscribers: Mutex<Vec<mpsc::Sender<String>>>,
    last_nowplaying: Mutex<Option<String>>,
    closed: CancellationToken,
}

/// Hub d'évènements de la station.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (intake, rx) = mpsc::channel(INTAKE_CAPACITY);
        let inner = Arc::new(HubInner {
            intake,
            subscribers: Mutex::new(Vec::new()),
            last_nowplaying: Mutex::new(None),
            closed: CancellationToken::new(),
        });

        tokio::spawn(dispatch(inner.clone(), rx));

        Self { inner }
    }

    /// Dépose un évènement dans la file du hub.
    pub async fn emit(&self, kind: EventKind, payload: Value) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        let _ = self.inner.intake.send(HubMessage::Event(kind, payload)).await;
    }

    /// Crée un nouvel abonné.
    pub fn subscribe(&self) -> EventSubscriber {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        if let Some(frame) = self.inner.last_nowplaying.lock().unwrap().clone() {
            let _ = tx.try_send(frame);
        }
        self.inner.subscribers.lock().unwrap().push(tx);

        EventSubscriber {
            rx,
            closed: self.inner.closed.clone(),
        }
    }

    /// Diffuse la sentinelle `shutdown` puis ferme le hub.
    pub async fn shutdown(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        let _ = self.inner.intake.send(HubMessage::Shutdown).await;
        self.inner.closed.cancelled().await;
    }
}

async fn dispatch(inner: Arc<HubInner>, mut rx: mpsc::Receiver<HubMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            HubMessage::Event(kind, payload) => {
                let frame = format_frame(kind.as_str(), &payload);
                if kind == EventKind::NowPlaying {
                    *inner.last_nowplaying.lock().unwrap() = Some(frame.clone());
                }
                fan_out(&inner, &frame);
            }
            HubMessage::Shutdown => {
                let frame = format_frame(EventKind::Shutdown.as_str(), &Value::Null);
                fan_out(&inner, &frame);
                break;
            }
        }
    }

    debug!("event dispatcher stopped");
    inner.closed.cancel();
    // Lâcher les senders pour clore les files des abonnés.
    inner.subscribers.lock().unwrap().clear();
}

fn fan_out(inner: &HubInner, frame: &str) {
    let mut subscribers = inner.subscribers.lock().unwrap();
    subscribers.retain(|tx| match tx.try_send(frame.to_string()) {
        Ok(()) => true,
        // Abonné saturé : on perd la trame pour lui, pas pour les autres.
        Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    });
}

/// Met un évènement en forme SSE.
pub fn format_frame(kind: &str, payload: &Value) -> String {
    format!("event: {kind}\ndata: {payload}\n\n")
}

/// Abonné au flux d'évènements.
pub struct EventSubscriber {
    rx: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl EventSubscriber {
    /// Attend la prochaine trame SSE.
    ///
    /// Retourne `None` une fois la sentinelle `shutdown` consommée et le hub
    /// fermé. La scrutation est bornée à une seconde pour que l'arrêt de la
    /// station soit toujours observé.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match tokio::time::timeout(WATCH_POLL, self.rx.recv()).await {
                Ok(frame) => return frame,
                Err(_) => {
                    if self.closed.is_cancelled() && self.rx.is_empty() {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_sse_shape(frame: &str) {
        let rest = frame.strip_prefix("event: ").expect("frame starts with event:");
        let (kind, rest) = rest.split_once('\n').expect("event line ends");
        assert!(kind.chars().all(|c| c.is_ascii_lowercase()));
        let data = rest
            .strip_prefix("data: ")
            .and_then(|d| d.strip_suffix("\n\n"))
            .expect("data line and trailing blank line");
        serde_json::from_str::<Value>(data).expect("data is valid json");
    }

    #[tokio::test]
    async fn frames_are_sse_shaped_and_ordered() {
        let hub = EventHub::new();
        let mut subscriber = hub.subscribe();

        hub.emit(EventKind::QueueAdd, json!({"id": "a"})).await;
        hub.emit(EventKind::NowPlaying, json!({"id": "a", "title": "A"}))
            .await;

        let first = subscriber.next().await.unwrap();
        assert!(first.starts_with("event: queueadd\n"));
        assert_sse_shape(&first);

        let second = subscriber.next().await.unwrap();
        assert!(second.starts_with("event: nowplaying\n"));
        assert_sse_shape(&second);
    }

    #[tokio::test]
    async fn late_subscriber_gets_last_nowplaying() {
        let hub = EventHub::new();
        hub.emit(EventKind::NowPlaying, json!({"id": "x"})).await;

        // Laisser la distribution passer.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut subscriber = hub.subscribe();
        let frame = subscriber.next().await.unwrap();
        assert!(frame.starts_with("event: nowplaying\n"));
        assert!(frame.contains("\"id\":\"x\""));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_frames_without_blocking() {
        let hub = EventHub::new();
        let mut subscriber = hub.subscribe();

        // Deux fois la capacité d'un abonné : l'excédent est perdu pour lui.
        for i in 0..(SUBSCRIBER_CAPACITY * 2) {
            hub.emit(EventKind::QueueAdd, json!({"seq": i})).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub.shutdown().await;

        let mut received = 0;
        while let Some(frame) = subscriber.next().await {
            if frame.starts_with("event: queueadd\n") {
                received += 1;
            }
        }
        assert!(received <= SUBSCRIBER_CAPACITY);
        assert!(received > 0);
    }

    #[tokio::test]
    async fn shutdown_sends_sentinel_then_closes() {
        let hub = EventHub::new();
        let mut subscriber = hub.subscribe();

        hub.shutdown().await;
        // Un second arrêt ne fait rien.
        hub.shutdown().await;

        let frame = subscriber.next().await.unwrap();
        assert!(frame.starts_with("event: shutdown\n"));
        assert_sse_shape(&frame);
        assert!(subscriber.next().await.is_none());

        // Émettre après l'arrêt est sans effet.
        hub.emit(EventKind::QueueAdd, json!({})).await;
    }
}
