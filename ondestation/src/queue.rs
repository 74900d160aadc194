//! Files de lecture de la station
//!
//! Deux files vivent sous un même verrou : la file utilisateur, alimentée
//! par `add`, et la file automatique, remplie à la demande avec des pistes
//! liées à la dernière piste jouée. La file utilisateur est prioritaire :
//! en consommer une entrée vide la file automatique, qui sera reconstruite à
//! partir du nouveau morceau.
//!
//! Un historique borné des derniers identifiants joués sert uniquement à
//! dédupliquer les suggestions du remplissage automatique.

use std::collections::VecDeque;
use std::sync::Arc;

use ondesource::{TrackRef, TrackSource};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::events::{EventHub, EventKind};

/// Nombre d'identifiants retenus dans l'historique de lecture.
pub const HISTORY_CAPACITY: usize = 50;

/// Taille d'une page de file utilisateur côté API.
pub const PAGE_SIZE: usize = 5;

struct QueueState {
    user: VecDeque<TrackRef>,
    auto: VecDeque<TrackRef>,
    history: VecDeque<String>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    source: Arc<dyn TrackSource>,
    events: EventHub,
}

/// Conteneur thread-safe des files utilisateur et automatique.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl QueueManager {
    pub fn new(source: Arc<dyn TrackSource>, events: EventHub) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    user: VecDeque::new(),
                    auto: VecDeque::new(),
                    history: VecDeque::new(),
                }),
                source,
                events,
            }),
        }
    }

    /// Ajoute une piste en fin de file utilisateur et émet `queueadd`.
    pub async fn add(&self, track: TrackRef) {
        {
            let mut state = self.inner.state.lock().await;
            state.user.push_back(track.clone());
        }
        let payload = serde_json::to_value(&track).unwrap_or(Value::Null);
        self.inner.events.emit(EventKind::QueueAdd, payload).await;
    }

    /// Retire la prochaine piste à jouer.
    ///
    /// Sous le verrou de file : une file utilisateur non vide est prioritaire
    /// et sa consommation vide la file automatique. Sinon, si la file
    /// automatique est vide et qu'une piste vient d'être jouée, un
    /// remplissage synchrone est tenté à partir de cette piste.
    pub async fn next(&self, last_played: Option<TrackRef>) -> Option<TrackRef> {
        let mut state = self.inner.state.lock().await;

        if let Some(track) = state.user.pop_front() {
            state.auto.clear();
            return Some(track);
        }

        if state.auto.is_empty() {
            if let Some(seed) = last_played {
                let suggestions = self.inner.source.related(&seed).await;
                debug!(
                    "auto queue refill from {} produced {} suggestions",
                    seed.id,
                    suggestions.len()
                );
                Self::merge_suggestions(&mut state, suggestions);
            }
        }

        state.auto.pop_front()
    }

    /// Remplit la file automatique à partir d'une piste donnée.
    pub async fn refill(&self, seed: &TrackRef) {
        let suggestions = self.inner.source.related(seed).await;
        let mut state = self.inner.state.lock().await;
        Self::merge_suggestions(&mut state, suggestions);
    }

    /// Ajoute les suggestions dont l'identifiant n'est pas dans l'historique.
    fn merge_suggestions(state: &mut QueueState, suggestions: Vec<TrackRef>) {
        for track in suggestions {
            if !state.history.contains(&track.id) {
                state.auto.push_back(track);
            }
        }
    }

    /// Mémorise un identifiant joué, en évinçant le plus ancien au besoin.
    pub async fn record_played(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        state.history.push_back(id.to_string());
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }
    }

    pub async fn snapshot_user(&self) -> Vec<TrackRef> {
        self.inner.state.lock().await.user.iter().cloned().collect()
    }

    pub async fn snapshot_auto(&self) -> Vec<TrackRef> {
        self.inner.state.lock().await.auto.iter().cloned().collect()
    }

    /// Première piste en attente côté utilisateur, pour le "next up".
    pub async fn first_pending(&self) -> Option<TrackRef> {
        self.inner.state.lock().await.user.front().cloned()
    }

    /// Découpe une page de la file.
    ///
    /// La fenêtre retournée est `[max(0, end - PAGE_SIZE), end)` avec
    /// `end = min((page + 1) * PAGE_SIZE, len)` : la dernière page reste
    /// pleine tant que la file contient au moins [`PAGE_SIZE`] éléments.
    pub fn page(items: &[TrackRef], page: usize) -> Vec<TrackRef> {
        let end = ((page + 1) * PAGE_SIZE).min(items.len());
        let start = end.saturating_sub(PAGE_SIZE);
        items[start..end].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ondesource::{Resolved, SourceError};
    use std::sync::Mutex as StdMutex;

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

    struct FakeSource {
        related: StdMutex<Vec<TrackRef>>,
    }

    impl FakeSource {
        fn new(related: Vec<TrackRef>) -> Arc<Self> {
            Arc::new(Self {
                related: StdMutex::new(related),
            })
        }
    }

    #[async_trait]
    impl TrackSource for FakeSource {
        async fn resolve(&self, url: &str, _process: bool) -> Result<Resolved, SourceError> {
            Err(SourceError::Unavailable(url.to_string()))
        }

        async fn related(&self, _track: &TrackRef) -> Vec<TrackRef> {
            self.related.lock().unwrap().clone()
        }
    }

    fn manager(related: Vec<TrackRef>) -> QueueManager {
        QueueManager::new(FakeSource::new(related), EventHub::new())
    }

    #[tokio::test]
    async fn user_tracks_preempt_and_clear_the_auto_queue() {
        let queue = manager(vec![track("auto1"), track("auto2")]);

        // Remplir la file automatique depuis une piste jouée.
        queue.refill(&track("seed")).await;
        assert_eq!(queue.snapshot_auto().await.len(), 2);

        queue.add(track("user1")).await;
        let next = queue.next(None).await.unwrap();
        assert_eq!(next.id, "user1");
        assert!(queue.snapshot_auto().await.is_empty());
    }

    #[tokio::test]
    async fn empty_queues_refill_from_the_last_played_track() {
        let queue = manager(vec![track("auto1"), track("auto2")]);

        let next = queue.next(Some(track("seed"))).await.unwrap();
        assert_eq!(next.id, "auto1");
        assert_eq!(queue.snapshot_auto().await.len(), 1);

        // Sans piste de départ ni file, rien à jouer.
        let queue = manager(vec![]);
        assert!(queue.next(None).await.is_none());
    }

    #[tokio::test]
    async fn refill_skips_recently_played_ids() {
        let queue = manager(vec![track("seen"), track("fresh")]);
        queue.record_played("seen").await;

        queue.refill(&track("seed")).await;
        let auto = queue.snapshot_auto().await;
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].id, "fresh");
    }

    #[tokio::test]
    async fn history_is_bounded_and_keeps_the_most_recent_ids() {
        let queue = manager(vec![]);
        for i in 0..(HISTORY_CAPACITY + 10) {
            queue.record_played(&format!("id{i}")).await;
        }

        let state = queue.inner.state.lock().await;
        assert_eq!(state.history.len(), HISTORY_CAPACITY);
        assert_eq!(state.history.front().unwrap(), "id10");
        assert_eq!(
            state.history.back().unwrap(),
            &format!("id{}", HISTORY_CAPACITY + 9)
        );
    }

    #[tokio::test]
    async fn add_emits_a_queueadd_event() {
        let hub = EventHub::new();
        let mut subscriber = hub.subscribe();
        let queue = QueueManager::new(FakeSource::new(vec![]), hub);

        queue.add(track("user1")).await;

        let frame = subscriber.next().await.unwrap();
        assert!(frame.starts_with("event: queueadd\n"));
        assert!(frame.contains("\"id\":\"user1\""));
    }

    #[test]
    fn pagination_slices_the_tail_of_short_last_pages() {
        let items: Vec<TrackRef> = (0..7).map(|i| track(&format!("t{i}"))).collect();

        let first = QueueManager::page(&items, 0);
        assert_eq!(
            first.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            ["t0", "t1", "t2", "t3", "t4"]
        );

        // Page incomplète : la fenêtre recule pour rester pleine.
        let second = QueueManager::page(&items, 1);
        assert_eq!(
            second.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            ["t2", "t3", "t4", "t5", "t6"]
        );

        // Au delà de la fin : fenêtre identique à la dernière page.
        let far = QueueManager::page(&items, 10);
        assert_eq!(far.len(), 5);

        assert!(QueueManager::page(&[], 0).is_empty());
    }
}
