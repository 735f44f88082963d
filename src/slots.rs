use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fetcher::{Fetcher, NewsItem};
use crate::sources::FeedSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Loading,
    /// Already capped at the display limit
    Loaded(Vec<NewsItem>),
    Failed,
}

struct Slot {
    generation: u64,
    state: SlotState,
    task: Option<JoinHandle<()>>,
}

impl Slot {
    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Display state for every source on the page, one fetch task per source URL.
///
/// A task only writes back into the slot that spawned it: once a slot is
/// detached or restarted, the stale result is dropped.
pub struct SlotBoard {
    fetcher: Arc<Fetcher>,
    display_limit: usize,
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    next_generation: AtomicU64,
}

impl SlotBoard {
    pub fn new(fetcher: Arc<Fetcher>, display_limit: usize) -> Self {
        Self {
            fetcher,
            display_limit,
            slots: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Refetch every source; slots for anything not in `sources` are detached
    pub async fn refresh(&self, sources: &[FeedSource]) {
        let mut slots = self.slots.write().await;
        Self::retain_sources(&mut slots, sources);

        info!("Refreshing {} sources", sources.len());
        for source in sources {
            self.start(&mut slots, &source.url);
        }
    }

    /// Start fetches only for sources that have no slot yet
    pub async fn ensure(&self, sources: &[FeedSource]) {
        let mut slots = self.slots.write().await;
        Self::retain_sources(&mut slots, sources);

        for source in sources {
            if !slots.contains_key(&source.url) {
                self.start(&mut slots, &source.url);
            }
        }
    }

    pub async fn detach(&self, url: &str) {
        if let Some(slot) = self.slots.write().await.remove(url) {
            slot.abort();
            debug!("Detached slot for {}", url);
        }
    }

    /// `None` once the slot has been detached
    pub async fn slot(&self, url: &str) -> Option<SlotState> {
        self.slots.read().await.get(url).map(|slot| slot.state.clone())
    }

    pub async fn is_refreshing(&self) -> bool {
        self.slots
            .read()
            .await
            .values()
            .any(|slot| slot.state == SlotState::Loading)
    }

    fn retain_sources(slots: &mut HashMap<String, Slot>, sources: &[FeedSource]) {
        slots.retain(|url, slot| {
            let keep = sources.iter().any(|s| &s.url == url);
            if !keep {
                slot.abort();
            }
            keep
        });
    }

    // Caller holds the write lock, so the task cannot report before its slot exists
    fn start(&self, slots: &mut HashMap<String, Slot>, url: &str) {
        if let Some(previous) = slots.get(url) {
            previous.abort();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fetcher = self.fetcher.clone();
        let board = self.slots.clone();
        let limit = self.display_limit;
        let key = url.to_string();

        let task = tokio::spawn(async move {
            let mut items = fetcher.fetch(&key).await;
            let state = if items.is_empty() {
                warn!("No items loaded for {}", key);
                SlotState::Failed
            } else {
                items.truncate(limit);
                SlotState::Loaded(items)
            };

            Self::settle(&board, &key, generation, state).await;
        });

        slots.insert(
            url.to_string(),
            Slot {
                generation,
                state: SlotState::Loading,
                task: Some(task),
            },
        );
    }

    /// Store a finished fetch. Returns false when the slot has since been
    /// detached or restarted under a newer generation.
    async fn settle(
        slots: &RwLock<HashMap<String, Slot>>,
        url: &str,
        generation: u64,
        state: SlotState,
    ) -> bool {
        let mut slots = slots.write().await;
        match slots.get_mut(url) {
            Some(slot) if slot.generation == generation => {
                slot.state = state;
                slot.task = None;
                true
            }
            _ => {
                debug!("Discarding stale result for {}", url);
                false
            }
        }
    }
}
