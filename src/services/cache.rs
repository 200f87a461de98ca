use dashmap::DashMap;
use tracing::debug;

use crate::dto::progress::{ProgressSnapshot, TopicProgressDetail};

/// Read keys cached by the progress service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Progress across every topic.
    Overview,
    /// One topic's detail.
    Topic(String),
}

#[derive(Debug, Clone)]
enum CachedValue {
    Overview(ProgressSnapshot),
    Topic(TopicProgressDetail),
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<CachedValue>,
    fresh: bool,
    epoch: u64,
}

/// Last fetched value per read key, with explicit invalidation.
///
/// Each key carries an epoch bumped by [`ReadCache::invalidate`]. A fetch that started before an
/// invalidation stores its value as stale, so the next read refetches.
#[derive(Debug, Default)]
pub struct ReadCache {
    slots: DashMap<CacheKey, Slot>,
}

impl ReadCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch of `key`; pass it back to the matching `store_*` call.
    pub fn epoch(&self, key: &CacheKey) -> u64 {
        self.slots.get(key).map(|slot| slot.epoch).unwrap_or_default()
    }

    /// Fresh overview, if any.
    pub fn overview(&self) -> Option<ProgressSnapshot> {
        match self.fresh(&CacheKey::Overview)? {
            CachedValue::Overview(snapshot) => Some(snapshot),
            CachedValue::Topic(_) => None,
        }
    }

    /// Fresh detail for `topic`, if any.
    pub fn topic(&self, topic: &str) -> Option<TopicProgressDetail> {
        match self.fresh(&CacheKey::Topic(topic.to_string()))? {
            CachedValue::Topic(detail) => Some(detail),
            CachedValue::Overview(_) => None,
        }
    }

    /// Store an overview fetched at `epoch`.
    pub fn store_overview(&self, epoch: u64, snapshot: ProgressSnapshot) {
        self.store(CacheKey::Overview, epoch, CachedValue::Overview(snapshot));
    }

    /// Store a topic detail fetched at `epoch`.
    pub fn store_topic(&self, topic: &str, epoch: u64, detail: TopicProgressDetail) {
        self.store(
            CacheKey::Topic(topic.to_string()),
            epoch,
            CachedValue::Topic(detail),
        );
    }

    /// Mark `key` stale so its next read goes to the server.
    pub fn invalidate(&self, key: &CacheKey) {
        let mut slot = self.slots.entry(key.clone()).or_default();
        slot.epoch += 1;
        slot.fresh = false;
        debug!(key = ?key, "cache entry invalidated");
    }

    /// Mark every key stale.
    pub fn invalidate_all(&self) {
        for mut slot in self.slots.iter_mut() {
            slot.epoch += 1;
            slot.fresh = false;
        }
    }

    fn fresh(&self, key: &CacheKey) -> Option<CachedValue> {
        self.slots
            .get(key)
            .filter(|slot| slot.fresh)
            .and_then(|slot| slot.value.clone())
    }

    fn store(&self, key: CacheKey, epoch: u64, value: CachedValue) {
        let mut slot = self.slots.entry(key).or_default();
        slot.fresh = slot.epoch == epoch;
        slot.value = Some(value);
    }
}
