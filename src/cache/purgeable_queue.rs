// src/cache/purgeable_queue.rs
//! Purgeable resources in the order they became idle, oldest first.
//!
//! Access tokens only ever grow and an entry leaves the queue before it is re-tokened, so
//! token order is insertion order. An unbounded `LruCache` gives that order plus `O(1)`
//! removal by id.

use lru::LruCache;

use crate::resource::ResourceId;

pub struct PurgeableQueue {
    // id -> access token; LRU end is the oldest.
    entries: LruCache<ResourceId, u64>,
    last_token: Option<u64>,
}

impl Default for PurgeableQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PurgeableQueue {
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            last_token: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains(&id)
    }

    /// Least recently used entry.
    pub fn peek(&self) -> Option<ResourceId> {
        self.entries.peek_lru().map(|(&id, _)| id)
    }

    pub fn insert(&mut self, token: u64, id: ResourceId) {
        debug_assert!(!self.contains(id), "{id:?} already purgeable");
        debug_assert!(
            self.last_token.map_or(true, |last| token > last),
            "access tokens must increase"
        );
        self.last_token = Some(token);
        self.entries.push(id, token);
    }

    pub fn pop(&mut self) -> Option<ResourceId> {
        self.entries.pop_lru().map(|(id, _)| id)
    }

    /// Remove `id` wherever it sits. Returns whether it was queued.
    pub fn remove(&mut self, id: ResourceId) -> bool {
        self.entries.pop(&id).is_some()
    }

    /// Ids ordered oldest first.
    pub fn sorted(&self) -> Vec<ResourceId> {
        self.entries.iter().rev().map(|(&id, _)| id).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for PurgeableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeableQueue")
            .field("len", &self.entries.len())
            .field("oldest", &self.peek())
            .finish()
    }
}
