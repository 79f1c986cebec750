// src/cache/resource_cache.rs
//! Central registry of live GPU resources.
//!
//! The cache indexes resources two ways: a scratch multimap (any idle resource of a given
//! shape) and a unique hash (the one resource known by a name). Idle budgeted resources wait in
//! an LRU min-heap and are evicted when the byte budget is exceeded.
//!
//! The cache is driven from a single thread. Other threads talk to it through the return
//! queue (handles dropped anywhere) and the two message-bus inboxes; all three are drained at
//! the start of every public `&mut self` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::cache::purgeable_queue::PurgeableQueue;
use crate::cache::thread_safe_cache::{PressureSource, ThreadSafeCache};
use crate::config::CacheConfig;
use crate::key::{ScratchKey, UniqueKey};
use crate::message_bus::{ContextId, Inbox, UniqueKeyInvalidatedMessage, UnrefMessage};
use crate::multimap::MultiMap;
use crate::resource::{
    BudgetedType, LastRemovedRef, RefObserver, Resource, ResourceId, ResourceRef,
};
use crate::single_owner::SingleOwner;

// -----------------------------------------------------------------------------
// Return queue
// -----------------------------------------------------------------------------

struct ReturnQueue {
    sender: Sender<(ResourceId, LastRemovedRef)>,
}

impl RefObserver for ReturnQueue {
    fn ref_count_reached_zero(&self, id: ResourceId, which: LastRemovedRef) {
        // Fails only once the cache is gone; the resource was released with it.
        let _ = self.sender.send((id, which));
    }
}

// -----------------------------------------------------------------------------
// Entries
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Index into `nonpurgeable`.
    Nonpurgeable(usize),
    Purgeable,
}

struct CacheEntry {
    resource: Arc<Resource>,
    budgeted: BudgetedType,
    wrapped: bool,
    scratch_key: Option<ScratchKey>,
    unique_key: Option<UniqueKey>,
    size: usize,
    timestamp: u64,
    last_access: Instant,
    flush_count_when_purgeable: u64,
    slot: Slot,
}

impl CacheEntry {
    fn usable_as_scratch(&self) -> bool {
        self.scratch_key.is_some()
            && self.unique_key.is_none()
            && self.budgeted == BudgetedType::Budgeted
    }

    fn is_purgeable(&self) -> bool {
        !self.resource.has_any_refs()
            && !(self.budgeted == BudgetedType::UnbudgetedCacheable && self.unique_key.is_some())
    }
}

enum IdleAction {
    Keep,
    MakeBudgeted,
    Release,
}

// -----------------------------------------------------------------------------
// Statistics
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    pub bytes: usize,
    pub budgeted_count: usize,
    pub budgeted_bytes: usize,
    pub purgeable_count: usize,
    pub purgeable_bytes: usize,
    pub scratch_hits: u64,
    pub scratch_misses: u64,
    pub unique_hits: u64,
    pub unique_misses: u64,
    pub purged: u64,
}

// -----------------------------------------------------------------------------
// Cache
// -----------------------------------------------------------------------------

pub struct ResourceCache {
    config: CacheConfig,
    context_id: ContextId,
    single_owner: Arc<SingleOwner>,

    entries: HashMap<ResourceId, CacheEntry>,
    nonpurgeable: Vec<ResourceId>,
    purgeable: PurgeableQueue,
    scratch_map: MultiMap<ScratchKey, ResourceId>,
    unique_hash: HashMap<UniqueKey, ResourceId>,

    bytes: usize,
    budgeted_bytes: usize,
    purgeable_bytes: usize,
    budgeted_count: usize,
    timestamp: u64,
    flush_count: u64,
    stats: CacheStats,

    observer: Arc<dyn RefObserver>,
    returns: Receiver<(ResourceId, LastRemovedRef)>,
    unref_inbox: Inbox<UnrefMessage>,
    invalidation_inbox: Inbox<UniqueKeyInvalidatedMessage>,
    thread_safe_cache: Option<Arc<ThreadSafeCache>>,
}

impl ResourceCache {
    pub fn new(context_id: ContextId, single_owner: Arc<SingleOwner>, config: CacheConfig) -> Self {
        let (sender, returns) = unbounded();
        log::debug!(
            "[{}] resource cache created for {:?}, budget {} bytes",
            config.label,
            context_id,
            config.max_bytes
        );
        Self {
            config,
            context_id,
            single_owner,
            entries: HashMap::new(),
            nonpurgeable: Vec::new(),
            purgeable: PurgeableQueue::new(),
            scratch_map: MultiMap::new(),
            unique_hash: HashMap::new(),
            bytes: 0,
            budgeted_bytes: 0,
            purgeable_bytes: 0,
            budgeted_count: 0,
            timestamp: 0,
            flush_count: 0,
            stats: CacheStats::default(),
            observer: Arc::new(ReturnQueue { sender }),
            returns,
            unref_inbox: Inbox::new(context_id),
            invalidation_inbox: Inbox::new(context_id),
            thread_safe_cache: None,
        }
    }

    /// Cache with its own context id and owner guard.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::new(ContextId::next(), Arc::new(SingleOwner::new()), config)
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn single_owner(&self) -> &Arc<SingleOwner> {
        &self.single_owner
    }

    /// Attach the thread-safe cache that shares this cache's budget.
    pub fn set_thread_safe_cache(&mut self, cache: Arc<ThreadSafeCache>) {
        self.thread_safe_cache = Some(cache);
    }

    pub fn thread_safe_cache(&self) -> Option<&Arc<ThreadSafeCache>> {
        self.thread_safe_cache.as_ref()
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register a resource created by this context. Budgeted resources count against the
    /// budget; unbudgeted ones are released as soon as they are idle unless they can be
    /// recycled as scratch.
    pub fn register_budgeted(&mut self, resource: &ResourceRef, budgeted: bool) {
        let budgeted_type = if budgeted {
            BudgetedType::Budgeted
        } else {
            BudgetedType::UnbudgetedUncacheable
        };
        let scratch_key = resource.compute_scratch_key();
        self.insert(resource, budgeted_type, false, scratch_key);
    }

    /// Register a resource backed by externally owned memory. Never budgeted, never scratch.
    pub fn register_wrapped(&mut self, resource: &ResourceRef, cacheable: bool) {
        let budgeted_type = if cacheable {
            BudgetedType::UnbudgetedCacheable
        } else {
            BudgetedType::UnbudgetedUncacheable
        };
        self.insert(resource, budgeted_type, true, None);
    }

    fn insert(
        &mut self,
        resource: &ResourceRef,
        budgeted: BudgetedType,
        wrapped: bool,
        scratch_key: Option<ScratchKey>,
    ) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();

        assert!(!resource.was_destroyed(), "registering a destroyed resource");
        assert!(
            resource.install_observer(Arc::clone(&self.observer)),
            "resource {:?} registered twice",
            resource.id()
        );

        let id = resource.id();
        let size = resource.gpu_memory_size();
        let timestamp = self.next_timestamp();
        let entry = CacheEntry {
            resource: Arc::clone(resource.arc()),
            budgeted,
            wrapped,
            scratch_key,
            unique_key: None,
            size,
            timestamp,
            last_access: Instant::now(),
            flush_count_when_purgeable: 0,
            slot: Slot::Nonpurgeable(self.nonpurgeable.len()),
        };

        self.nonpurgeable.push(id);
        self.bytes += size;
        if budgeted == BudgetedType::Budgeted {
            self.budgeted_bytes += size;
            self.budgeted_count += 1;
        }
        if entry.usable_as_scratch() {
            if let Some(key) = &entry.scratch_key {
                self.scratch_map.insert(key.clone(), id);
            }
        }
        self.entries.insert(id, entry);
        log::trace!("[{}] inserted {:?} ({} bytes, {:?})", self.config.label, id, size, budgeted);

        self.purge_as_needed_locked();
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Find an idle resource with `key`, ref it and mark it most recently used.
    ///
    /// Found resources stay in the scratch map; later lookups skip them while they are held.
    pub fn find_and_ref_scratch(&mut self, key: &ScratchKey) -> Option<ResourceRef> {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        let entries = &self.entries;
        let found = self
            .scratch_map
            .find_with(key, |id| {
                entries
                    .get(id)
                    .is_some_and(|e| e.resource.main_ref_count() == 0)
            })
            .copied();

        match found {
            Some(id) => {
                self.stats.scratch_hits += 1;
                self.ref_and_make_mru(id)
            }
            None => {
                self.stats.scratch_misses += 1;
                None
            }
        }
    }

    pub fn find_and_ref_unique(&mut self, key: &UniqueKey) -> Option<ResourceRef> {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        match self.unique_hash.get(key).copied() {
            Some(id) => {
                self.stats.unique_hits += 1;
                self.ref_and_make_mru(id)
            }
            None => {
                self.stats.unique_misses += 1;
                None
            }
        }
    }

    fn ref_and_make_mru(&mut self, id: ResourceId) -> Option<ResourceRef> {
        self.make_nonpurgeable(id);
        let timestamp = self.next_timestamp();
        let entry = self.entries.get_mut(&id)?;
        entry.timestamp = timestamp;
        entry.last_access = Instant::now();
        Some(ResourceRef::from_arc(&entry.resource))
    }

    // ------------------------------------------------------------------------
    // Keys and budget status
    // ------------------------------------------------------------------------

    /// Give `resource` the unique `key`, taking it away from whoever held it.
    ///
    /// No-op for resources that are neither budgeted nor wrapped. An invalid key removes the
    /// resource's current key.
    pub fn set_unique_key(&mut self, resource: &Resource, key: UniqueKey) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        let id = resource.id();
        if !key.is_valid() {
            self.strip_unique_key(id);
            self.handle_idle(id);
            return;
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            log::debug!("set_unique_key on {id:?} which is not in the cache");
            return;
        };
        if entry.budgeted != BudgetedType::Budgeted && !entry.wrapped {
            return;
        }
        if entry.unique_key.as_ref() == Some(&key) {
            // Same key; only the custom data can differ.
            entry.unique_key = Some(key.clone());
            self.unique_hash.insert(key, id);
            return;
        }

        if let Some(old) = self.unique_hash.get(&key).copied() {
            let release_old = self
                .entries
                .get(&old)
                .is_some_and(|e| e.scratch_key.is_none() && e.is_purgeable());
            if release_old {
                self.release_entry(old);
            } else {
                self.strip_unique_key(old);
                self.handle_idle(old);
            }
        }

        let mut previous = None;
        self.update_entry(id, |e| previous = e.unique_key.replace(key.clone()));
        if let Some(previous) = previous {
            self.unique_hash.remove(&previous);
        }
        log::trace!("[{}] {:?} now holds {:?}", self.config.label, id, key.tag());
        self.unique_hash.insert(key, id);
    }

    pub fn remove_unique_key(&mut self, resource: &Resource) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        let id = resource.id();
        self.strip_unique_key(id);
        self.handle_idle(id);
    }

    /// Permanently take `resource` out of scratch reuse.
    pub fn remove_scratch_key(&mut self, resource: &Resource) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        let id = resource.id();
        self.update_entry(id, |e| e.scratch_key = None);
        self.handle_idle(id);
    }

    /// Move an unbudgeted, non-wrapped resource into the budget. Returns whether it changed.
    pub fn make_budgeted(&mut self, resource: &Resource) -> bool {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        let id = resource.id();
        let allowed = self
            .entries
            .get(&id)
            .is_some_and(|e| e.budgeted == BudgetedType::UnbudgetedUncacheable && !e.wrapped);
        if !allowed {
            return false;
        }
        self.change_budgeted(id, true);
        self.purge_as_needed_locked();
        true
    }

    /// Take a held, budgeted resource out of the budget. Refused while it holds a unique key,
    /// and for idle resources, which stay in the cache's budget until someone refs them again.
    pub fn make_unbudgeted(&mut self, resource: &Resource) -> bool {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        let id = resource.id();
        let allowed = self.entries.get(&id).is_some_and(|e| {
            e.budgeted == BudgetedType::Budgeted && e.unique_key.is_none() && !e.is_purgeable()
        });
        if !allowed {
            return false;
        }
        self.change_budgeted(id, false);
        true
    }

    fn change_budgeted(&mut self, id: ResourceId, budgeted: bool) {
        let mut size = 0;
        self.update_entry(id, |e| {
            size = e.size;
            e.budgeted = if budgeted {
                BudgetedType::Budgeted
            } else {
                BudgetedType::UnbudgetedUncacheable
            };
        });
        if budgeted {
            self.budgeted_bytes += size;
            self.budgeted_count += 1;
        } else {
            self.budgeted_bytes -= size;
            self.budgeted_count -= 1;
        }
    }

    fn strip_unique_key(&mut self, id: ResourceId) {
        let mut removed = None;
        self.update_entry(id, |e| removed = e.unique_key.take());
        if let Some(key) = removed {
            self.unique_hash.remove(&key);
        }
    }

    /// Mutate an entry and keep its scratch-map membership in sync.
    fn update_entry<F>(&mut self, id: ResourceId, f: F)
    where
        F: FnOnce(&mut CacheEntry),
    {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let was_scratch = entry.usable_as_scratch();
        let old_key = entry.scratch_key.clone();
        f(entry);
        let is_scratch = entry.usable_as_scratch();

        if was_scratch && !is_scratch {
            if let Some(key) = &old_key {
                self.scratch_map.remove(key, &id);
            }
        } else if !was_scratch && is_scratch {
            if let Some(key) = &entry.scratch_key {
                self.scratch_map.insert(key.clone(), id);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Idle handling
    // ------------------------------------------------------------------------

    /// Decide what happens to a resource whose counts may both be zero.
    fn handle_idle(&mut self, id: ResourceId) {
        let over_budget = self.over_budget();
        let Some(entry) = self.entries.get(&id) else {
            log::trace!("[{}] stale notification for {:?}", self.config.label, id);
            return;
        };
        if !entry.is_purgeable() {
            return;
        }

        let action = match entry.budgeted {
            BudgetedType::Budgeted => {
                let has_key = entry.scratch_key.is_some() || entry.unique_key.is_some();
                if has_key && !over_budget {
                    IdleAction::Keep
                } else {
                    IdleAction::Release
                }
            }
            _ if !entry.wrapped
                && entry.scratch_key.is_some()
                && self.would_fit(entry.size) =>
            {
                IdleAction::MakeBudgeted
            }
            _ => IdleAction::Release,
        };

        match action {
            IdleAction::Keep => self.make_purgeable(id),
            IdleAction::MakeBudgeted => {
                self.change_budgeted(id, true);
                self.make_purgeable(id);
            }
            IdleAction::Release => {
                self.release_entry(id);
            }
        }
    }

    fn make_purgeable(&mut self, id: ResourceId) {
        let Some(Slot::Nonpurgeable(index)) = self.entries.get(&id).map(|e| e.slot) else {
            return;
        };
        self.remove_from_nonpurgeable(index);

        let timestamp = self.next_timestamp();
        let flush_count = self.flush_count;
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.slot = Slot::Purgeable;
        entry.timestamp = timestamp;
        entry.last_access = Instant::now();
        entry.flush_count_when_purgeable = flush_count;
        self.purgeable_bytes += entry.size;
        self.purgeable.insert(timestamp, id);
    }

    fn make_nonpurgeable(&mut self, id: ResourceId) {
        let index = self.nonpurgeable.len();
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.slot != Slot::Purgeable {
            return;
        }
        entry.slot = Slot::Nonpurgeable(index);
        self.purgeable_bytes -= entry.size;
        self.purgeable.remove(id);
        self.nonpurgeable.push(id);
    }

    fn remove_from_nonpurgeable(&mut self, index: usize) {
        self.nonpurgeable.swap_remove(index);
        if let Some(&moved) = self.nonpurgeable.get(index) {
            if let Some(entry) = self.entries.get_mut(&moved) {
                entry.slot = Slot::Nonpurgeable(index);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Release / abandon
    // ------------------------------------------------------------------------

    fn remove_entry(&mut self, id: ResourceId) -> Option<CacheEntry> {
        let entry = self.entries.remove(&id)?;
        match entry.slot {
            Slot::Purgeable => {
                self.purgeable.remove(id);
                self.purgeable_bytes -= entry.size;
            }
            Slot::Nonpurgeable(index) => self.remove_from_nonpurgeable(index),
        }
        if entry.usable_as_scratch() {
            if let Some(key) = &entry.scratch_key {
                self.scratch_map.remove(key, &id);
            }
        }
        if let Some(key) = &entry.unique_key {
            self.unique_hash.remove(key);
        }
        self.bytes -= entry.size;
        if entry.budgeted == BudgetedType::Budgeted {
            self.budgeted_bytes -= entry.size;
            self.budgeted_count -= 1;
        }
        Some(entry)
    }

    fn release_entry(&mut self, id: ResourceId) -> bool {
        match self.remove_entry(id) {
            Some(entry) => {
                entry.resource.release();
                self.stats.purged += 1;
                true
            }
            None => false,
        }
    }

    /// Free a resource now, whoever still holds it. Outstanding handles see it as destroyed.
    pub fn release_resource(&mut self, resource: &Resource) -> bool {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.release_entry(resource.id())
    }

    /// Forget a resource without touching the device.
    pub fn abandon_resource(&mut self, resource: &Resource) -> bool {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        match self.remove_entry(resource.id()) {
            Some(entry) => {
                entry.resource.abandon();
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) {
        self.teardown(false);
    }

    /// Device lost or context abandoned: drop every backend object without freeing it.
    pub fn abandon_all(&mut self) {
        self.teardown(true);
    }

    fn teardown(&mut self, abandon: bool) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();

        if let Some(tsc) = self.thread_safe_cache.clone() {
            tsc.drop_all_refs();
        }
        self.process_messages_locked();

        let ids: Vec<ResourceId> = self.entries.keys().copied().collect();
        let count = ids.len();
        for id in ids {
            if let Some(entry) = self.remove_entry(id) {
                if abandon {
                    entry.resource.abandon();
                } else {
                    entry.resource.release();
                }
            }
        }
        debug_assert_eq!(self.bytes, 0);
        debug_assert_eq!(self.budgeted_bytes, 0);
        debug_assert!(self.scratch_map.is_empty());
        debug_assert!(self.unique_hash.is_empty());
        log::debug!(
            "[{}] {} {} resources",
            self.config.label,
            if abandon { "abandoned" } else { "released" },
            count
        );
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Drain the unref and invalidation inboxes and the return queue.
    pub fn process_messages(&mut self) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();
    }

    fn process_messages_locked(&mut self) {
        // Dropping each message drops its reference; the return queue picks it up below.
        drop(self.unref_inbox.poll());

        for msg in self.invalidation_inbox.poll() {
            if msg.in_thread_safe_cache {
                if let Some(tsc) = &self.thread_safe_cache {
                    tsc.remove(&msg.key);
                }
            }
            if let Some(id) = self.unique_hash.get(&msg.key).copied() {
                log::trace!("[{}] invalidated key on {:?}", self.config.label, id);
                self.strip_unique_key(id);
                self.handle_idle(id);
            }
        }

        self.process_returns();
    }

    fn process_returns(&mut self) {
        while let Ok((id, which)) = self.returns.try_recv() {
            log::trace!("[{}] {:?} reached zero ({:?})", self.config.label, id, which);
            self.handle_idle(id);
        }
    }

    // ------------------------------------------------------------------------
    // Budget & purging
    // ------------------------------------------------------------------------

    #[inline]
    pub fn over_budget(&self) -> bool {
        self.budgeted_bytes > self.config.max_bytes
    }

    #[inline]
    pub fn would_fit(&self, bytes: usize) -> bool {
        self.budgeted_bytes + bytes <= self.config.max_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.config.max_bytes
    }

    pub fn set_limit(&mut self, max_bytes: usize) {
        self.config.max_bytes = max_bytes;
        self.purge_as_needed();
    }

    /// Release purgeable resources that sat unused for more than `flushes` flushes.
    /// `0` disables the schedule.
    pub fn set_purge_schedule(&mut self, flushes: u32) {
        self.config.purge_flush_threshold = flushes;
    }

    pub fn notify_flush_occurred(&mut self) {
        self.flush_count += 1;
        self.purge_as_needed();
    }

    /// Evict least recently used purgeable resources until within budget.
    pub fn purge_as_needed(&mut self) {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();
        self.purge_as_needed_locked();
    }

    fn purge_as_needed_locked(&mut self) {
        let threshold = u64::from(self.config.purge_flush_threshold);
        if threshold > 0 && self.flush_count > threshold {
            let oldest_allowed = self.flush_count - threshold;
            while let Some(id) = self.purgeable.peek() {
                let stale = self
                    .entries
                    .get(&id)
                    .is_some_and(|e| e.flush_count_when_purgeable < oldest_allowed);
                if !stale {
                    break;
                }
                self.release_entry(id);
            }
        }

        let before = self.budgeted_bytes;
        self.purge_over_budget();

        if self.over_budget() {
            if let Some(tsc) = self.thread_safe_cache.clone() {
                let pressure: &mut dyn PressureSource = &mut *self;
                tsc.drop_unique_refs(Some(pressure));
                self.process_returns();
                self.purge_over_budget();
            }
        }

        if before != self.budgeted_bytes {
            log::debug!(
                "[{}] purged {} bytes, {} of {} budgeted bytes in use",
                self.config.label,
                before - self.budgeted_bytes,
                self.budgeted_bytes,
                self.config.max_bytes
            );
        }
        if self.over_budget() {
            log::warn!(
                "[{}] still over budget: {} > {} bytes",
                self.config.label,
                self.budgeted_bytes,
                self.config.max_bytes
            );
        }
    }

    fn purge_over_budget(&mut self) {
        while self.over_budget() {
            let Some(id) = self.purgeable.peek() else {
                break;
            };
            self.release_entry(id);
        }
    }

    /// Release purgeable resources, oldest first.
    ///
    /// With `bytes_to_purge` the walk stops once that many bytes were freed. With
    /// `scratch_only` uniquely keyed resources are kept. Returns the bytes freed.
    pub fn purge_unlocked(&mut self, bytes_to_purge: Option<usize>, scratch_only: bool) -> usize {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        if bytes_to_purge.is_none() && !scratch_only {
            if let Some(tsc) = self.thread_safe_cache.clone() {
                tsc.drop_unique_refs(None);
                self.process_returns();
            }
        }

        let mut freed = 0;
        for id in self.purgeable.sorted() {
            if bytes_to_purge.is_some_and(|target| freed >= target) {
                break;
            }
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if scratch_only && entry.unique_key.is_some() {
                continue;
            }
            freed += entry.size;
            self.release_entry(id);
        }
        log::debug!("[{}] purge_unlocked freed {} bytes", self.config.label, freed);
        freed
    }

    /// Release purgeable resources last used before `since`. Returns the bytes freed.
    pub fn purge_not_used_since(&mut self, since: Instant, scratch_only: bool) -> usize {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        if !scratch_only {
            if let Some(tsc) = self.thread_safe_cache.clone() {
                tsc.drop_unique_refs_older_than(since);
                self.process_returns();
            }
        }

        let mut freed = 0;
        for id in self.purgeable.sorted() {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if entry.last_access >= since {
                break;
            }
            if scratch_only && entry.unique_key.is_some() {
                continue;
            }
            freed += entry.size;
            self.release_entry(id);
        }
        freed
    }

    /// Make room for `needed` more budgeted bytes, releasing LRU purgeable resources.
    ///
    /// Nothing is released unless the whole request can be satisfied.
    pub fn purge_to_make_headroom(&mut self, needed: usize) -> bool {
        let owner = Arc::clone(&self.single_owner);
        let _guard = owner.enter();
        self.process_messages_locked();

        if needed > self.config.max_bytes {
            return false;
        }
        if self.would_fit(needed) {
            return true;
        }

        let sorted = self.purgeable.sorted();
        let mut projected = self.budgeted_bytes;
        let mut purge_count = None;
        for (i, id) in sorted.iter().enumerate() {
            if let Some(entry) = self.entries.get(id) {
                if entry.budgeted == BudgetedType::Budgeted {
                    projected -= entry.size;
                }
            }
            if projected + needed <= self.config.max_bytes {
                purge_count = Some(i + 1);
                break;
            }
        }
        let Some(purge_count) = purge_count else {
            return false;
        };
        for id in &sorted[..purge_count] {
            self.release_entry(*id);
        }
        true
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    fn next_timestamp(&mut self) -> u64 {
        let t = self.timestamp;
        self.timestamp += 1;
        t
    }

    pub fn contains(&self, resource: &Resource) -> bool {
        self.entries.contains_key(&resource.id())
    }

    /// Purgeability as of the last pump.
    pub fn is_purgeable(&self, resource: &Resource) -> bool {
        self.entries
            .get(&resource.id())
            .is_some_and(CacheEntry::is_purgeable)
    }

    pub fn budgeted_type(&self, resource: &Resource) -> Option<BudgetedType> {
        self.entries.get(&resource.id()).map(|e| e.budgeted)
    }

    pub fn is_wrapped(&self, resource: &Resource) -> bool {
        self.entries.get(&resource.id()).is_some_and(|e| e.wrapped)
    }

    pub fn unique_key(&self, resource: &Resource) -> Option<UniqueKey> {
        self.entries.get(&resource.id())?.unique_key.clone()
    }

    pub fn scratch_key(&self, resource: &Resource) -> Option<ScratchKey> {
        self.entries.get(&resource.id())?.scratch_key.clone()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn budgeted_bytes(&self) -> usize {
        self.budgeted_bytes
    }

    pub fn budgeted_count(&self) -> usize {
        self.budgeted_count
    }

    pub fn purgeable_bytes(&self) -> usize {
        self.purgeable_bytes
    }

    pub fn purgeable_count(&self) -> usize {
        self.purgeable.len()
    }

    pub fn nonpurgeable_count(&self) -> usize {
        self.nonpurgeable.len()
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Resources indexed under `key` in the scratch map, held or idle.
    pub fn scratch_count_for_key(&self, key: &ScratchKey) -> usize {
        self.scratch_map.count_for_key(key)
    }

    pub fn count_unique_keys_with_tag(&self, tag: &str) -> usize {
        self.unique_hash
            .keys()
            .filter(|k| k.tag() == Some(tag))
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            count: self.entries.len(),
            bytes: self.bytes,
            budgeted_count: self.budgeted_count,
            budgeted_bytes: self.budgeted_bytes,
            purgeable_count: self.purgeable.len(),
            purgeable_bytes: self.purgeable_bytes,
            ..self.stats
        }
    }

    /// Check every incremental counter against a full scan.
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        let mut bytes = 0;
        let mut budgeted_bytes = 0;
        let mut budgeted_count = 0;
        let mut purgeable_bytes = 0;
        let mut scratch_entries = 0;

        for (id, e) in &self.entries {
            bytes += e.size;
            if e.budgeted == BudgetedType::Budgeted {
                budgeted_bytes += e.size;
                budgeted_count += 1;
            }
            match e.slot {
                Slot::Purgeable => {
                    purgeable_bytes += e.size;
                    assert!(self.purgeable.contains(*id));
                    assert!(e.is_purgeable(), "{id:?} queued but not purgeable");
                }
                Slot::Nonpurgeable(i) => assert_eq!(self.nonpurgeable[i], *id),
            }
            if e.usable_as_scratch() {
                scratch_entries += 1;
                let key = e.scratch_key.as_ref().expect("scratch entry without key");
                assert!(self.scratch_map.contains(key, id));
            }
            if let Some(key) = &e.unique_key {
                assert_eq!(self.unique_hash.get(key), Some(id));
            }
        }
        assert_eq!(bytes, self.bytes);
        assert_eq!(budgeted_bytes, self.budgeted_bytes);
        assert_eq!(budgeted_count, self.budgeted_count);
        assert_eq!(purgeable_bytes, self.purgeable_bytes);
        assert_eq!(scratch_entries, self.scratch_map.len());
        assert_eq!(
            self.unique_hash.len(),
            self.entries.values().filter(|e| e.unique_key.is_some()).count()
        );
        assert_eq!(self.purgeable.len() + self.nonpurgeable.len(), self.entries.len());
    }
}

impl PressureSource for ResourceCache {
    fn is_over_budget(&mut self) -> bool {
        self.process_returns();
        self.over_budget()
    }
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("label", &self.config.label)
            .field("context_id", &self.context_id)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyDomain;
    use crate::testing::{init_logger, scratch_key, Counters, MockObject};
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn cache(max_bytes: usize) -> ResourceCache {
        init_logger();
        ResourceCache::with_config(CacheConfig::default().with_max_bytes(max_bytes))
    }

    fn scratch_resource(
        cache: &mut ResourceCache,
        counters: &Arc<Counters>,
        size: usize,
        shape: u32,
    ) -> ResourceRef {
        let r = Resource::new(MockObject::scratch(counters, size, &scratch_key(shape)));
        cache.register_budgeted(&r, true);
        r
    }

    fn keyless_resource(cache: &mut ResourceCache, counters: &Arc<Counters>, size: usize) -> ResourceRef {
        let r = Resource::new(MockObject::boxed(counters, size));
        cache.register_budgeted(&r, true);
        r
    }

    fn unique_key(n: u32, tag: &'static str) -> UniqueKey {
        static DOMAIN: std::sync::OnceLock<KeyDomain> = std::sync::OnceLock::new();
        let mut b = UniqueKey::builder(*DOMAIN.get_or_init(KeyDomain::generate), 1, Some(tag));
        b[0] = n;
        b.finish()
    }

    #[test]
    fn purgeable_only_when_both_counts_are_zero() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = scratch_resource(&mut cache, &counters, 64, 1);
        let res = Arc::clone(r.arc());
        assert!(!cache.is_purgeable(&res));

        let pending = r.add_pending_usage();
        drop(r);
        cache.process_messages();
        assert!(!cache.is_purgeable(&res));
        assert_eq!(cache.purgeable_count(), 0);

        drop(pending);
        cache.process_messages();
        assert!(cache.is_purgeable(&res));
        assert_eq!(cache.purgeable_count(), 1);
        assert_eq!(cache.purgeable_bytes(), 64);
        assert_eq!(counters.released(), 0);
        cache.validate();
    }

    #[test]
    fn idle_keyless_budgeted_resource_is_released() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = keyless_resource(&mut cache, &counters, 32);
        drop(r);
        cache.process_messages();
        assert_eq!(cache.count(), 0);
        assert_eq!(counters.released(), 1);
        cache.validate();
    }

    #[test]
    fn unbudgeted_cacheable_with_unique_key_stays_alive() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = Resource::new(MockObject::boxed(&counters, 100));
        cache.register_wrapped(&r, true);
        let key = unique_key(1, "wrapped");
        cache.set_unique_key(&r, key.clone());
        drop(r);
        cache.process_messages();

        assert_eq!(cache.count(), 1);
        assert_eq!(cache.purgeable_count(), 0);
        assert_eq!(cache.budgeted_bytes(), 0);
        // Not purgeable, so even a full purge keeps it.
        cache.purge_unlocked(None, false);
        assert_eq!(cache.count(), 1);

        let found = cache.find_and_ref_unique(&key).expect("kept alive by its key");
        assert!(!cache.is_purgeable(&found));
        cache.remove_unique_key(&found);
        drop(found);
        cache.process_messages();
        assert_eq!(cache.count(), 0);
        assert_eq!(counters.released(), 1);
    }

    #[test]
    fn unique_key_moves_to_new_holder() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let a = scratch_resource(&mut cache, &counters, 16, 1);
        let b = scratch_resource(&mut cache, &counters, 16, 1);
        let key = unique_key(2, "shared");

        cache.set_unique_key(&a, key.clone());
        assert_eq!(cache.unique_key(&a), Some(key.clone()));
        assert_eq!(cache.scratch_count_for_key(&scratch_key(1)), 1);

        cache.set_unique_key(&b, key.clone());
        assert_eq!(cache.unique_key(&a), None);
        assert_eq!(cache.unique_key(&b), Some(key.clone()));
        // A went back to being plain scratch.
        assert_eq!(cache.scratch_count_for_key(&scratch_key(1)), 1);
        assert!(cache.contains(&a));

        let found = cache.find_and_ref_unique(&key).unwrap();
        assert!(ResourceRef::ptr_eq(&found, &b));
        cache.validate();
    }

    #[test]
    fn reassigning_key_releases_idle_keyless_holder() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let key = unique_key(3, "lut");
        let a = keyless_resource(&mut cache, &counters, 16);
        cache.set_unique_key(&a, key.clone());
        drop(a);
        cache.process_messages();
        assert_eq!(cache.purgeable_count(), 1);

        let b = keyless_resource(&mut cache, &counters, 16);
        cache.set_unique_key(&b, key.clone());
        assert_eq!(counters.released(), 1);
        assert_eq!(cache.count(), 1);
        assert!(ResourceRef::ptr_eq(&cache.find_and_ref_unique(&key).unwrap(), &b));
        cache.validate();
    }

    #[test]
    fn unique_key_ignored_for_unbudgeted_resources() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = Resource::new(MockObject::boxed(&counters, 8));
        cache.register_budgeted(&r, false);
        cache.set_unique_key(&r, unique_key(4, "ignored"));
        assert_eq!(cache.unique_key(&r), None);
        assert_eq!(cache.count_unique_keys_with_tag("ignored"), 0);
    }

    #[test]
    fn n_scratch_finds_return_each_resource_once() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let originals: Vec<ResourceRef> = (0..4)
            .map(|_| scratch_resource(&mut cache, &counters, 10, 7))
            .collect();
        let ids: HashSet<ResourceId> = originals.iter().map(|r| r.id()).collect();
        drop(originals);

        let found: Vec<ResourceRef> = (0..4)
            .map(|_| cache.find_and_ref_scratch(&scratch_key(7)).expect("idle scratch"))
            .collect();
        let found_ids: HashSet<ResourceId> = found.iter().map(|r| r.id()).collect();
        assert_eq!(found_ids, ids);
        assert!(cache.find_and_ref_scratch(&scratch_key(7)).is_none());
        assert!(found.iter().all(|r| r.main_ref_count() == 1));

        let stats = cache.stats();
        assert_eq!(stats.scratch_hits, 4);
        assert_eq!(stats.scratch_misses, 1);
        cache.validate();
    }

    #[test]
    fn removing_scratch_key_then_dropping_destroys_immediately() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let key = scratch_key(11);
        drop(scratch_resource(&mut cache, &counters, 24, 11));

        let r = cache.find_and_ref_scratch(&key).unwrap();
        assert_eq!(r.main_ref_count(), 1);
        cache.remove_scratch_key(&r);
        assert_eq!(cache.scratch_count_for_key(&key), 0);

        drop(r);
        cache.process_messages();
        assert_eq!(cache.count(), 0);
        assert_eq!(counters.released(), 1);
        assert_eq!(cache.scratch_count_for_key(&key), 0);
        cache.validate();
    }

    #[test]
    fn budget_is_respected_when_possible() {
        let counters = Counters::new();
        let mut cache = cache(100);
        let held = scratch_resource(&mut cache, &counters, 40, 1);
        let idle: Vec<_> = (0..3)
            .map(|_| scratch_resource(&mut cache, &counters, 40, 1))
            .collect();
        assert_eq!(cache.budgeted_bytes(), 160);
        assert!(cache.over_budget());

        drop(idle);
        cache.purge_as_needed();
        assert!(cache.budgeted_bytes() <= 100);
        assert!(cache.contains(&held));
        cache.validate();

        // Nothing purgeable left to free: stays over budget rather than touching `held`.
        cache.set_limit(10);
        assert!(cache.contains(&held));
        assert_eq!(cache.purgeable_count(), 0);
        assert_eq!(cache.budgeted_bytes(), 40);
        cache.validate();
    }

    #[test]
    fn lru_order_decides_eviction() {
        let counters = Counters::new();
        let mut cache = cache(1000);
        let a = scratch_resource(&mut cache, &counters, 10, 1);
        let b = scratch_resource(&mut cache, &counters, 10, 2);
        let (a_id, b_id) = (a.id(), b.id());
        drop(a);
        drop(b);
        cache.process_messages();

        // Touch A so B becomes the LRU.
        drop(cache.find_and_ref_scratch(&scratch_key(1)).unwrap());
        cache.process_messages();

        cache.set_limit(10);
        assert_eq!(cache.count(), 1);
        let left = cache.find_and_ref_scratch(&scratch_key(1)).unwrap();
        assert_eq!(left.id(), a_id);
        assert_ne!(left.id(), b_id);
    }

    #[test]
    fn headroom_is_all_or_nothing() {
        let counters = Counters::new();
        let mut cache = cache(100);
        let held = scratch_resource(&mut cache, &counters, 30, 1);
        drop(scratch_resource(&mut cache, &counters, 30, 2));
        drop(scratch_resource(&mut cache, &counters, 30, 3));
        cache.process_messages();
        assert_eq!(cache.budgeted_bytes(), 90);

        assert!(cache.purge_to_make_headroom(10));
        assert_eq!(cache.purgeable_count(), 2);

        assert!(!cache.purge_to_make_headroom(200));
        assert!(!cache.purge_to_make_headroom(80));
        assert_eq!(cache.purgeable_count(), 2, "failed request must not purge");

        assert!(cache.purge_to_make_headroom(40));
        assert_eq!(cache.purgeable_count(), 1);
        assert!(cache.would_fit(40));
        assert!(cache.contains(&held));
        cache.validate();
    }

    #[test]
    fn purge_unlocked_scratch_only_keeps_unique() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let uniq = scratch_resource(&mut cache, &counters, 8, 1);
        cache.set_unique_key(&uniq, unique_key(5, "keep"));
        drop(uniq);
        drop(scratch_resource(&mut cache, &counters, 8, 2));
        drop(scratch_resource(&mut cache, &counters, 8, 3));
        cache.process_messages();
        assert_eq!(cache.purgeable_count(), 3);

        assert_eq!(cache.purge_unlocked(None, true), 16);
        assert_eq!(cache.purgeable_count(), 1);
        assert_eq!(cache.count_unique_keys_with_tag("keep"), 1);

        assert_eq!(cache.purge_unlocked(None, false), 8);
        assert_eq!(cache.count(), 0);
        cache.validate();
    }

    #[test]
    fn purge_unlocked_stops_after_target() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        for shape in 0..4 {
            drop(scratch_resource(&mut cache, &counters, 10, shape));
        }
        cache.process_messages();
        assert_eq!(cache.purge_unlocked(Some(15), false), 20);
        assert_eq!(cache.purgeable_count(), 2);
    }

    #[test]
    fn purge_not_used_since_cutoff() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        drop(scratch_resource(&mut cache, &counters, 8, 1));
        cache.process_messages();
        thread::sleep(Duration::from_millis(5));
        let cutoff = Instant::now();
        thread::sleep(Duration::from_millis(5));
        drop(scratch_resource(&mut cache, &counters, 8, 2));
        cache.process_messages();

        assert_eq!(cache.purge_not_used_since(cutoff, false), 8);
        assert_eq!(cache.count(), 1);
        assert!(cache.find_and_ref_scratch(&scratch_key(2)).is_some());
    }

    #[test]
    fn flush_schedule_releases_unused_resources() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        cache.set_purge_schedule(1);
        drop(scratch_resource(&mut cache, &counters, 8, 1));
        cache.process_messages();

        cache.notify_flush_occurred();
        assert_eq!(cache.count(), 1);
        drop(scratch_resource(&mut cache, &counters, 8, 2));
        cache.process_messages();

        cache.notify_flush_occurred();
        assert_eq!(cache.count(), 1, "older resource purged, newer one kept");
        assert!(cache.find_and_ref_scratch(&scratch_key(2)).is_some());
        assert_eq!(cache.flush_count(), 2);
    }

    #[test]
    fn unbudgeted_scratch_becomes_budgeted_when_it_fits() {
        let counters = Counters::new();
        let mut cache = cache(100);
        let fits = Resource::new(MockObject::scratch(&counters, 50, &scratch_key(1)));
        cache.register_budgeted(&fits, false);
        let too_big = Resource::new(MockObject::scratch(&counters, 80, &scratch_key(1)));
        cache.register_budgeted(&too_big, false);
        let (fits_res, big_res) = (Arc::clone(fits.arc()), Arc::clone(too_big.arc()));
        assert_eq!(cache.budgeted_bytes(), 0);
        assert_eq!(cache.scratch_count_for_key(&scratch_key(1)), 0);

        drop(fits);
        cache.process_messages();
        assert_eq!(cache.budgeted_type(&fits_res), Some(BudgetedType::Budgeted));
        assert!(cache.is_purgeable(&fits_res));
        assert_eq!(cache.scratch_count_for_key(&scratch_key(1)), 1);

        drop(too_big);
        cache.process_messages();
        assert!(!cache.contains(&big_res));
        assert!(big_res.was_destroyed());
        cache.validate();
    }

    #[test]
    fn budget_transitions() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = scratch_resource(&mut cache, &counters, 12, 1);
        assert!(cache.make_unbudgeted(&r));
        assert_eq!(cache.budgeted_bytes(), 0);
        assert_eq!(cache.scratch_count_for_key(&scratch_key(1)), 0);
        assert!(cache.make_budgeted(&r));
        assert_eq!(cache.budgeted_bytes(), 12);
        assert!(!cache.make_budgeted(&r));

        cache.set_unique_key(&r, unique_key(6, "pinned"));
        assert!(!cache.make_unbudgeted(&r), "uniquely keyed stays budgeted");

        let wrapped = Resource::new(MockObject::boxed(&counters, 4));
        cache.register_wrapped(&wrapped, false);
        assert!(!cache.make_budgeted(&wrapped));
        assert!(cache.is_wrapped(&wrapped));
        cache.validate();
    }

    #[test]
    fn idle_scratch_cannot_be_unbudgeted() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = scratch_resource(&mut cache, &counters, 16, 2);
        let res = Arc::clone(r.arc());
        drop(r);
        cache.process_messages();
        assert!(cache.is_purgeable(&res));

        assert!(!cache.make_unbudgeted(&res));
        assert_eq!(cache.budgeted_type(&res), Some(BudgetedType::Budgeted));
        assert_eq!(cache.budgeted_bytes(), 16);

        // Once handed out again it may leave the budget, and stays out while held.
        let again = cache.find_and_ref_scratch(&scratch_key(2)).unwrap();
        assert!(cache.make_unbudgeted(&again));
        assert_eq!(cache.budgeted_type(&again), Some(BudgetedType::UnbudgetedUncacheable));
        assert_eq!(cache.budgeted_bytes(), 0);
        cache.validate();
    }

    #[test]
    fn unref_message_from_another_thread() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = scratch_resource(&mut cache, &counters, 8, 1);
        let res = Arc::clone(r.arc());
        let ctx = cache.context_id();

        thread::spawn(move || UnrefMessage::post(r, ctx)).join().unwrap();
        assert!(!cache.is_purgeable(&res));
        cache.process_messages();
        assert!(cache.is_purgeable(&res));
    }

    #[test]
    fn invalidation_message_drops_key() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let key = unique_key(7, "stale");
        let r = keyless_resource(&mut cache, &counters, 8);
        cache.set_unique_key(&r, key.clone());
        drop(r);
        cache.process_messages();
        assert_eq!(cache.count(), 1);

        UniqueKeyInvalidatedMessage::post(key.clone(), cache.context_id(), false);
        cache.process_messages();
        assert_eq!(cache.count(), 0);
        assert!(cache.find_and_ref_unique(&key).is_none());
        assert_eq!(counters.released(), 1);
    }

    #[test]
    fn stale_return_after_release_is_ignored() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let r = scratch_resource(&mut cache, &counters, 8, 1);
        assert!(cache.release_resource(&r));
        assert!(r.was_destroyed());
        assert!(!cache.release_resource(&r));
        drop(r);
        cache.process_messages();
        assert_eq!(cache.count(), 0);
        assert_eq!(counters.released(), 1);
    }

    #[test]
    fn teardown_releases_or_abandons_everything() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let held = scratch_resource(&mut cache, &counters, 8, 1);
        drop(scratch_resource(&mut cache, &counters, 8, 2));
        cache.abandon_all();
        assert_eq!(counters.abandoned(), 2);
        assert!(held.was_destroyed());

        let mut cache = self::cache(1 << 20);
        let _held = scratch_resource(&mut cache, &counters, 8, 1);
        drop(cache);
        assert_eq!(counters.released(), 1);
        assert_eq!(counters.live(), 0);
    }

    #[test]
    fn tag_counting() {
        let counters = Counters::new();
        let mut cache = cache(1 << 20);
        let a = keyless_resource(&mut cache, &counters, 4);
        let b = keyless_resource(&mut cache, &counters, 4);
        let c = keyless_resource(&mut cache, &counters, 4);
        cache.set_unique_key(&a, unique_key(10, "glyphs"));
        cache.set_unique_key(&b, unique_key(11, "glyphs"));
        cache.set_unique_key(&c, unique_key(12, "paths"));
        assert_eq!(cache.count_unique_keys_with_tag("glyphs"), 2);
        assert_eq!(cache.count_unique_keys_with_tag("paths"), 1);
        assert_eq!(cache.count_unique_keys_with_tag("none"), 0);
    }
}
