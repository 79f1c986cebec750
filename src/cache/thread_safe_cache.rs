// src/cache/thread_safe_cache.rs
//! Cross-thread cache of derived artifacts.
//!
//! Several recording threads may compute the same view or vertex block at once. Each one
//! looks it up here, builds it outside the lock on a miss, and races to install it with
//! [`ThreadSafeCache::add`] or [`ThreadSafeCache::find_or_add`]. The first install wins; the
//! losers get the winner back and simply drop their own work.
//!
//! Every operation takes the lock for its whole body and keeps that body short: one hash
//! lookup plus an MRU splice. Anything that may drop a GPU reference happens after unlocking.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;

use crate::gpu::desc::ResourceDesc;
use crate::gpu::proxy::{LazyKind, SurfaceProxy, SurfaceView};
use crate::key::{CustomData, UniqueKey};
use crate::resource::ResourceRef;

/// Something that can say whether eviction should continue.
pub trait PressureSource {
    fn is_over_budget(&mut self) -> bool;
}

/// Decides whether `challenger` should replace `incumbent` when both describe vertex data
/// for the same key. Both keys carry their custom data.
pub type IsNewerBetter = fn(incumbent: &UniqueKey, challenger: &UniqueKey) -> bool;

// -----------------------------------------------------------------------------
// Vertex data
// -----------------------------------------------------------------------------

enum VertexStorage {
    Cpu(Vec<u8>),
    Gpu(ResourceRef),
}

/// A block of vertices that starts on the CPU and can later move into a GPU buffer.
pub struct VertexData {
    num_vertices: usize,
    vertex_size: usize,
    storage: Mutex<VertexStorage>,
}

impl VertexData {
    pub fn from_slice<T: bytemuck::Pod>(vertices: &[T]) -> Arc<Self> {
        Arc::new(Self {
            num_vertices: vertices.len(),
            vertex_size: std::mem::size_of::<T>(),
            storage: Mutex::new(VertexStorage::Cpu(bytemuck::cast_slice(vertices).to_vec())),
        })
    }

    pub fn from_buffer(buffer: ResourceRef, num_vertices: usize, vertex_size: usize) -> Arc<Self> {
        Arc::new(Self {
            num_vertices,
            vertex_size,
            storage: Mutex::new(VertexStorage::Gpu(buffer)),
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn vertex_size(&self) -> usize {
        self.vertex_size
    }

    /// Size of the vertex block in bytes.
    pub fn size(&self) -> usize {
        self.num_vertices * self.vertex_size
    }

    /// Run `f` over the CPU copy. `None` once the data lives in a GPU buffer.
    pub fn with_vertices<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        match &*self.storage.lock() {
            VertexStorage::Cpu(bytes) => Some(f(bytes)),
            VertexStorage::Gpu(_) => None,
        }
    }

    pub fn gpu_buffer(&self) -> Option<ResourceRef> {
        match &*self.storage.lock() {
            VertexStorage::Gpu(buffer) => Some(buffer.clone()),
            VertexStorage::Cpu(_) => None,
        }
    }

    /// Move the block into `buffer`; the CPU copy is freed.
    pub fn set_gpu_buffer(&self, buffer: ResourceRef) {
        let old = std::mem::replace(&mut *self.storage.lock(), VertexStorage::Gpu(buffer));
        drop(old);
    }
}

impl fmt::Debug for VertexData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexData")
            .field("num_vertices", &self.num_vertices)
            .field("vertex_size", &self.vertex_size)
            .field("on_gpu", &self.gpu_buffer().is_some())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Trampoline
// -----------------------------------------------------------------------------

/// Placeholder handed out with a lazy view; a producer later fills in the real proxy.
#[derive(Default)]
pub struct Trampoline {
    proxy: Mutex<Option<Arc<SurfaceProxy>>>,
}

impl Trampoline {
    pub fn set_proxy(&self, proxy: Arc<SurfaceProxy>) {
        *self.proxy.lock() = Some(proxy);
    }

    pub fn proxy(&self) -> Option<Arc<SurfaceProxy>> {
        self.proxy.lock().clone()
    }

    pub fn is_filled(&self) -> bool {
        self.proxy.lock().is_some()
    }

    fn resource(&self) -> Option<ResourceRef> {
        self.proxy.lock().as_ref().and_then(|p| p.resource())
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("proxy", &self.proxy.lock().as_ref().map(|p| p.id()))
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Entries
// -----------------------------------------------------------------------------

enum Value {
    View(SurfaceView),
    Vertices(Arc<VertexData>),
}

impl Value {
    /// Nothing outside the cache holds the artifact.
    fn uniquely_held(&self) -> bool {
        match self {
            Value::View(view) => view.is_uniquely_held(),
            Value::Vertices(data) => Arc::strong_count(data) == 1,
        }
    }
}

struct Entry {
    // The map key compares by blob only; this copy carries the current custom data.
    key: UniqueKey,
    value: Value,
    last_access: Instant,
}

impl Entry {
    fn view_with_data(&self) -> Option<(SurfaceView, Option<CustomData>)> {
        match &self.value {
            Value::View(view) => Some((view.clone(), self.key.ref_custom_data())),
            Value::Vertices(_) => None,
        }
    }

    fn verts_with_data(&self) -> Option<(Arc<VertexData>, Option<CustomData>)> {
        match &self.value {
            Value::Vertices(data) => Some((Arc::clone(data), self.key.ref_custom_data())),
            Value::View(_) => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Cache
// -----------------------------------------------------------------------------

pub struct ThreadSafeCache {
    entries: Mutex<LruCache<UniqueKey, Entry>>,
}

impl Default for ThreadSafeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSafeCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.entries.lock().len()
    }

    /// Rough footprint of the map and its keys.
    pub fn approx_bytes_used_for_hash(&self) -> usize {
        let entries = self.entries.lock();
        let per_entry = std::mem::size_of::<(UniqueKey, Entry)>() + 2 * std::mem::size_of::<usize>();
        entries
            .iter()
            .map(|(key, _)| per_entry + key.size())
            .sum()
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    pub fn find(&self, key: &UniqueKey) -> Option<SurfaceView> {
        self.find_with_data(key).map(|(view, _)| view)
    }

    pub fn find_with_data(&self, key: &UniqueKey) -> Option<(SurfaceView, Option<CustomData>)> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_access = Instant::now();
        entry.view_with_data()
    }

    /// Install `view` under `key` unless something is already there; returns the winner.
    pub fn add(&self, key: &UniqueKey, view: SurfaceView) -> SurfaceView {
        self.add_with_data(key, view).0
    }

    pub fn add_with_data(
        &self,
        key: &UniqueKey,
        view: SurfaceView,
    ) -> (SurfaceView, Option<CustomData>) {
        let mut entries = self.entries.lock();
        Self::internal_add(&mut entries, key, view)
    }

    /// Return the existing view, or install `view` if there is none.
    pub fn find_or_add(&self, key: &UniqueKey, view: SurfaceView) -> SurfaceView {
        self.find_or_add_with_data(key, view).0
    }

    pub fn find_or_add_with_data(
        &self,
        key: &UniqueKey,
        view: SurfaceView,
    ) -> (SurfaceView, Option<CustomData>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.last_access = Instant::now();
            if let Some(found) = entry.view_with_data() {
                return found;
            }
        }
        Self::internal_add(&mut entries, key, view)
    }

    fn internal_add(
        entries: &mut LruCache<UniqueKey, Entry>,
        key: &UniqueKey,
        view: SurfaceView,
    ) -> (SurfaceView, Option<CustomData>) {
        debug_assert!(key.is_valid());
        if let Some(entry) = entries.get_mut(key) {
            entry.last_access = Instant::now();
            return match entry.view_with_data() {
                Some(existing) => existing,
                None => {
                    log::warn!("key {:?} already holds vertex data, view not cached", key.tag());
                    (view, key.ref_custom_data())
                }
            };
        }
        let data = key.ref_custom_data();
        entries.put(
            key.clone(),
            Entry {
                key: key.clone(),
                value: Value::View(view.clone()),
                last_access: Instant::now(),
            },
        );
        (view, data)
    }

    // ------------------------------------------------------------------------
    // Vertices
    // ------------------------------------------------------------------------

    pub fn find_verts_with_data(
        &self,
        key: &UniqueKey,
    ) -> Option<(Arc<VertexData>, Option<CustomData>)> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_access = Instant::now();
        entry.verts_with_data()
    }

    /// Install `data` under `key`. An incumbent is replaced only when `is_newer_better` says
    /// the challenger's key data wins. Returns whatever is stored afterwards.
    pub fn add_verts_with_data(
        &self,
        key: &UniqueKey,
        data: Arc<VertexData>,
        is_newer_better: IsNewerBetter,
    ) -> (Arc<VertexData>, Option<CustomData>) {
        debug_assert!(key.is_valid());
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            let custom = key.ref_custom_data();
            entries.put(
                key.clone(),
                Entry {
                    key: key.clone(),
                    value: Value::Vertices(Arc::clone(&data)),
                    last_access: Instant::now(),
                },
            );
            return (data, custom);
        };
        entry.last_access = Instant::now();
        let incumbent = match &entry.value {
            Value::Vertices(incumbent) => Arc::clone(incumbent),
            Value::View(_) => {
                log::warn!("key {:?} already holds a view, vertices not cached", key.tag());
                return (data, key.ref_custom_data());
            }
        };
        if !is_newer_better(&entry.key, key) {
            return (incumbent, entry.key.ref_custom_data());
        }
        entry.key = key.clone();
        let replaced = std::mem::replace(&mut entry.value, Value::Vertices(Arc::clone(&data)));
        drop(entries);
        // Loser dropped outside the lock.
        drop(replaced);
        drop(incumbent);
        (data, key.ref_custom_data())
    }

    // ------------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------------

    pub fn remove(&self, key: &UniqueKey) -> bool {
        let removed = self.entries.lock().pop(key);
        removed.is_some()
    }

    /// Forget every entry.
    pub fn drop_all_refs(&self) {
        let drained = std::mem::replace(&mut *self.entries.lock(), LruCache::unbounded());
        if !drained.is_empty() {
            log::debug!("thread-safe cache dropped {} entries", drained.len());
        }
    }

    /// Walk least to most recently used, dropping entries nobody else holds. With a pressure
    /// source the walk stops as soon as it reports the budget is met.
    pub fn drop_unique_refs(&self, mut pressure: Option<&mut dyn PressureSource>) {
        let candidates: Vec<UniqueKey> = {
            let entries = self.entries.lock();
            entries.iter().rev().map(|(k, _)| k.clone()).collect()
        };
        let mut dropped = 0usize;
        for key in candidates {
            if let Some(source) = pressure.as_deref_mut() {
                if !source.is_over_budget() {
                    break;
                }
            }
            let removed = {
                let mut entries = self.entries.lock();
                let unique = entries.peek(&key).is_some_and(|e| e.value.uniquely_held());
                if unique {
                    entries.pop(&key)
                } else {
                    None
                }
            };
            if removed.is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::debug!("thread-safe cache dropped {dropped} unreferenced entries");
        }
    }

    /// Drop unreferenced entries last used before `purge_time`.
    pub fn drop_unique_refs_older_than(&self, purge_time: Instant) {
        let removed: Vec<Entry> = {
            let mut entries = self.entries.lock();
            let stale: Vec<UniqueKey> = entries
                .iter()
                .rev()
                .take_while(|(_, e)| e.last_access < purge_time)
                .filter(|(_, e)| e.value.uniquely_held())
                .map(|(k, _)| k.clone())
                .collect();
            stale.iter().filter_map(|k| entries.pop(k)).collect()
        };
        if !removed.is_empty() {
            log::debug!("thread-safe cache dropped {} stale entries", removed.len());
        }
    }

    // ------------------------------------------------------------------------
    // Lazy views
    // ------------------------------------------------------------------------

    /// A view whose proxy resolves to whatever the returned trampoline is later filled with.
    pub fn create_lazy_view(desc: ResourceDesc) -> (SurfaceView, Arc<Trampoline>) {
        let trampoline = Arc::new(Trampoline::default());
        let source = Arc::clone(&trampoline);
        let proxy = SurfaceProxy::new_lazy(
            desc,
            true,
            LazyKind::Partial,
            Box::new(move |_provider| {
                let resource = source.resource();
                if resource.is_none() {
                    log::warn!("trampoline read before a producer filled it");
                }
                resource
            }),
        );
        (SurfaceView::new(Arc::new(proxy)), trampoline)
    }
}

impl fmt::Debug for ThreadSafeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeCache")
            .field("entries", &self.num_entries())
            .finish()
    }
}
