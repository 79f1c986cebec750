// src/resource.rs
//! Base lifecycle object shared by every GPU allocation.
//!
//! A [`Resource`] is always held through an `Arc`. Holders own it through [`ResourceRef`]
//! (the main count) and [`PendingUsageRef`] (outstanding GPU work). Dropping the last handle of
//! either kind never frees anything: it notifies the [`RefObserver`] that the cache installed at
//! registration, and the cache decides whether to keep, recycle or release the object.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};

use crate::key::ScratchKey;

// ============================================================================
// 1. IDENTITY & STATE
// ============================================================================

/// Process-wide resource identity. Never reused; `0` is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl ResourceId {
    pub const INVALID: ResourceId = ResourceId(0);

    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetedType {
    /// Counts against the budget and can be purged by the cache.
    Budgeted,
    /// Outside the budget, but kept alive while it holds a unique key.
    UnbudgetedCacheable,
    /// Outside the budget and released as soon as it is idle.
    UnbudgetedUncacheable,
}

/// Which count reached zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastRemovedRef {
    MainRef,
    PendingUsage,
}

/// Installed by the cache at registration; told about every count that drops to zero.
/// Called on whichever thread dropped the handle.
pub trait RefObserver: Send + Sync {
    fn ref_count_reached_zero(&self, id: ResourceId, which: LastRemovedRef);
}

// ============================================================================
// 2. GPU OBJECT HOOKS
// ============================================================================

/// The backend object a [`Resource`] wraps.
pub trait GpuObject: Send + Sync + fmt::Debug {
    /// Size in bytes charged against the cache budget.
    fn gpu_memory_size(&self) -> usize;

    /// Short name for logs.
    fn resource_type(&self) -> &'static str {
        "resource"
    }

    /// Key under which idle instances may be reused. `None` opts out of scratch reuse.
    fn compute_scratch_key(&self) -> Option<ScratchKey> {
        None
    }

    fn is_render_target(&self) -> bool {
        false
    }

    /// Free the backend object. The device is still alive.
    fn on_release(&mut self) {}

    /// Forget the backend object without touching the device (device lost / context gone).
    fn on_abandon(&mut self) {}

    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// 3. RESOURCE
// ============================================================================

pub struct Resource {
    id: ResourceId,
    main_refs: AtomicU32,
    pending_usages: AtomicU32,
    destroyed: AtomicBool,
    gpu_memory_size: OnceLock<usize>,
    observer: OnceLock<Arc<dyn RefObserver>>,
    object: Mutex<Option<Box<dyn GpuObject>>>,
}

impl Resource {
    /// Wrap a freshly created backend object. The returned handle is the creator's reference.
    pub fn new(object: Box<dyn GpuObject>) -> ResourceRef {
        let resource = Arc::new(Self {
            id: ResourceId::next(),
            main_refs: AtomicU32::new(1),
            pending_usages: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
            gpu_memory_size: OnceLock::new(),
            observer: OnceLock::new(),
            object: Mutex::new(Some(object)),
        });
        log::trace!("resource {:?} created", resource.id);
        ResourceRef { inner: resource }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn main_ref_count(&self) -> u32 {
        self.main_refs.load(Ordering::Acquire)
    }

    #[inline]
    pub fn pending_usage_count(&self) -> u32 {
        self.pending_usages.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_any_refs(&self) -> bool {
        self.main_ref_count() > 0 || self.pending_usage_count() > 0
    }

    /// True once the cache released or abandoned the backend object.
    #[inline]
    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Budget charge in bytes, computed on first call and cached. `0` after destruction.
    pub fn gpu_memory_size(&self) -> usize {
        *self.gpu_memory_size.get_or_init(|| {
            self.object
                .lock()
                .as_ref()
                .map_or(0, |o| o.gpu_memory_size())
        })
    }

    /// Lock the backend object. `None` after release/abandon.
    pub fn object(&self) -> MutexGuard<'_, Option<Box<dyn GpuObject>>> {
        self.object.lock()
    }

    /// Run `f` against the backend object downcast to `T`.
    pub fn with_object<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.object.lock();
        guard.as_ref()?.as_any().downcast_ref::<T>().map(f)
    }

    pub(crate) fn compute_scratch_key(&self) -> Option<ScratchKey> {
        self.object
            .lock()
            .as_ref()
            .and_then(|o| o.compute_scratch_key())
            .filter(ScratchKey::is_valid)
    }

    pub(crate) fn is_render_target(&self) -> bool {
        self.object
            .lock()
            .as_ref()
            .is_some_and(|o| o.is_render_target())
    }

    /// Installs the cache's observer. Returns `false` if the resource was already registered.
    pub(crate) fn install_observer(&self, observer: Arc<dyn RefObserver>) -> bool {
        // Size is fixed from registration onwards.
        let _ = self.gpu_memory_size();
        self.observer.set(observer).is_ok()
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.observer.get().is_some()
    }

    /// Free the backend object through its `on_release` hook.
    pub(crate) fn release(&self) {
        self.destroy(false);
    }

    /// Drop the backend object through its `on_abandon` hook.
    pub(crate) fn abandon(&self) {
        self.destroy(true);
    }

    fn destroy(&self, abandon: bool) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut object) = self.object.lock().take() {
            if abandon {
                object.on_abandon();
            } else {
                object.on_release();
            }
            log::trace!(
                "resource {:?} ({}) {}",
                self.id,
                object.resource_type(),
                if abandon { "abandoned" } else { "released" }
            );
        }
    }

    fn notify_zero(&self, which: LastRemovedRef) {
        match self.observer.get() {
            Some(observer) => observer.ref_count_reached_zero(self.id, which),
            None => log::trace!("unregistered resource {:?} idle ({which:?})", self.id),
        }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        // Never registered, or the cache went away first.
        if let Some(mut object) = self.object.get_mut().take() {
            object.on_release();
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("main_refs", &self.main_ref_count())
            .field("pending_usages", &self.pending_usage_count())
            .field("destroyed", &self.was_destroyed())
            .finish()
    }
}

// ============================================================================
// 4. HANDLES
// ============================================================================

/// Main reference. Clone to add a holder; drop to remove one.
pub struct ResourceRef {
    inner: Arc<Resource>,
}

impl ResourceRef {
    /// Take a new main reference on a resource the caller can already reach.
    pub(crate) fn from_arc(resource: &Arc<Resource>) -> Self {
        resource.main_refs.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(resource),
        }
    }

    pub(crate) fn arc(&self) -> &Arc<Resource> {
        &self.inner
    }

    /// Record outstanding GPU work that uses this resource.
    pub fn add_pending_usage(&self) -> PendingUsageRef {
        self.inner.pending_usages.fetch_add(1, Ordering::Relaxed);
        PendingUsageRef {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn ptr_eq(a: &ResourceRef, b: &ResourceRef) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl Clone for ResourceRef {
    fn clone(&self) -> Self {
        Self::from_arc(&self.inner)
    }
}

impl Drop for ResourceRef {
    fn drop(&mut self) {
        if self.inner.main_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify_zero(LastRemovedRef::MainRef);
        }
    }
}

impl Deref for ResourceRef {
    type Target = Resource;
    fn deref(&self) -> &Resource {
        &self.inner
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

/// Outstanding GPU usage. Dropped when the submission that used the resource retires.
pub struct PendingUsageRef {
    inner: Arc<Resource>,
}

impl PendingUsageRef {
    pub fn resource(&self) -> &Resource {
        &self.inner
    }
}

impl Drop for PendingUsageRef {
    fn drop(&mut self) {
        if self.inner.pending_usages.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify_zero(LastRemovedRef::PendingUsage);
        }
    }
}

impl fmt::Debug for PendingUsageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingUsageRef").field(&self.inner.id).finish()
    }
}
