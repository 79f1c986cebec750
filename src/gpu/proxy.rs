// src/gpu/proxy.rs
//! Abstract resource requests.
//!
//! A [`SurfaceProxy`] stands for a resource that will exist by the time GPU work runs. The
//! allocator decides which concrete [`ResourceRef`] backs it; lazy proxies produce their own
//! resource through a callback.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::gpu::desc::{ResourceDesc, ResourceKind};
use crate::gpu::provider::ResourceProvider;
use crate::key::UniqueKey;
use crate::resource::ResourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(u32);

static NEXT_PROXY_ID: AtomicU32 = AtomicU32::new(1);

impl ProxyId {
    fn next() -> Self {
        Self(NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyKind {
    /// Shape known up front; instantiated during assignment.
    Partial,
    /// Shape unknown until the callback runs; instantiated while planning.
    Full,
}

pub type LazyCallback = Box<dyn FnMut(&mut ResourceProvider) -> Option<ResourceRef> + Send>;

struct Lazy {
    kind: LazyKind,
    callback: Mutex<Option<LazyCallback>>,
}

pub struct SurfaceProxy {
    id: ProxyId,
    desc: ResourceDesc,
    budgeted: bool,
    unique_key: Option<UniqueKey>,
    read_only: bool,
    lazy: Option<Lazy>,
    target: Mutex<Option<ResourceRef>>,
}

impl SurfaceProxy {
    pub fn new(desc: ResourceDesc, budgeted: bool) -> Self {
        Self {
            id: ProxyId::next(),
            desc,
            budgeted,
            unique_key: None,
            read_only: false,
            lazy: None,
            target: Mutex::new(None),
        }
    }

    /// Proxy whose resource comes from `callback`.
    pub fn new_lazy(desc: ResourceDesc, budgeted: bool, kind: LazyKind, callback: LazyCallback) -> Self {
        Self {
            lazy: Some(Lazy {
                kind,
                callback: Mutex::new(Some(callback)),
            }),
            ..Self::new(desc, budgeted)
        }
    }

    /// Proxy already backed by `resource`.
    pub fn wrapped(desc: ResourceDesc, resource: ResourceRef) -> Self {
        let proxy = Self::new(desc, false);
        *proxy.target.lock() = Some(resource);
        proxy
    }

    pub fn with_unique_key(mut self, key: UniqueKey) -> Self {
        self.unique_key = Some(key).filter(UniqueKey::is_valid);
        self
    }

    /// Content is fixed; never recycled.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn is_budgeted(&self) -> bool {
        self.budgeted
    }

    pub fn unique_key(&self) -> Option<&UniqueKey> {
        self.unique_key.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_render_target(&self) -> bool {
        self.desc.kind == ResourceKind::RenderTarget
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy.is_some() && !self.is_instantiated()
    }

    pub fn is_fully_lazy(&self) -> bool {
        self.is_lazy() && self.lazy.as_ref().is_some_and(|l| l.kind == LazyKind::Full)
    }

    pub fn is_instantiated(&self) -> bool {
        self.target.lock().is_some()
    }

    /// The backing resource, if assigned.
    pub fn resource(&self) -> Option<ResourceRef> {
        self.target.lock().clone()
    }

    pub fn gpu_memory_size(&self) -> usize {
        match self.target.lock().as_ref() {
            Some(r) => r.gpu_memory_size(),
            None => self.desc.approx_size_bytes(),
        }
    }

    pub(crate) fn assign(&self, resource: ResourceRef) {
        let mut target = self.target.lock();
        debug_assert!(target.is_none(), "{:?} assigned twice", self.id);
        *target = Some(resource);
    }

    /// Take the lazy callback out for one run. `None` if it is already running or gone.
    pub(crate) fn take_lazy_callback(&self) -> Option<LazyCallback> {
        self.lazy.as_ref()?.callback.lock().take()
    }

    pub(crate) fn restore_lazy_callback(&self, callback: LazyCallback) {
        if let Some(lazy) = &self.lazy {
            *lazy.callback.lock() = Some(callback);
        }
    }
}

impl fmt::Debug for SurfaceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceProxy")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("budgeted", &self.budgeted)
            .field("lazy", &self.lazy.as_ref().map(|l| l.kind))
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}

/// A shareable handle on a proxy.
#[derive(Debug, Clone)]
pub struct SurfaceView {
    proxy: Arc<SurfaceProxy>,
}

impl SurfaceView {
    pub fn new(proxy: Arc<SurfaceProxy>) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &Arc<SurfaceProxy> {
        &self.proxy
    }

    /// Only this view keeps the proxy alive.
    pub fn is_uniquely_held(&self) -> bool {
        Arc::strong_count(&self.proxy) == 1
    }

    pub fn same_proxy(&self, other: &SurfaceView) -> bool {
        Arc::ptr_eq(&self.proxy, &other.proxy)
    }
}
