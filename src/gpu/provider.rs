// src/gpu/provider.rs
//! Creation front-end: reuse from the cache first, fall back to the backend.

use crate::cache::ResourceCache;
use crate::gpu::desc::ResourceDesc;
use crate::gpu::proxy::SurfaceProxy;
use crate::key::{ScratchKey, UniqueKey};
use crate::resource::{GpuObject, Resource, ResourceRef};

/// Creates backend objects. Implemented by real GPU backends and by test doubles.
pub trait GpuBackend: Send {
    fn create_object(&mut self, desc: &ResourceDesc) -> Option<Box<dyn GpuObject>>;

    /// Buffer initialised with `bytes`.
    fn create_buffer_with_data(&mut self, bytes: &[u8]) -> Option<Box<dyn GpuObject>>;

    /// Whether idle non-render-target textures may be handed out again as scratch.
    fn reuse_scratch_textures(&self) -> bool {
        true
    }
}

pub struct ResourceProvider {
    cache: ResourceCache,
    backend: Box<dyn GpuBackend>,
    abandoned: bool,
}

impl ResourceProvider {
    pub fn new(cache: ResourceCache, backend: Box<dyn GpuBackend>) -> Self {
        Self {
            cache,
            backend,
            abandoned: false,
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResourceCache {
        &mut self.cache
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Backend allows scratch reuse of plain textures, and the config does not forbid it.
    pub fn reuse_scratch_textures(&self) -> bool {
        self.backend.reuse_scratch_textures() && self.cache.config().reuse_scratch_textures
    }

    /// Scratch reuse first, then a new backend object. Approx-fit requests are rounded up to
    /// their size class before either.
    pub fn create_resource(&mut self, desc: &ResourceDesc, budgeted: bool) -> Option<ResourceRef> {
        if self.abandoned {
            return None;
        }
        let desc = &desc.backing();
        if let Some(key) = desc.scratch_key() {
            if let Some(existing) = self.cache.find_and_ref_scratch(&key) {
                if budgeted {
                    self.cache.make_budgeted(&existing);
                } else {
                    self.cache.make_unbudgeted(&existing);
                }
                return Some(existing);
            }
        }

        let Some(object) = self.backend.create_object(desc) else {
            log::warn!("backend could not create {:?}", desc);
            return None;
        };
        let resource = Resource::new(object);
        self.cache.register_budgeted(&resource, budgeted);
        Some(resource)
    }

    pub fn find_and_ref_scratch(&mut self, key: &ScratchKey) -> Option<ResourceRef> {
        if self.abandoned {
            return None;
        }
        self.cache.find_and_ref_scratch(key)
    }

    pub fn find_by_unique_key(&mut self, key: &UniqueKey) -> Option<ResourceRef> {
        if self.abandoned {
            return None;
        }
        self.cache.find_and_ref_unique(key)
    }

    pub fn assign_unique_key_to_resource(&mut self, key: &UniqueKey, resource: &Resource) {
        if self.abandoned || !key.is_valid() {
            return;
        }
        self.cache.set_unique_key(resource, key.clone());
    }

    /// Adopt an object whose memory is owned elsewhere.
    pub fn wrap_backend_object(
        &mut self,
        object: Box<dyn GpuObject>,
        cacheable: bool,
    ) -> Option<ResourceRef> {
        if self.abandoned {
            return None;
        }
        let resource = Resource::new(object);
        self.cache.register_wrapped(&resource, cacheable);
        Some(resource)
    }

    /// Buffer with fixed content shared through `key`; created on first request.
    pub fn find_or_make_static_buffer(&mut self, key: &UniqueKey, bytes: &[u8]) -> Option<ResourceRef> {
        if let Some(existing) = self.find_by_unique_key(key) {
            return Some(existing);
        }
        if self.abandoned {
            return None;
        }
        let Some(object) = self.backend.create_buffer_with_data(bytes) else {
            log::warn!("backend could not create static buffer {:?}", key.tag());
            return None;
        };
        let resource = Resource::new(object);
        self.cache.register_budgeted(&resource, true);
        self.cache.set_unique_key(&resource, key.clone());
        Some(resource)
    }

    /// Run a lazy proxy's callback and attach the result.
    pub fn instantiate_lazy(&mut self, proxy: &SurfaceProxy) -> bool {
        if proxy.is_instantiated() {
            return true;
        }
        if self.abandoned {
            return false;
        }
        let Some(mut callback) = proxy.take_lazy_callback() else {
            log::warn!("{:?} has no lazy callback to run", proxy.id());
            return false;
        };
        let result = callback(self);
        proxy.restore_lazy_callback(callback);

        let Some(resource) = result else {
            log::warn!("lazy instantiation of {:?} failed", proxy.id());
            return false;
        };
        if let Some(key) = proxy.unique_key() {
            if self.cache.unique_key(&resource).is_none() {
                self.assign_unique_key_to_resource(key, &resource);
            }
        }
        proxy.assign(resource);
        true
    }

    /// Back `proxy` with a resource: lazy callback, unique key lookup, or creation.
    pub fn instantiate_proxy(&mut self, proxy: &SurfaceProxy) -> bool {
        if proxy.is_instantiated() {
            return true;
        }
        if proxy.is_lazy() {
            return self.instantiate_lazy(proxy);
        }
        if let Some(key) = proxy.unique_key() {
            if let Some(existing) = self.find_by_unique_key(key) {
                proxy.assign(existing);
                return true;
            }
        }
        let Some(resource) = self.create_resource(proxy.desc(), proxy.is_budgeted()) else {
            return false;
        };
        if let Some(key) = proxy.unique_key() {
            self.assign_unique_key_to_resource(key, &resource);
        }
        proxy.assign(resource);
        true
    }

    /// Drop every backend object without freeing it; later creation fails.
    pub fn abandon(&mut self) {
        if self.abandoned {
            return;
        }
        self.abandoned = true;
        self.cache.abandon_all();
        log::debug!("resource provider abandoned");
    }
}

impl std::fmt::Debug for ResourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProvider")
            .field("cache", &self.cache)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}
