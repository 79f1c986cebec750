// src/lib.rs
//! GPU resource lifetime and recycling.
//!
//! Resources are registered with a per-context [`ResourceCache`], which tracks them by scratch
//! key (interchangeable by shape) and unique key (one named resource), keeps idle ones in an
//! LRU queue and evicts against a byte budget. [`ResourceAllocator`] plans which concrete
//! resource backs each abstract request of a frame, and [`ThreadSafeCache`] lets recording
//! threads race to publish shared derived artifacts.
//!
//! ```no_run
//! use gpu_resource_cache::{CacheConfig, ResourceCache};
//!
//! let mut cache = ResourceCache::with_config(CacheConfig::default().with_max_bytes(64 << 20));
//! cache.notify_flush_occurred();
//! ```

// -------------------------------
// Dependency note
// -------------------------------
// lru < 0.16.3 has an IterMut soundness issue. Cargo.toml pins 0.16.3 and the thread-safe
// cache only walks entries with `iter()`.
// -------------------------------

pub mod allocator;
pub mod cache;
pub mod config;
pub mod error;
pub mod gpu;
pub mod key;
pub mod message_bus;
pub mod multimap;
pub mod resource;
pub mod single_owner;

#[cfg(test)]
mod testing;

pub use allocator::{ActualUse, AllowRecycling, Interval, Register, ResourceAllocator};
pub use cache::{CacheStats, PressureSource, ResourceCache, ThreadSafeCache};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use gpu::{GpuBackend, ResourceDesc, ResourceProvider, SurfaceProxy, SurfaceView};
pub use key::{KeyDomain, ResourceType, ScratchKey, StaticUniqueKey, UniqueKey};
pub use message_bus::{ContextId, UniqueKeyInvalidatedMessage, UnrefMessage};
pub use resource::{BudgetedType, GpuObject, PendingUsageRef, Resource, ResourceId, ResourceRef};
