// src/cache/mod.rs
//! The per-context resource cache and the cross-thread artifact cache that feeds it.

pub mod purgeable_queue;
pub mod resource_cache;
pub mod thread_safe_cache;

pub use resource_cache::{CacheStats, ResourceCache};
pub use thread_safe_cache::{IsNewerBetter, PressureSource, ThreadSafeCache, Trampoline, VertexData};
