// src/config.rs
//! Runtime configuration for a [`ResourceCache`](crate::cache::ResourceCache).

/// Default byte budget for budgeted resources.
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024; // 256MB

// ---------- Config ----------
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Byte budget for budgeted resources. Exceeding it triggers LRU purging.
    pub max_bytes: usize,
    /// Release purgeable resources that sat unused for more than this many flushes.
    /// `0` disables the flush-driven schedule.
    pub purge_flush_threshold: u32,
    /// Whether the backend lets non-render-target textures be recycled as scratch.
    pub reuse_scratch_textures: bool,
    /// Label used in log lines.
    pub label: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            purge_flush_threshold: 0,
            reuse_scratch_textures: true,
            label: "resource_cache".to_owned(),
        }
    }
}

impl CacheConfig {
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_purge_flush_threshold(mut self, flushes: u32) -> Self {
        self.purge_flush_threshold = flushes;
        self
    }

    pub fn with_reuse_scratch_textures(mut self, reuse: bool) -> Self {
        self.reuse_scratch_textures = reuse;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
