// src/testing.rs
//! Test doubles shared by the unit tests.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::gpu::desc::{ResourceDesc, ResourceKind};
use crate::gpu::provider::GpuBackend;
use crate::key::{ResourceType, ScratchKey};
use crate::resource::GpuObject;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared creation / destruction counters.
#[derive(Default, Debug)]
pub struct Counters {
    created: AtomicUsize,
    released: AtomicUsize,
    abandoned: AtomicUsize,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Objects created and not yet released or abandoned.
    pub fn live(&self) -> usize {
        self.created() - self.released() - self.abandoned()
    }
}

#[derive(Debug)]
pub struct MockObject {
    pub size: usize,
    pub scratch_key: Option<ScratchKey>,
    pub render_target: bool,
    counters: Arc<Counters>,
}

impl MockObject {
    pub fn new(counters: &Arc<Counters>, size: usize) -> Self {
        counters.created.fetch_add(1, Ordering::SeqCst);
        Self {
            size,
            scratch_key: None,
            render_target: false,
            counters: Arc::clone(counters),
        }
    }

    pub fn boxed(counters: &Arc<Counters>, size: usize) -> Box<dyn GpuObject> {
        Box::new(Self::new(counters, size))
    }

    pub fn scratch(counters: &Arc<Counters>, size: usize, key: &ScratchKey) -> Box<dyn GpuObject> {
        let mut object = Self::new(counters, size);
        object.scratch_key = Some(key.clone());
        Box::new(object)
    }
}

impl GpuObject for MockObject {
    fn gpu_memory_size(&self) -> usize {
        self.size
    }

    fn resource_type(&self) -> &'static str {
        "mock"
    }

    fn compute_scratch_key(&self) -> Option<ScratchKey> {
        self.scratch_key.clone()
    }

    fn is_render_target(&self) -> bool {
        self.render_target
    }

    fn on_release(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }

    fn on_abandon(&mut self) {
        self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A scratch key for mock objects; `shape` picks the bucket.
pub fn scratch_key(shape: u32) -> ScratchKey {
    static TYPE: std::sync::OnceLock<ResourceType> = std::sync::OnceLock::new();
    let mut b = ScratchKey::builder(*TYPE.get_or_init(ResourceType::generate), 1);
    b[0] = shape;
    b.finish()
}

/// Backend that creates [`MockObject`]s sized from the descriptor.
#[derive(Debug)]
pub struct MockBackend {
    pub counters: Arc<Counters>,
    pub fail: Arc<AtomicBool>,
    pub reuse_scratch_textures: bool,
}

impl MockBackend {
    pub fn new(counters: &Arc<Counters>) -> Self {
        Self {
            counters: Arc::clone(counters),
            fail: Arc::new(AtomicBool::new(false)),
            reuse_scratch_textures: true,
        }
    }
}

impl GpuBackend for MockBackend {
    fn create_object(&mut self, desc: &ResourceDesc) -> Option<Box<dyn GpuObject>> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let mut object = MockObject::new(&self.counters, desc.approx_size_bytes());
        object.scratch_key = desc.scratch_key();
        object.render_target = desc.kind == ResourceKind::RenderTarget;
        Some(Box::new(object))
    }

    fn create_buffer_with_data(&mut self, bytes: &[u8]) -> Option<Box<dyn GpuObject>> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        Some(MockObject::boxed(&self.counters, bytes.len()))
    }

    fn reuse_scratch_textures(&self) -> bool {
        self.reuse_scratch_textures
    }
}
