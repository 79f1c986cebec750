// src/gpu/wgpu_backend.rs
//! [`GpuBackend`] on top of wgpu 22.

use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use wgpu::util::DeviceExt;

use crate::gpu::desc::{usage, PixelFormat, ResourceDesc, ResourceKind};
use crate::gpu::provider::GpuBackend;
use crate::key::ScratchKey;
use crate::resource::GpuObject;

impl PixelFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            PixelFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
            PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            PixelFormat::R16Float => wgpu::TextureFormat::R16Float,
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            PixelFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            PixelFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }
}

fn texture_usages(bits: u32) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if bits & usage::SAMPLED != 0 {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if bits & usage::RENDER_ATTACHMENT != 0 {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if bits & usage::COPY_SRC != 0 {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if bits & usage::COPY_DST != 0 {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if bits & usage::STORAGE != 0 {
        out |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    out
}

fn buffer_usages(bits: u32) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if bits & usage::COPY_SRC != 0 {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if bits & usage::COPY_DST != 0 {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if bits & usage::STORAGE != 0 {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if bits & usage::VERTEX != 0 {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if bits & usage::INDEX != 0 {
        out |= wgpu::BufferUsages::INDEX;
    }
    if bits & usage::UNIFORM != 0 {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    out
}

/// Run a creation call inside out-of-memory and validation error scopes. A captured error
/// becomes `None` so exhaustion reaches callers as a failed creation.
#[cfg(not(target_arch = "wasm32"))]
fn scoped<T>(device: &wgpu::Device, what: &str, create: impl FnOnce() -> T) -> Option<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let out = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    if let Some(err) = validation.or(out_of_memory) {
        log::warn!("wgpu could not create {what}: {err}");
        return None;
    }
    Some(out)
}

// Error scopes cannot be awaited synchronously on the web.
#[cfg(target_arch = "wasm32")]
fn scoped<T>(_device: &wgpu::Device, _what: &str, create: impl FnOnce() -> T) -> Option<T> {
    Some(create())
}

// -----------------------------------------------------------------------------
// Objects
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    desc: ResourceDesc,
}

impl GpuObject for WgpuTexture {
    fn gpu_memory_size(&self) -> usize {
        self.desc.approx_size_bytes()
    }

    fn resource_type(&self) -> &'static str {
        if self.desc.kind == ResourceKind::RenderTarget {
            "wgpu_render_target"
        } else {
            "wgpu_texture"
        }
    }

    fn compute_scratch_key(&self) -> Option<ScratchKey> {
        self.desc.scratch_key()
    }

    fn is_render_target(&self) -> bool {
        self.desc.kind == ResourceKind::RenderTarget
    }

    fn on_release(&mut self) {
        self.texture.destroy();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
    desc: Option<ResourceDesc>,
}

impl GpuObject for WgpuBuffer {
    fn gpu_memory_size(&self) -> usize {
        self.buffer.size() as usize
    }

    fn resource_type(&self) -> &'static str {
        "wgpu_buffer"
    }

    fn compute_scratch_key(&self) -> Option<ScratchKey> {
        // Buffers created with initial content are never interchangeable.
        self.desc.as_ref().and_then(ResourceDesc::scratch_key)
    }

    fn on_release(&mut self) {
        self.buffer.destroy();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// -----------------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------------

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Headless device on the best available adapter.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn request() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            dx12_shader_compiler: Default::default(),
            flags: wgpu::InstanceFlags::empty(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("no suitable GPU adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gpu_resource_cache_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("failed to request device")?;

        log::debug!("wgpu backend on {:?}", adapter.get_info().name);
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }
}

impl GpuBackend for WgpuBackend {
    fn create_object(&mut self, desc: &ResourceDesc) -> Option<Box<dyn GpuObject>> {
        let device = &self.device;
        match desc.kind {
            ResourceKind::Buffer => {
                let buffer = scoped(device, "scratch buffer", || {
                    device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("scratch_buffer"),
                        size: u64::from(desc.width),
                        usage: buffer_usages(desc.usage),
                        mapped_at_creation: false,
                    })
                })?;
                Some(Box::new(WgpuBuffer {
                    buffer,
                    desc: Some(*desc),
                }))
            }
            ResourceKind::Texture | ResourceKind::RenderTarget => {
                let texture = scoped(device, "scratch texture", || {
                    device.create_texture(&wgpu::TextureDescriptor {
                        label: Some("scratch_texture"),
                        size: wgpu::Extent3d {
                            width: desc.width,
                            height: desc.height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: desc.mip_level_count(),
                        sample_count: desc.sample_count,
                        dimension: wgpu::TextureDimension::D2,
                        format: desc.format.to_wgpu(),
                        usage: texture_usages(desc.usage),
                        view_formats: &[],
                    })
                })?;
                Some(Box::new(WgpuTexture {
                    texture,
                    desc: *desc,
                }))
            }
        }
    }

    fn create_buffer_with_data(&mut self, bytes: &[u8]) -> Option<Box<dyn GpuObject>> {
        let device = &self.device;
        let buffer = scoped(device, "static buffer", || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("static_buffer"),
                contents: bytes,
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::INDEX
                    | wgpu::BufferUsages::COPY_DST,
            })
        })?;
        Some(Box::new(WgpuBuffer { buffer, desc: None }))
    }
}
