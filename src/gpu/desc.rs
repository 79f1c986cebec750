// src/gpu/desc.rs
//! Shape descriptors for GPU allocations and the scratch keys derived from them.

use std::sync::OnceLock;

use crate::key::{ResourceType, ScratchKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    RenderTarget,
    Buffer,
}

impl ResourceKind {
    /// One generated scratch domain per kind.
    fn resource_type(self) -> ResourceType {
        static TEXTURE: OnceLock<ResourceType> = OnceLock::new();
        static RENDER_TARGET: OnceLock<ResourceType> = OnceLock::new();
        static BUFFER: OnceLock<ResourceType> = OnceLock::new();
        let cell = match self {
            ResourceKind::Texture => &TEXTURE,
            ResourceKind::RenderTarget => &RENDER_TARGET,
            ResourceKind::Buffer => &BUFFER,
        };
        *cell.get_or_init(ResourceType::generate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    R16Float,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::Rg8Unorm | PixelFormat::R16Float => 2,
            PixelFormat::Rgba8Unorm
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Depth32Float
            | PixelFormat::Depth24PlusStencil8 => 4,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float => 16,
        }
    }

    fn code(self) -> u32 {
        self as u32
    }
}

/// Usage bits, backend-agnostic.
pub mod usage {
    pub const SAMPLED: u32 = 1 << 0;
    pub const RENDER_ATTACHMENT: u32 = 1 << 1;
    pub const COPY_SRC: u32 = 1 << 2;
    pub const COPY_DST: u32 = 1 << 3;
    pub const STORAGE: u32 = 1 << 4;
    pub const VERTEX: u32 = 1 << 5;
    pub const INDEX: u32 = 1 << 6;
    pub const UNIFORM: u32 = 1 << 7;
}

/// Whether a texture must match the requested size or may be larger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackingFit {
    #[default]
    Exact,
    /// Round up to a size class so near-sized requests share scratch textures.
    Approx,
}

const MIN_APPROX_SIZE: u32 = 16;
const APPROX_POW2_LIMIT: u32 = 1024;

/// Size class for one approx-fit dimension: the next power of two, with a half step between
/// powers of two above 1024.
pub fn approx_dimension(value: u32) -> u32 {
    let value = value.max(MIN_APPROX_SIZE);
    let ceil = value.checked_next_power_of_two().unwrap_or(u32::MAX);
    if value <= APPROX_POW2_LIMIT {
        return ceil;
    }
    let floor = ceil >> 1;
    let mid = floor + (floor >> 1);
    if value <= mid {
        mid
    } else {
        ceil
    }
}

/// What to allocate. For buffers `width` is the byte size and `height` is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub kind: ResourceKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sample_count: u32,
    pub mipmapped: bool,
    pub usage: u32,
    pub fit: BackingFit,
}

impl ResourceDesc {
    pub fn texture(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            kind: ResourceKind::Texture,
            width,
            height,
            format,
            sample_count: 1,
            mipmapped: false,
            usage: usage::SAMPLED | usage::COPY_DST,
            fit: BackingFit::Exact,
        }
    }

    pub fn render_target(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            kind: ResourceKind::RenderTarget,
            usage: usage::RENDER_ATTACHMENT | usage::SAMPLED,
            ..Self::texture(width, height, format)
        }
    }

    pub fn buffer(size: u32, usage: u32) -> Self {
        Self {
            kind: ResourceKind::Buffer,
            width: size,
            height: 1,
            format: PixelFormat::R8Unorm,
            sample_count: 1,
            mipmapped: false,
            usage,
            fit: BackingFit::Exact,
        }
    }

    pub fn with_sample_count(mut self, samples: u32) -> Self {
        self.sample_count = samples.max(1);
        self
    }

    pub fn with_mipmaps(mut self, mipmapped: bool) -> Self {
        self.mipmapped = mipmapped;
        self
    }

    pub fn with_usage(mut self, usage: u32) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_fit(mut self, fit: BackingFit) -> Self {
        self.fit = fit;
        self
    }

    /// The shape actually allocated. Approx-fit textures are rounded up to their size class and
    /// never mipmapped; everything else is returned as is.
    pub fn backing(&self) -> Self {
        if self.fit == BackingFit::Exact || self.kind == ResourceKind::Buffer {
            return *self;
        }
        Self {
            width: approx_dimension(self.width),
            height: approx_dimension(self.height),
            mipmapped: false,
            fit: BackingFit::Exact,
            ..*self
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        if self.mipmapped && self.kind != ResourceKind::Buffer {
            32 - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }

    /// Estimated device memory, used for budgeting before a backend object exists.
    pub fn approx_size_bytes(&self) -> usize {
        let desc = self.backing();
        let bytes = match desc.kind {
            ResourceKind::Buffer => u64::from(desc.width),
            ResourceKind::Texture | ResourceKind::RenderTarget => {
                let base = u64::from(desc.width)
                    * u64::from(desc.height)
                    * desc.format.bytes_per_pixel()
                    * u64::from(desc.sample_count.max(1));
                if desc.mipmapped {
                    base + base / 3
                } else {
                    base
                }
            }
        };
        bytes as usize
    }

    /// Key shared by every allocation that could stand in for this one. Approx-fit requests
    /// key on their backing size.
    pub fn scratch_key(&self) -> Option<ScratchKey> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let desc = self.backing();
        let mut b = ScratchKey::builder(desc.kind.resource_type(), 3);
        b[0] = desc.width;
        b[1] = desc.height;
        b[2] = desc.format.code()
            | (desc.sample_count.min(0xff) << 8)
            | (u32::from(desc.mipmapped) << 16)
            | ((desc.usage & 0x7fff) << 17);
        Some(b.finish())
    }
}
