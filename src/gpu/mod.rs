// src/gpu/mod.rs
//! Everything that touches concrete GPU objects: descriptors, proxies, the provider that
//! creates resources, and the optional wgpu backend.

pub mod desc;
pub mod provider;
pub mod proxy;

#[cfg(feature = "wgpu_backend")]
pub mod wgpu_backend;

pub use desc::{BackingFit, PixelFormat, ResourceDesc, ResourceKind};
pub use provider::{GpuBackend, ResourceProvider};
pub use proxy::{LazyCallback, LazyKind, ProxyId, SurfaceProxy, SurfaceView};

#[cfg(feature = "wgpu_backend")]
pub use wgpu_backend::{WgpuBackend, WgpuBuffer, WgpuTexture};
