//! GPU backend for the equalisation pipeline.
//!
//! Runs the four stages as wgpu compute shaders on Vulkan, Metal, DX12 or GL.
//! The backend is enabled via the `gpu` feature flag (on by default):
//!
//! ```toml
//! [dependencies]
//! histeq-core = { version = "0.1", features = ["gpu"] }
//! ```

mod buffers;
mod context;
mod shaders;

pub use buffers::GpuBuffer;
pub use context::{
    list_platforms, AdapterSummary, DeviceSelection, GpuContext, GpuKernel, PlatformInfo,
};
pub use wgpu::DeviceType as AdapterDeviceType;

/// Check if GPU acceleration is available on this system.
pub fn is_gpu_available() -> bool {
    GpuContext::is_available()
}

/// Get information about the available GPU device.
pub fn gpu_info() -> Option<String> {
    GpuContext::device_info()
}

#[cfg(test)]
mod tests;
