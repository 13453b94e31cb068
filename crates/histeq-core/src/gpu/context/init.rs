//! Adapter enumeration, selection and device initialization.
//!
//! A "platform" is a wgpu backend that exposes at least one adapter; its
//! "devices" are those adapters in enumeration order.

use crate::config::PowerPreference;
use crate::error::{EqualizeError, Operation};

/// Backends in the order their platform ordinals are assigned.
const PLATFORM_ORDER: [(wgpu::Backends, &str); 5] = [
    (wgpu::Backends::VULKAN, "Vulkan"),
    (wgpu::Backends::METAL, "Metal"),
    (wgpu::Backends::DX12, "DirectX 12"),
    (wgpu::Backends::GL, "OpenGL"),
    (wgpu::Backends::BROWSER_WEBGPU, "WebGPU"),
];

/// How to pick the adapter a [`super::GpuContext`] binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelection {
    /// Platform ordinal. Implies device 0 when `device` is unset.
    pub platform: Option<usize>,
    /// Device ordinal within the platform, platform 0 when unset.
    pub device: Option<usize>,
    /// Used when neither ordinal is given.
    pub power_preference: PowerPreference,
    /// Request timestamp queries when the adapter supports them.
    pub profiling: bool,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self {
            platform: None,
            device: None,
            power_preference: PowerPreference::HighPerformance,
            profiling: true,
        }
    }
}

/// One enumerated adapter.
#[derive(Debug, Clone)]
pub struct AdapterSummary {
    pub ordinal: usize,
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub driver: String,
}

/// A backend with its adapters.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub ordinal: usize,
    pub name: &'static str,
    pub devices: Vec<AdapterSummary>,
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Non-empty platforms with their adapters.
fn enumerate(instance: &wgpu::Instance) -> Vec<(&'static str, Vec<wgpu::Adapter>)> {
    PLATFORM_ORDER
        .iter()
        .map(|&(backend, name)| (name, instance.enumerate_adapters(backend)))
        .filter(|(_, adapters)| !adapters.is_empty())
        .collect()
}

/// Every platform and device visible to wgpu, with their ordinals.
pub fn list_platforms() -> Vec<PlatformInfo> {
    let instance = create_instance();
    enumerate(&instance)
        .into_iter()
        .enumerate()
        .map(|(ordinal, (name, adapters))| PlatformInfo {
            ordinal,
            name,
            devices: adapters
                .iter()
                .enumerate()
                .map(|(ordinal, adapter)| {
                    let info = adapter.get_info();
                    AdapterSummary {
                        ordinal,
                        name: info.name,
                        device_type: info.device_type,
                        driver: info.driver,
                    }
                })
                .collect(),
        })
        .collect()
}

fn power_preference(preference: PowerPreference) -> wgpu::PowerPreference {
    match preference {
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
    }
}

async fn request_default_adapter(
    instance: &wgpu::Instance,
    preference: PowerPreference,
) -> Option<wgpu::Adapter> {
    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power_preference(preference),
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
}

/// Check if GPU acceleration is available without fully initializing.
pub fn is_available() -> bool {
    let instance = create_instance();
    pollster::block_on(request_default_adapter(
        &instance,
        PowerPreference::HighPerformance,
    ))
    .is_some()
}

/// Get information about the default GPU adapter.
pub fn device_info() -> Option<String> {
    let instance = create_instance();
    pollster::block_on(request_default_adapter(
        &instance,
        PowerPreference::HighPerformance,
    ))
    .map(|adapter| {
        let info = adapter.get_info();
        format!("{} ({:?}, {:?})", info.name, info.device_type, info.backend)
    })
}

fn select_adapter(
    instance: &wgpu::Instance,
    selection: &DeviceSelection,
) -> Result<wgpu::Adapter, EqualizeError> {
    if selection.platform.is_none() && selection.device.is_none() {
        return pollster::block_on(request_default_adapter(
            instance,
            selection.power_preference,
        ))
        .ok_or_else(|| EqualizeError::device(Operation::Setup, "no suitable GPU adapter found"));
    }

    let mut platforms = enumerate(instance);
    let platform = selection.platform.unwrap_or(0);
    if platform >= platforms.len() {
        return Err(EqualizeError::device(
            Operation::Setup,
            format!(
                "platform {} does not exist ({} available)",
                platform,
                platforms.len()
            ),
        ));
    }

    let (name, mut adapters) = platforms.swap_remove(platform);
    let device = selection.device.unwrap_or(0);
    if device >= adapters.len() {
        return Err(EqualizeError::device(
            Operation::Setup,
            format!(
                "device {} does not exist on platform {} ({}, {} available)",
                device,
                platform,
                name,
                adapters.len()
            ),
        ));
    }
    Ok(adapters.swap_remove(device))
}

/// Initialize the wgpu device and queue for `selection`.
///
/// Returns the device, queue, adapter info, and whether timestamp queries
/// were enabled.
pub async fn initialize_device(
    selection: &DeviceSelection,
) -> Result<(wgpu::Device, wgpu::Queue, wgpu::AdapterInfo, bool), EqualizeError> {
    let instance = create_instance();
    let adapter = select_adapter(&instance, selection)?;
    let adapter_info = adapter.get_info();

    // Timestamps are optional; host timing is used without them.
    let use_timestamps =
        selection.profiling && adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
    let required_features = if use_timestamps {
        wgpu::Features::TIMESTAMP_QUERY
    } else {
        wgpu::Features::empty()
    };

    // Large images need the adapter's full storage binding size.
    let adapter_limits = adapter.limits();
    let limits = wgpu::Limits {
        max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
        max_buffer_size: adapter_limits.max_buffer_size,
        ..wgpu::Limits::downlevel_defaults()
    };

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("histeq-gpu"),
                required_features,
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )
        .await
        .map_err(|e| EqualizeError::device(Operation::Setup, e.to_string()))?;

    log::info!(
        "selected {} ({:?}, {:?}), timestamps {}",
        adapter_info.name,
        adapter_info.device_type,
        adapter_info.backend,
        if use_timestamps { "on" } else { "off" }
    );

    Ok((device, queue, adapter_info, use_timestamps))
}
