//! System GPU probing through wgpu.
//!
//! Reports every adapter wgpu can see (Metal, Vulkan, DX12, GL) as a
//! `DeviceInfo`, translating wgpu limits and features into the capability
//! vocabulary the rest of the crate uses. Probing is read-only: no device
//! is opened, and a machine without adapters yields an empty list.

use super::{Capabilities, DeviceInfo, DeviceKind, LocalMemoryKind};

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Enumerate all adapters on this machine.
pub fn probe_adapters() -> Vec<DeviceInfo> {
    let adapters = instance().enumerate_adapters(wgpu::Backends::all());
    let devices: Vec<DeviceInfo> = adapters.iter().map(describe_adapter).collect();
    tracing::debug!(count = devices.len(), "probed wgpu adapters");
    devices
}

/// The adapter wgpu would pick for high-performance work, if any.
pub fn probe_default_adapter() -> Option<DeviceInfo> {
    let adapter = pollster::block_on(instance().request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    Some(describe_adapter(&adapter))
}

pub fn describe_adapter(adapter: &wgpu::Adapter) -> DeviceInfo {
    let info = adapter.get_info();
    DeviceInfo {
        platform: format!("wgpu/{}", info.backend.to_str()),
        name: info.name.clone(),
        kind: device_kind(info.device_type),
        capabilities: capabilities_from(&adapter.limits(), adapter.features(), info.device_type),
    }
}

fn device_kind(ty: wgpu::DeviceType) -> DeviceKind {
    match ty {
        wgpu::DeviceType::DiscreteGpu => DeviceKind::DiscreteGpu,
        wgpu::DeviceType::IntegratedGpu => DeviceKind::IntegratedGpu,
        wgpu::DeviceType::Cpu => DeviceKind::Cpu,
        wgpu::DeviceType::VirtualGpu => DeviceKind::Accelerator,
        wgpu::DeviceType::Other => DeviceKind::Other,
    }
}

/// Map wgpu limits/features onto `Capabilities`.
pub fn capabilities_from(
    limits: &wgpu::Limits,
    features: wgpu::Features,
    ty: wgpu::DeviceType,
) -> Capabilities {
    let mut extensions = vec![
        "cl_khr_global_int32_base_atomics".to_string(),
        "cl_khr_local_int32_base_atomics".to_string(),
    ];
    if features.contains(wgpu::Features::SHADER_F64) {
        extensions.push("cl_khr_fp64".to_string());
    }
    if features.contains(wgpu::Features::SHADER_INT64) {
        extensions.push("cl_khr_int64".to_string());
    }
    // Integrated and software adapters share system memory.
    let local_memory = match ty {
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::VirtualGpu => LocalMemoryKind::Dedicated,
        _ => LocalMemoryKind::Shared,
    };
    Capabilities {
        alignment: limits.min_storage_buffer_offset_alignment as usize,
        max_vector_width: 4,
        max_vector_width_64: 2,
        local_memory,
        local_memory_size: limits.max_compute_workgroup_storage_size as usize,
        max_work_group_size: limits.max_compute_invocations_per_workgroup as usize,
        extensions,
    }
}
