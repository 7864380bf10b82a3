//! Vulkan instance creation and physical device ranking.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Instance extensions needed on every platform regardless of surface.
pub fn platform_instance_extensions() -> Vec<&'static CStr> {
    vec![
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ]
}

/// Validation layers to enable when requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan 1.1 instance.
///
/// `surface_extensions` are the platform extensions needed for a window
/// surface; they are empty for headless contexts.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    surface_extensions: &[*const c_char],
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"vksandbox")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let extension_names: Vec<*const c_char> = surface_extensions
        .iter()
        .copied()
        .chain(platform_instance_extensions().iter().map(|ext| ext.as_ptr()))
        .collect();

    let available_layers = entry
        .enumerate_instance_layer_properties()
        .call("vkEnumerateInstanceLayerProperties")?;
    let layers: Vec<&CStr> = if enable_validation {
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers
                    .iter()
                    .any(|props| props.layer_name_as_c_str() == Ok(*layer));
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        Vec::new()
    };
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    entry
        .create_instance(&create_info, None)
        .call("vkCreateInstance")
}

/// Physical devices ordered best first, dropping those below Vulkan 1.1.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn ranked_physical_devices(instance: &ash::Instance) -> Result<Vec<vk::PhysicalDevice>> {
    let devices = instance
        .enumerate_physical_devices()
        .call("vkEnumeratePhysicalDevices")?;

    let mut scored: Vec<(i32, vk::PhysicalDevice)> = devices
        .into_iter()
        .map(|device| (score_physical_device(instance, device), device))
        .filter(|&(score, _)| score >= 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    if scored.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }
    Ok(scored.into_iter().map(|(_, device)| device).collect())
}

/// Score a physical device for selection.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i32 {
    let properties = instance.get_physical_device_properties(device);

    let api_version = properties.api_version;
    if vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 1 {
        return -1;
    }

    let mut score = 0;

    // Prefer discrete GPUs
    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 50,
        _ => {}
    }

    // Prefer more VRAM
    let memory = instance.get_physical_device_memory_properties(device);
    let vram_mb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size / (1024 * 1024))
        .sum();
    score += i32::try_from(vram_mb / 1024).unwrap_or(i32::MAX / 2);

    score
}
