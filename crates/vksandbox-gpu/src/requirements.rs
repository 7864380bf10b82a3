//! Device features and extensions a sample asks for.
//!
//! A physical device is only chosen when it supports every requested
//! feature and extension. With sparse binding requested it must also expose
//! a queue family with `SPARSE_BINDING`.

use ash::vk;
use std::ffi::CStr;

/// What the device must support beyond the harness defaults.
#[derive(Debug, Clone, Default)]
pub struct DeviceRequirements {
    /// Core features enabled at device creation.
    pub features: vk::PhysicalDeviceFeatures,
    /// Device extensions enabled in addition to `VK_KHR_swapchain`.
    pub extensions: Vec<&'static CStr>,
    /// Require a sparse-binding queue and the `sparseBinding` feature.
    pub sparse_binding: bool,
}

impl DeviceRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_extensions(mut self, extensions: &[&'static CStr]) -> Self {
        for &extension in extensions {
            if !self.extensions.contains(&extension) {
                self.extensions.push(extension);
            }
        }
        self
    }

    pub fn with_sparse_binding(mut self, enable: bool) -> Self {
        self.sparse_binding = enable;
        self
    }

    /// Features passed to `vkCreateDevice`.
    pub fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        let mut features = self.features;
        if self.sparse_binding {
            features.sparse_binding = vk::TRUE;
        }
        features
    }

    /// Extensions passed to `vkCreateDevice`, swapchain first when presenting.
    pub fn enabled_extensions(&self, presenting: bool) -> Vec<&'static CStr> {
        let mut names = Vec::with_capacity(self.extensions.len() + 1);
        if presenting {
            names.push(ash::khr::swapchain::NAME);
        }
        for &extension in &self.extensions {
            if !names.contains(&extension) {
                names.push(extension);
            }
        }
        names
    }

    /// Everything a device with `supported` features and `available`
    /// extensions lacks. Empty means the device qualifies.
    pub fn unmet(
        &self,
        supported: &vk::PhysicalDeviceFeatures,
        available: &[&CStr],
        presenting: bool,
    ) -> Vec<String> {
        let features = unsupported_features(&self.enabled_features(), supported)
            .into_iter()
            .map(|name| format!("feature {name}"));
        let extensions = missing_extensions(&self.enabled_extensions(presenting), available)
            .into_iter()
            .map(|name| format!("extension {}", name.to_string_lossy()));
        features.chain(extensions).collect()
    }
}

macro_rules! feature_table {
    ($($field:ident),* $(,)?) => {
        /// Names of requested features the device does not support.
        pub fn unsupported_features(
            requested: &vk::PhysicalDeviceFeatures,
            supported: &vk::PhysicalDeviceFeatures,
        ) -> Vec<&'static str> {
            let mut missing = Vec::new();
            $(
                if requested.$field != vk::FALSE && supported.$field == vk::FALSE {
                    missing.push(stringify!($field));
                }
            )*
            missing
        }
    };
}

feature_table!(
    robust_buffer_access,
    full_draw_index_uint32,
    image_cube_array,
    independent_blend,
    geometry_shader,
    tessellation_shader,
    sample_rate_shading,
    dual_src_blend,
    logic_op,
    multi_draw_indirect,
    draw_indirect_first_instance,
    depth_clamp,
    depth_bias_clamp,
    fill_mode_non_solid,
    depth_bounds,
    wide_lines,
    large_points,
    alpha_to_one,
    multi_viewport,
    sampler_anisotropy,
    texture_compression_etc2,
    texture_compression_astc_ldr,
    texture_compression_bc,
    occlusion_query_precise,
    pipeline_statistics_query,
    vertex_pipeline_stores_and_atomics,
    fragment_stores_and_atomics,
    shader_tessellation_and_geometry_point_size,
    shader_image_gather_extended,
    shader_storage_image_extended_formats,
    shader_storage_image_multisample,
    shader_storage_image_read_without_format,
    shader_storage_image_write_without_format,
    shader_uniform_buffer_array_dynamic_indexing,
    shader_sampled_image_array_dynamic_indexing,
    shader_storage_buffer_array_dynamic_indexing,
    shader_storage_image_array_dynamic_indexing,
    shader_clip_distance,
    shader_cull_distance,
    shader_float64,
    shader_int64,
    shader_int16,
    shader_resource_residency,
    shader_resource_min_lod,
    sparse_binding,
    sparse_residency_buffer,
    sparse_residency_image2_d,
    sparse_residency_image3_d,
    sparse_residency2_samples,
    sparse_residency4_samples,
    sparse_residency8_samples,
    sparse_residency16_samples,
    sparse_residency_aliased,
    variable_multisample_rate,
    inherited_queries,
);

/// Requested extensions missing from `available`, in request order.
pub fn missing_extensions<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    requested
        .iter()
        .copied()
        .filter(|name| !available.iter().any(|have| have == name))
        .collect()
}
