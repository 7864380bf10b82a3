//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result, VkResultExt};
use crate::instance::{create_instance, ranked_physical_devices};
use crate::queue::Queue;
use crate::requirements::DeviceRequirements;
use crate::resources::{ArenaSet, ArenaSizes};
use crate::surface::Surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};

/// Device, queues and memory arenas shared by the harness and its samples.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) surface: Option<Surface>,
    pub(crate) swapchain_loader: Option<ash::khr::swapchain::Device>,
    pub(crate) render_queue: Queue,
    pub(crate) present_queue: Queue,
    pub(crate) async_compute_queue: Option<Queue>,
    pub(crate) sparse_binding_queue: Option<Queue>,
    pub(crate) enabled_features: vk::PhysicalDeviceFeatures,
    pub(crate) arenas: ArenaSet,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Queue used for all rendering work.
    pub fn render_queue(&self) -> &Queue {
        &self.render_queue
    }

    /// Queue used for presentation. Equal to the render queue unless a
    /// separate present family was requested and found.
    pub fn present_queue(&self) -> &Queue {
        &self.present_queue
    }

    /// Whether presentation happens on a different queue family.
    pub fn has_separate_present_queue(&self) -> bool {
        self.render_queue.family() != self.present_queue.family()
    }

    pub fn async_compute_queue(&self) -> Option<&Queue> {
        self.async_compute_queue.as_ref()
    }

    /// Queue for `vkQueueBindSparse`; only with sparse binding requested.
    pub fn sparse_binding_queue(&self) -> Option<&Queue> {
        self.sparse_binding_queue.as_ref()
    }

    /// Features the device was created with.
    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.enabled_features
    }

    /// The surface this context presents to, if any.
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    /// Swapchain extension loader; only present with a surface.
    pub fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("context has no surface".to_string()))
    }

    /// The device's memory arenas.
    pub fn arenas(&self) -> &ArenaSet {
        &self.arenas
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle().call("vkDeviceWaitIdle") }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Arenas hold VkDeviceMemory and must go before the device.
            self.arenas.destroy(&self.device);

            self.device.destroy_device(None);
            if let Some(surface) = &self.surface {
                surface.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    prefer_separate_present: bool,
    async_compute: bool,
    requirements: DeviceRequirements,
    arena_sizes: ArenaSizes,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "vksandbox".to_string(),
            enable_validation: cfg!(debug_assertions),
            prefer_separate_present: false,
            async_compute: false,
            requirements: DeviceRequirements::default(),
            arena_sizes: ArenaSizes::default(),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Present from a different queue family than rendering when possible.
    pub fn prefer_separate_present(mut self, prefer: bool) -> Self {
        self.prefer_separate_present = prefer;
        self
    }

    /// Request an additional compute queue.
    pub fn async_compute(mut self, enable: bool) -> Self {
        self.async_compute = enable;
        self
    }

    /// Core features the device must support; they are enabled on creation.
    pub fn features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.requirements = self.requirements.with_features(features);
        self
    }

    /// Extra device extensions the device must expose.
    pub fn extensions(mut self, extensions: &[&'static CStr]) -> Self {
        self.requirements = self.requirements.with_extensions(extensions);
        self
    }

    /// Require sparse binding support and create a sparse-binding queue.
    pub fn sparse_binding(mut self, enable: bool) -> Self {
        self.requirements = self.requirements.with_sparse_binding(enable);
        self
    }

    /// Replace all device requirements at once.
    pub fn requirements(mut self, requirements: DeviceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Arena capacities.
    pub fn arena_sizes(mut self, sizes: ArenaSizes) -> Self {
        self.arena_sizes = sizes;
        self
    }

    /// Build a context without a surface. Present aliases the render queue.
    pub fn build(self) -> Result<GpuContext> {
        self.build_inner(None)
    }

    /// Build a context that can present to `window`.
    pub fn build_with_window<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;
        self.build_inner(Some((display.as_raw(), window_handle.as_raw())))
    }

    fn build_inner(self, window: Option<(RawDisplayHandle, RawWindowHandle)>) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let surface_extensions: &[*const c_char] = match window {
            Some((display, _)) => ash_window::enumerate_required_extensions(display)
                .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?,
            None => &[],
        };

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.enable_validation,
                surface_extensions,
            )
        }?;

        let surface = match window {
            Some((display, handle)) => {
                match unsafe { Surface::new(&entry, &instance, display, handle) } {
                    Ok(surface) => Some(surface),
                    Err(e) => {
                        unsafe { instance.destroy_instance(None) };
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        match unsafe { self.create_device(&instance, surface.as_ref()) } {
            Ok((physical_device, capabilities, device, selection)) => {
                self.finish(entry, instance, surface, physical_device, capabilities, device, selection)
            }
            Err(e) => {
                unsafe {
                    if let Some(surface) = &surface {
                        surface.destroy();
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Pick the first ranked device that meets the requirements and has
    /// usable queues, and create it.
    unsafe fn create_device(
        &self,
        instance: &ash::Instance,
        surface: Option<&Surface>,
    ) -> Result<(vk::PhysicalDevice, GpuCapabilities, ash::Device, QueueSelection)> {
        let presenting = surface.is_some();
        let request = QueueRequest {
            headless: !presenting,
            prefer_separate_present: self.prefer_separate_present,
            async_compute: self.async_compute,
            sparse_binding: self.requirements.sparse_binding,
        };

        for physical_device in ranked_physical_devices(instance)? {
            let capabilities = GpuCapabilities::query(instance, physical_device);
            if !capabilities.meets_requirements() {
                continue;
            }

            let supported = instance.get_physical_device_features(physical_device);
            let extension_properties = instance
                .enumerate_device_extension_properties(physical_device)
                .call("vkEnumerateDeviceExtensionProperties")?;
            let available: Vec<&CStr> = extension_properties
                .iter()
                .filter_map(|props| props.extension_name_as_c_str().ok())
                .collect();
            let unmet = self.requirements.unmet(&supported, &available, presenting);
            if !unmet.is_empty() {
                tracing::info!(
                    device = %capabilities.device_name,
                    missing = ?unmet,
                    "Skipping device"
                );
                continue;
            }

            let mut families = Vec::with_capacity(capabilities.queue_families.len());
            for (i, props) in capabilities.queue_families.iter().enumerate() {
                let present = match surface {
                    Some(surface) => surface.supports_present(physical_device, i as u32)?,
                    None => false,
                };
                families.push(QueueFamilyInfo {
                    flags: props.queue_flags,
                    queue_count: props.queue_count,
                    present,
                });
            }

            let Some(selection) = select_queues(&families, request) else {
                tracing::debug!("Skipping {}: no usable queue families", capabilities.device_name);
                continue;
            };

            let priorities = queue_priorities(&selection);
            let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = priorities
                .iter()
                .map(|(family, priorities)| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(*family)
                        .queue_priorities(priorities)
                })
                .collect();

            let extension_names: Vec<*const c_char> = self
                .requirements
                .enabled_extensions(presenting)
                .iter()
                .map(|name| name.as_ptr())
                .collect();
            let features = self.requirements.enabled_features();

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&extension_names)
                .enabled_features(&features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .call("vkCreateDevice")?;

            return Ok((physical_device, capabilities, device, selection));
        }

        Err(GpuError::NoSuitableDevice)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        self,
        entry: ash::Entry,
        instance: ash::Instance,
        surface: Option<Surface>,
        physical_device: vk::PhysicalDevice,
        capabilities: GpuCapabilities,
        device: ash::Device,
        selection: QueueSelection,
    ) -> Result<GpuContext> {
        tracing::info!("Selected GPU: {}", capabilities.summary());
        tracing::info!(
            render_family = selection.render,
            present_family = selection.present,
            async_compute = ?selection.async_compute,
            sparse_binding = ?selection.sparse_binding,
            "Queue families selected"
        );

        let (render_queue, present_queue, async_compute_queue, sparse_binding_queue) = unsafe {
            (
                Queue::get(&device, selection.render, 0),
                Queue::get(&device, selection.present, 0),
                selection
                    .async_compute
                    .map(|(family, index)| Queue::get(&device, family, index)),
                selection
                    .sparse_binding
                    .map(|family| Queue::get(&device, family, 0)),
            )
        };

        let arenas = match unsafe { ArenaSet::new(&device, &capabilities, self.arena_sizes) } {
            Ok(arenas) => arenas,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    if let Some(surface) = &surface {
                        surface.destroy();
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let swapchain_loader = surface
            .as_ref()
            .map(|_| ash::khr::swapchain::Device::new(&instance, &device));

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            surface,
            swapchain_loader,
            render_queue,
            present_queue,
            async_compute_queue,
            sparse_binding_queue,
            enabled_features: self.requirements.enabled_features(),
            arenas,
        })
    }
}

/// The parts of a queue family that matter for role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Can present to the target surface.
    pub present: bool,
}

/// Queue family (and queue index) assigned to each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    pub render: u32,
    pub present: u32,
    /// `(family, queue index)`
    pub async_compute: Option<(u32, u32)>,
    /// Family of the sparse-binding queue, always queue 0.
    pub sparse_binding: Option<u32>,
}

/// Which queue roles a device must fill.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueRequest {
    /// No surface: present aliases render.
    pub headless: bool,
    pub prefer_separate_present: bool,
    pub async_compute: bool,
    /// Reject devices without a `SPARSE_BINDING` family.
    pub sparse_binding: bool,
}

/// Assign queue families to roles.
///
/// Render is the first graphics+compute family. Present is the first
/// present-capable family; with `prefer_separate_present` a present-capable
/// family other than render wins when one exists. Headless contexts present
/// from the render family. Async compute prefers any other compute family and
/// falls back to a second queue of the render family. Sparse binding takes
/// the first family that supports it, sharing queue 0 with any other role
/// on that family.
pub fn select_queues(families: &[QueueFamilyInfo], request: QueueRequest) -> Option<QueueSelection> {
    let graphics_compute = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    let render = families
        .iter()
        .position(|f| f.queue_count > 0 && f.flags.contains(graphics_compute))? as u32;

    let present = if request.headless {
        render
    } else {
        let mut capable = families
            .iter()
            .enumerate()
            .filter(|(_, f)| f.present && f.queue_count > 0)
            .map(|(i, _)| i as u32);
        let first = capable.next()?;
        if request.prefer_separate_present && first == render {
            capable.next().unwrap_or(first)
        } else {
            first
        }
    };

    let async_compute = if request.async_compute {
        let claimed = |family: u32| u32::from(family == render) + u32::from(family == present && present != render);
        families
            .iter()
            .enumerate()
            .filter(|&(i, f)| i as u32 != render && f.flags.contains(vk::QueueFlags::COMPUTE))
            .map(|(i, f)| (i as u32, f.queue_count))
            .chain(std::iter::once((render, families[render as usize].queue_count)))
            .map(|(family, count)| (family, claimed(family), count))
            .find(|&(_, index, count)| index < count)
            .map(|(family, index, _)| (family, index))
    } else {
        None
    };

    let sparse_binding = if request.sparse_binding {
        let family = families.iter().position(|f| {
            f.queue_count > 0 && f.flags.contains(vk::QueueFlags::SPARSE_BINDING)
        })?;
        Some(family as u32)
    } else {
        None
    };

    Some(QueueSelection {
        render,
        present,
        async_compute,
        sparse_binding,
    })
}

/// One entry per family: how many queues to create and their priorities.
fn queue_priorities(selection: &QueueSelection) -> Vec<(u32, Vec<f32>)> {
    let mut families: Vec<(u32, Vec<f32>)> = vec![(selection.render, vec![1.0])];
    if selection.present != selection.render {
        families.push((selection.present, vec![1.0]));
    }
    if let Some((family, index)) = selection.async_compute {
        match families.iter_mut().find(|(f, _)| *f == family) {
            Some((_, priorities)) => {
                priorities.resize(index as usize + 1, 0.5);
            }
            None => families.push((family, vec![0.5])),
        }
    }
    if let Some(family) = selection.sparse_binding {
        if families.iter().all(|(f, _)| *f != family) {
            families.push((family, vec![1.0]));
        }
    }
    families
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            flags,
            queue_count,
            present,
        }
    }

    fn separate() -> QueueRequest {
        QueueRequest {
            prefer_separate_present: true,
            ..QueueRequest::default()
        }
    }

    fn with_async_compute() -> QueueRequest {
        QueueRequest {
            async_compute: true,
            ..QueueRequest::default()
        }
    }

    const GC: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::COMPUTE.as_raw(),
    );

    #[test]
    fn single_family_shares_render_and_present() {
        let families = [family(GC, 1, true)];
        let selection = select_queues(&families, separate()).unwrap();
        assert_eq!(selection.render, 0);
        assert_eq!(selection.present, 0);
        assert_eq!(selection.async_compute, None);
    }

    #[test]
    fn separate_present_only_when_preferred() {
        let families = [
            family(GC, 1, true),
            family(vk::QueueFlags::TRANSFER, 1, true),
        ];
        assert_eq!(select_queues(&families, QueueRequest::default()).unwrap().present, 0);
        assert_eq!(select_queues(&families, separate()).unwrap().present, 1);
    }

    #[test]
    fn present_family_can_differ_without_preference() {
        let families = [family(GC, 1, false), family(vk::QueueFlags::COMPUTE, 1, true)];
        let selection = select_queues(&families, QueueRequest::default()).unwrap();
        assert_eq!((selection.render, selection.present), (0, 1));
    }

    #[test]
    fn no_present_family_rejects_device_unless_headless() {
        let families = [family(GC, 1, false)];
        assert!(select_queues(&families, QueueRequest::default()).is_none());
        let headless = QueueRequest {
            headless: true,
            ..separate()
        };
        let selection = select_queues(&families, headless).unwrap();
        assert_eq!(selection.present, selection.render);
    }

    #[test]
    fn async_compute_prefers_dedicated_family() {
        let families = [
            family(GC, 16, true),
            family(vk::QueueFlags::TRANSFER, 2, false),
            family(vk::QueueFlags::COMPUTE, 8, false),
        ];
        let selection = select_queues(&families, with_async_compute()).unwrap();
        assert_eq!(selection.async_compute, Some((2, 0)));
    }

    #[test]
    fn async_compute_falls_back_to_second_render_queue() {
        let families = [family(GC, 2, true)];
        let selection = select_queues(&families, with_async_compute()).unwrap();
        assert_eq!(selection.async_compute, Some((0, 1)));

        let families = [family(GC, 1, true)];
        let selection = select_queues(&families, with_async_compute()).unwrap();
        assert_eq!(selection.async_compute, None);
    }

    #[test]
    fn sparse_binding_picks_first_capable_family() {
        let sparse = QueueRequest {
            sparse_binding: true,
            ..QueueRequest::default()
        };
        let families = [
            family(GC, 1, true),
            family(vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING, 1, false),
        ];
        let selection = select_queues(&families, sparse).unwrap();
        assert_eq!(selection.sparse_binding, Some(1));

        let families = [family(GC | vk::QueueFlags::SPARSE_BINDING, 1, true)];
        let selection = select_queues(&families, sparse).unwrap();
        assert_eq!(selection.sparse_binding, Some(0));
        assert_eq!(queue_priorities(&selection), vec![(0, vec![1.0])]);
    }

    #[test]
    fn sparse_binding_rejects_device_without_sparse_family() {
        let families = [family(GC, 4, true)];
        let sparse = QueueRequest {
            sparse_binding: true,
            ..QueueRequest::default()
        };
        assert!(select_queues(&families, sparse).is_none());
        assert_eq!(
            select_queues(&families, QueueRequest::default())
                .unwrap()
                .sparse_binding,
            None
        );
    }

    #[test]
    fn sparse_family_gets_its_own_queue_when_distinct() {
        let selection = QueueSelection {
            render: 0,
            present: 0,
            async_compute: None,
            sparse_binding: Some(2),
        };
        assert_eq!(
            queue_priorities(&selection),
            vec![(0, vec![1.0]), (2, vec![1.0])]
        );
    }

    #[test]
    fn priorities_grow_render_family_for_async_queue() {
        let selection = QueueSelection {
            render: 0,
            present: 1,
            async_compute: Some((0, 1)),
            sparse_binding: None,
        };
        assert_eq!(
            queue_priorities(&selection),
            vec![(0, vec![1.0, 0.5]), (1, vec![1.0])]
        );
    }
}
