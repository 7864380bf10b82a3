//! Window surface management.
//!
//! The surface is created right after the instance so device selection can
//! ask which queue families are able to present to it.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// A presentable surface and its extension loader.
pub struct Surface {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Create a surface for a window.
    ///
    /// # Safety
    /// The handles must stay valid for the surface's lifetime and the
    /// instance must have the extensions `ash_window` reports as required.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let surface = ash_window::create_surface(entry, instance, display, window, None)
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;
        let loader = ash::khr::surface::Instance::new(entry, instance);
        Ok(Self { surface, loader })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether `queue_family` of `physical_device` can present here.
    ///
    /// # Safety
    /// The physical device must come from the surface's instance.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        self.loader
            .get_physical_device_surface_support(physical_device, queue_family, self.surface)
            .call("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    /// Query surface capabilities.
    ///
    /// # Safety
    /// The physical device must come from the surface's instance.
    pub unsafe fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilities> {
        let capabilities = self
            .loader
            .get_physical_device_surface_capabilities(physical_device, self.surface)
            .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = self
            .loader
            .get_physical_device_surface_formats(physical_device, self.surface)
            .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let present_modes = self
            .loader
            .get_physical_device_surface_present_modes(physical_device, self.surface)
            .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        Ok(SurfaceCapabilities {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created from it may remain.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.surface, None);
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
