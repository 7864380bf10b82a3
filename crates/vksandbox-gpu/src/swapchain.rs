//! Swapchain management.

use crate::context::GpuContext;
use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the context's surface.
    ///
    /// Images are exclusively owned by the render queue family; a separate
    /// present queue takes them over with explicit ownership transfers.
    ///
    /// # Safety
    /// The context must have been built with a surface.
    pub unsafe fn new(ctx: &GpuContext, width: u32, height: u32, vsync: bool) -> Result<Self> {
        let surface = ctx
            .surface()
            .ok_or_else(|| GpuError::SwapchainCreation("context has no surface".to_string()))?;
        let loader = ctx.swapchain_loader()?;
        let device = ctx.device();

        let caps = surface.capabilities(ctx.physical_device())?;
        let surface_format = select_surface_format(&caps.formats)
            .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))?;
        let present_mode = select_present_mode(&caps.present_modes, vsync);
        let extent = calculate_extent(&caps.capabilities, width, height);
        let image_count = select_image_count(&caps.capabilities);
        let usage = swapchain_usage(caps.capabilities.supported_usage_flags)?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = loader
            .get_swapchain_images(swapchain)
            .call("vkGetSwapchainImagesKHR")?;

        let image_views = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device
                    .create_image_view(&view_info, None)
                    .call("vkCreateImageView")
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            images = images.len(),
            format = ?surface_format.format,
            ?present_mode,
            width = extent.width,
            height = extent.height,
            "Swapchain created"
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    ///
    /// # Safety
    /// All handles must be valid and `semaphore` unsignaled with no pending
    /// signal.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<u32> {
        let (index, suboptimal) = swapchain_loader
            .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
            .call("vkAcquireNextImageKHR")?;
        if suboptimal {
            tracing::warn!(index, "Acquired image from a suboptimal swapchain");
        }
        Ok(index)
    }

    /// Destroy the swapchain.
    ///
    /// # Safety
    /// All handles must be valid and swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

/// Usage of every swapchain image: rendered to, and the target of resolves
/// and clears.
pub const SWAPCHAIN_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// [`SWAPCHAIN_USAGE`], if the surface supports all of it.
pub fn swapchain_usage(supported: vk::ImageUsageFlags) -> Result<vk::ImageUsageFlags> {
    if supported.contains(SWAPCHAIN_USAGE) {
        Ok(SWAPCHAIN_USAGE)
    } else {
        Err(GpuError::SwapchainCreation(format!(
            "surface supports {supported:?}, needs {SWAPCHAIN_USAGE:?}"
        )))
    }
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

/// Prefer sRGB BGRA8, else the first format offered.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            select_surface_format(&available).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(
            select_surface_format(&available[..1]).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_fallbacks() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&all[..1], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_clamps_only_when_surface_is_undefined() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        assert_eq!(calculate_extent(&caps, 2000, 10).width, 640);

        caps.current_extent.width = u32::MAX;
        let extent = calculate_extent(&caps, 2000, 10);
        assert_eq!((extent.width, extent.height), (1024, 10));
    }

    #[test]
    fn usage_requires_transfer_dst_support() {
        let full = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC;
        assert_eq!(swapchain_usage(full).unwrap(), SWAPCHAIN_USAGE);

        let err = swapchain_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT).unwrap_err();
        assert!(matches!(err, GpuError::SwapchainCreation(_)));
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(select_image_count(&caps), 2);
    }
}
