//! The trait a sample implements, and the context it receives.

use crate::frame::{FrameContext, FrameTargets};
use ash::vk;
use vksandbox_gpu::{GpuContext, Queue};

/// Formats and geometry of the framework's render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderInfo {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub extent: vk::Extent2D,
}

impl RenderInfo {
    /// Full-target viewport with depth range `0..1`.
    #[allow(clippy::cast_precision_loss)]
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

/// What the framework exposes to a sample during every callback.
#[derive(Clone, Copy)]
pub struct SampleContext<'a> {
    gpu: &'a GpuContext,
    info: RenderInfo,
    swapchain_image_count: usize,
}

impl<'a> SampleContext<'a> {
    pub(crate) fn new(gpu: &'a GpuContext, info: RenderInfo, swapchain_image_count: usize) -> Self {
        Self {
            gpu,
            info,
            swapchain_image_count,
        }
    }

    /// Device, queues and memory arenas.
    pub fn gpu(&self) -> &'a GpuContext {
        self.gpu
    }

    pub fn device(&self) -> &'a ash::Device {
        self.gpu.device()
    }

    pub fn render_info(&self) -> RenderInfo {
        self.info
    }

    pub fn render_format(&self) -> vk::Format {
        self.info.color_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.info.depth_format
    }

    pub fn num_samples(&self) -> vk::SampleCountFlags {
        self.info.samples
    }

    pub fn viewport(&self) -> vk::Viewport {
        self.info.viewport()
    }

    pub fn scissor(&self) -> vk::Rect2D {
        self.info.scissor()
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain_image_count
    }
}

/// A sample driven by [`crate::Sample`].
///
/// The framework owns the swapchain, per-image synchronisation and the
/// resolve/present path. The sample owns its own pipelines, command buffers
/// and per-frame payload.
pub trait SampleApp: Sized {
    /// Per-swapchain-image state owned by the sample.
    type FrameData;

    /// Build the sample. `init_cmd` is recording and is submitted once all
    /// frame slots exist.
    fn initialize_application_data(
        ctx: &SampleContext<'_>,
        init_cmd: vk::CommandBuffer,
        swapchain_image_count: usize,
    ) -> anyhow::Result<Self>;

    /// Build the payload of slot `frame_index`.
    fn initialize_frame_data(
        &mut self,
        ctx: &SampleContext<'_>,
        targets: &FrameTargets,
        init_cmd: vk::CommandBuffer,
        frame_index: usize,
    ) -> anyhow::Result<Self::FrameData>;

    /// Called once the initialization commands have finished on the GPU.
    fn initialization_complete(&mut self, _ctx: &SampleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Advance simulation by `dt` seconds.
    fn update(&mut self, dt: f32);

    /// Submit this frame's work to `queue`.
    ///
    /// Submissions must not wait on or signal framework semaphores; ordering
    /// against the framework's setup and resolve work is by queue order.
    fn render(
        &mut self,
        ctx: &SampleContext<'_>,
        queue: &Queue,
        frame_index: usize,
        frame: FrameContext<'_, Self::FrameData>,
    ) -> anyhow::Result<()>;

    /// Release GPU resources. The device is idle; `frames` holds every
    /// slot's payload in slot order.
    fn cleanup(&mut self, _ctx: &SampleContext<'_>, _frames: Vec<Self::FrameData>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn viewport_covers_extent() {
        let info = RenderInfo {
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format: vk::Format::D16_UNORM,
            samples: vk::SampleCountFlags::TYPE_4,
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
        };
        let viewport = info.viewport();
        assert_relative_eq!(viewport.width, 1280.0);
        assert_relative_eq!(viewport.height, 720.0);
        assert_relative_eq!(viewport.max_depth, 1.0);

        let scissor = info.scissor();
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.extent.height, 720);
    }
}
