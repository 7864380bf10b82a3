//! Device queue wrapper.

use crate::error::{GpuError, Result, VkResultExt};
use crate::sync::{create_fence, wait_for_fence, WAIT_FOREVER};
use ash::vk;

/// A device queue together with the family it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    handle: vk::Queue,
    family: u32,
    index: u32,
}

impl Queue {
    /// Fetch queue `index` of `family`.
    ///
    /// # Safety
    /// The device must have been created with that queue.
    pub unsafe fn get(device: &ash::Device, family: u32, index: u32) -> Self {
        Self {
            handle: device.get_device_queue(family, index),
            family,
            index,
        }
    }

    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Submit one batch.
    ///
    /// # Safety
    /// All handles must be valid and the command buffers fully recorded.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn submit(
        &self,
        device: &ash::Device,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<()> {
        assert_eq!(
            wait_semaphores.len(),
            wait_stages.len(),
            "every wait semaphore needs a stage mask"
        );
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(command_buffers)
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .signal_semaphores(signal_semaphores);

        device
            .queue_submit(self.handle, &[submit_info], fence)
            .call("vkQueueSubmit")
    }

    /// Submit `command_buffers` with a fence of their own and block until
    /// they finish.
    ///
    /// # Safety
    /// The command buffers must be fully recorded.
    pub unsafe fn submit_and_wait(
        &self,
        device: &ash::Device,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let fence = create_fence(device, false)?;
        let result = self
            .submit(device, command_buffers, &[], &[], &[], fence)
            .and_then(|()| wait_for_fence(device, fence, WAIT_FOREVER));
        device.destroy_fence(fence, None);
        result
    }

    /// Signal `fence` once all previously submitted work completes.
    ///
    /// # Safety
    /// The fence must be unsignaled and not pending.
    pub unsafe fn submit_empty_with_fence(&self, device: &ash::Device, fence: vk::Fence) -> Result<()> {
        device
            .queue_submit(self.handle, &[], fence)
            .call("vkQueueSubmit")
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait_idle(&self, device: &ash::Device) -> Result<()> {
        device.queue_wait_idle(self.handle).call("vkQueueWaitIdle")
    }

    /// Present `image_index` of `swapchain` once `wait_semaphores` signal.
    ///
    /// A suboptimal swapchain is reported but still counts as presented.
    ///
    /// # Safety
    /// All handles must be valid and the queue must support presentation.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(self.handle, &present_info) {
            Ok(false) => Ok(()),
            Ok(true) => {
                tracing::warn!(image_index, "Swapchain is suboptimal");
                Ok(())
            }
            Err(result) => Err(GpuError::Call {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }
}
