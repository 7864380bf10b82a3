//! Fences and semaphores.

use crate::error::{Result, VkResultExt};
use ash::vk;

/// Timeout for every blocking wait the harness makes.
pub const WAIT_FOREVER: u64 = u64::MAX;

/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    device
        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        .call("vkCreateSemaphore")
}

/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    device
        .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        .call("vkCreateFence")
}

/// Block until `fence` signals or `timeout_ns` passes.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    device
        .wait_for_fences(&[fence], true, timeout_ns)
        .call("vkWaitForFences")
}

/// # Safety
/// The fence must not be pending.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence]).call("vkResetFences")
}

/// Wait for `fence` without a timeout, then unsignal it so it can be handed
/// to the next submission.
///
/// # Safety
/// The fence must have been submitted, otherwise this never returns.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_and_reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    wait_for_fence(device, fence, WAIT_FOREVER)?;
    reset_fence(device, fence)
}
