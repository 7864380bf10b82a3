//! Command pools and recording.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;

/// Pool of primary command buffers for one queue family.
///
/// Pools created with `RESET_COMMAND_BUFFER` allow per-buffer
/// re-recording through [`rerecord`].
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// # Safety
    /// The device must be valid and `queue_family` one of its families.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);
        let pool = device
            .create_command_pool(&create_info, None)
            .call("vkCreateCommandPool")?;
        Ok(Self { pool, queue_family })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Family whose queues may execute this pool's buffers.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let mut buffers = self.allocate_command_buffers(device, 1)?;
        buffers
            .pop()
            .ok_or_else(|| GpuError::Other("driver returned no command buffer".into()))
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        device
            .allocate_command_buffers(&alloc_info)
            .call("vkAllocateCommandBuffers")
    }

    /// Allocate a buffer and record `f` into it.
    ///
    /// # Safety
    /// The device must be valid and `f` must only record valid commands.
    pub unsafe fn allocate_recorded<F>(
        &self,
        device: &ash::Device,
        flags: vk::CommandBufferUsageFlags,
        f: F,
    ) -> Result<vk::CommandBuffer>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.allocate_command_buffer(device)?;
        if let Err(e) = record(device, cmd, flags, f) {
            self.free_command_buffers(device, &[cmd]);
            return Err(e);
        }
        Ok(cmd)
    }

    /// # Safety
    /// The buffers must come from this pool and not be pending.
    pub unsafe fn free_command_buffers(&self, device: &ash::Device, command_buffers: &[vk::CommandBuffer]) {
        if !command_buffers.is_empty() {
            device.free_command_buffers(self.pool, command_buffers);
        }
    }

    /// # Safety
    /// No buffer from the pool may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin `cmd`, record `f` into it, and end it.
///
/// # Safety
/// `cmd` must be in the initial state and `f` must only record valid commands.
pub unsafe fn record<F>(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    begin_command_buffer(device, cmd, flags)?;
    f(cmd);
    end_command_buffer(device, cmd)
}

/// Reset `cmd` and record `f` into it as a one-time submission.
///
/// # Safety
/// `cmd` must not be pending and its pool must allow individual resets.
pub unsafe fn rerecord<F>(device: &ash::Device, cmd: vk::CommandBuffer, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    device
        .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        .call("vkResetCommandBuffer")?;
    record(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, f)
}

/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device
        .begin_command_buffer(cmd, &begin_info)
        .call("vkBeginCommandBuffer")
}

/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd).call("vkEndCommandBuffer")
}
