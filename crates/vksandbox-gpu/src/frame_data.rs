//! Per-swapchain-image copies of a small block of shader data.
//!
//! [`BufferFrameData`] keeps one value on the host and one slot per buffered
//! frame in a device-local buffer. Updating a frame writes the value into the
//! matching slot of a host staging buffer, flushes just that slot and submits
//! a prerecorded copy into the device buffer. Slots already holding the value
//! are skipped.

use crate::blocks::align_up;
use crate::command::CommandPool;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::queue::Queue;
use crate::resources::Buffer;
use ash::vk;
use bytemuck::Pod;

/// Largest `minUniformBufferOffsetAlignment` a device may require.
pub const MAX_OFFSET_ALIGNMENT: u64 = 256;

/// Bytes between consecutive frame slots for a value of `size` bytes.
pub const fn slot_stride(size: u64) -> u64 {
    align_up(size, MAX_OFFSET_ALIGNMENT)
}

/// Whether frame slot `current` must be rewritten to hold `value`.
pub fn needs_upload(current: &[u8], value: &[u8], uninitialized: bool, force: bool) -> bool {
    force || uninitialized || current != value
}

/// A `T` buffered once per frame in device memory.
pub struct BufferFrameData<T: Pod> {
    value: T,
    stride: u64,
    device_buffer: Buffer,
    host_buffer: Buffer,
    pool: CommandPool,
    updates: Vec<vk::CommandBuffer>,
    uninitialized: Vec<bool>,
}

impl<T: Pod> BufferFrameData<T> {
    /// Create `frame_count` slots usable as `usage` (`TRANSFER_DST` is
    /// added). Updates must be submitted to a queue of `queue_family`.
    pub fn new(
        gpu: &GpuContext,
        frame_count: usize,
        usage: vk::BufferUsageFlags,
        queue_family: u32,
        initial: T,
    ) -> Result<Self> {
        let stride = slot_stride(Self::size());
        let total = stride * frame_count as u64;

        let device_buffer = gpu.create_and_bind_default_exclusive_device_buffer(
            total,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        let host_buffer = match gpu
            .create_and_bind_default_exclusive_host_buffer(total, vk::BufferUsageFlags::TRANSFER_SRC)
        {
            Ok(buffer) => buffer,
            Err(e) => {
                unsafe { device_buffer.destroy(gpu) };
                return Err(e);
            }
        };

        let device = gpu.device();
        let recorded = unsafe {
            CommandPool::new(device, queue_family, vk::CommandPoolCreateFlags::empty()).and_then(
                |pool| {
                    let updates = (0..frame_count as u64)
                        .map(|i| {
                            pool.allocate_recorded(
                                device,
                                vk::CommandBufferUsageFlags::empty(),
                                |cmd| {
                                    record_update(
                                        device,
                                        cmd,
                                        host_buffer.raw(),
                                        device_buffer.raw(),
                                        stride * i,
                                        Self::size(),
                                    );
                                },
                            )
                        })
                        .collect::<Result<Vec<_>>>();
                    match updates {
                        Ok(updates) => Ok((pool, updates)),
                        Err(e) => {
                            pool.destroy(device);
                            Err(e)
                        }
                    }
                },
            )
        };
        let (pool, updates) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                unsafe {
                    host_buffer.destroy(gpu);
                    device_buffer.destroy(gpu);
                }
                return Err(e);
            }
        };

        Ok(Self {
            value: initial,
            stride,
            device_buffer,
            host_buffer,
            pool,
            updates,
            uninitialized: vec![true; frame_count],
        })
    }

    pub fn data(&self) -> &T {
        &self.value
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// The device-local buffer shaders read.
    pub fn buffer(&self) -> vk::Buffer {
        self.device_buffer.raw()
    }

    /// Byte offset of frame `index` in [`Self::buffer`].
    pub fn offset_for_frame(&self, index: usize) -> u64 {
        self.stride * index as u64
    }

    /// Size of one value.
    pub fn size() -> u64 {
        std::mem::size_of::<T>() as u64
    }

    /// Bytes reserved per frame.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn frame_count(&self) -> usize {
        self.updates.len()
    }

    /// Make frame `index` hold the current value, submitting a copy on
    /// `queue` when it does not already. Returns whether a copy was
    /// submitted.
    ///
    /// # Safety
    /// `queue` must belong to the family given at creation, and the previous
    /// update of `index` must have finished.
    pub unsafe fn update(
        &mut self,
        gpu: &GpuContext,
        queue: &Queue,
        index: usize,
        force: bool,
    ) -> Result<bool> {
        let cmd = *self.updates.get(index).ok_or_else(|| {
            GpuError::InvalidState(format!(
                "frame {index} out of range for {} buffered frames",
                self.updates.len()
            ))
        })?;
        debug_assert_eq!(queue.family(), self.pool.queue_family());

        let offset = self.offset_for_frame(index);
        let value = bytemuck::bytes_of(&self.value);
        let current = self.host_buffer.bytes_at(offset, Self::size())?;
        if !needs_upload(current, value, self.uninitialized[index], force) {
            return Ok(false);
        }

        self.host_buffer.write_at(offset, std::slice::from_ref(&self.value))?;
        self.host_buffer.flush_range(gpu.device(), offset, self.stride)?;
        queue.submit(gpu.device(), &[cmd], &[], &[], &[], vk::Fence::null())?;
        self.uninitialized[index] = false;
        Ok(true)
    }

    /// # Safety
    /// No update may still be executing.
    pub unsafe fn destroy(self, gpu: &GpuContext) {
        let device = gpu.device();
        self.pool.free_command_buffers(device, &self.updates);
        self.pool.destroy(device);
        self.host_buffer.destroy(gpu);
        self.device_buffer.destroy(gpu);
    }
}

/// Copy one slot from the staging buffer and make it visible to shaders.
unsafe fn record_update(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    host: vk::Buffer,
    target: vk::Buffer,
    offset: u64,
    size: u64,
) {
    let barrier = |buffer: vk::Buffer, src_access: vk::AccessFlags, dst_access: vk::AccessFlags| {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(offset)
            .size(size)
    };

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::HOST,
        vk::PipelineStageFlags::TRANSFER,
        vk::DependencyFlags::empty(),
        &[],
        &[barrier(
            host,
            vk::AccessFlags::HOST_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        )],
        &[],
    );
    device.cmd_copy_buffer(
        cmd,
        host,
        target,
        &[vk::BufferCopy {
            src_offset: offset,
            dst_offset: offset,
            size,
        }],
    );
    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::ALL_COMMANDS,
        vk::DependencyFlags::empty(),
        &[],
        &[barrier(
            target,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::UNIFORM_READ,
        )],
        &[],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_offset_alignment() {
        assert_eq!(slot_stride(1), 256);
        assert_eq!(slot_stride(32), 256);
        assert_eq!(slot_stride(256), 256);
        assert_eq!(slot_stride(257), 512);
        assert_eq!(slot_stride(1000), 1024);
    }

    #[test]
    fn frame_slots_start_on_atom_boundaries() {
        let stride = slot_stride(80);
        for frame in 0..4u64 {
            assert_eq!((stride * frame) % crate::arena::MAX_NON_COHERENT_ATOM_SIZE, 0);
        }
    }

    #[test]
    fn upload_skipped_only_for_matching_initialized_slot() {
        let value = [1u8, 2, 3, 4];
        assert!(!needs_upload(&value, &value, false, false));
        assert!(needs_upload(&value, &value, true, false));
        assert!(needs_upload(&value, &value, false, true));
        assert!(needs_upload(&[1, 2, 3, 5], &value, false, false));
    }

    #[test]
    fn size_matches_value_type() {
        assert_eq!(BufferFrameData::<[f32; 4]>::size(), 16);
        assert_eq!(BufferFrameData::<[u32; 64]>::size(), 256);
    }
}
