//! Arena-backed buffers and images.
//!
//! The device owns four arenas. Every buffer or image the harness creates is
//! bound into one of them and must be released through `destroy`, which frees
//! its block back to the arena that produced it.

use crate::arena::{Allocation, VulkanArena, MAX_NON_COHERENT_ATOM_SIZE};
use crate::blocks::align_up;
use crate::capabilities::GpuCapabilities;
use crate::context::GpuContext;
use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use bytemuck::Pod;

const MIB: u64 = 1024 * 1024;

/// Every buffer usage bit up to and including `INDIRECT_BUFFER`.
pub const ALL_BUFFER_USAGES: vk::BufferUsageFlags =
    vk::BufferUsageFlags::from_raw((vk::BufferUsageFlags::INDIRECT_BUFFER.as_raw() << 1) - 1);

/// Arena capacities in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSizes {
    pub host_mb: u32,
    pub device_image_mb: u32,
    pub device_buffer_mb: u32,
    pub coherent_mb: u32,
}

impl Default for ArenaSizes {
    fn default() -> Self {
        Self {
            host_mb: 1,
            device_image_mb: 64,
            device_buffer_mb: 1,
            coherent_mb: 1,
        }
    }
}

impl ArenaSizes {
    /// Requested bytes for `kind`.
    pub fn bytes(&self, kind: ArenaKind) -> u64 {
        let mb = match kind {
            ArenaKind::Host => self.host_mb,
            ArenaKind::Coherent => self.coherent_mb,
            ArenaKind::DeviceBuffer => self.device_buffer_mb,
            ArenaKind::DeviceImage => self.device_image_mb,
        };
        u64::from(mb) * MIB
    }
}

/// Which arena a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaKind {
    Host,
    Coherent,
    DeviceBuffer,
    DeviceImage,
}

impl ArenaKind {
    /// Creation and destruction order.
    pub const ALL: [Self; 4] = [
        Self::Host,
        Self::Coherent,
        Self::DeviceBuffer,
        Self::DeviceImage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Coherent => "coherent",
            Self::DeviceBuffer => "device-buffer",
            Self::DeviceImage => "device-image",
        }
    }

    /// Host-visible arenas stay persistently mapped.
    pub fn is_mapped(self) -> bool {
        matches!(self, Self::Host | Self::Coherent)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// The four arenas of a device, indexed by [`ArenaKind`].
pub struct ArenaSet {
    arenas: Vec<VulkanArena>,
}

impl ArenaSet {
    /// Pick memory types from scratch resources and allocate every arena.
    ///
    /// # Safety
    /// The device must be valid and belong to `capabilities`' physical device.
    pub(crate) unsafe fn new(
        device: &ash::Device,
        capabilities: &GpuCapabilities,
        sizes: ArenaSizes,
    ) -> Result<Self> {
        let memory_properties = &capabilities.memory_properties;

        let host_type = discover_buffer_memory_type(
            device,
            capabilities,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;
        let coherent_type = discover_buffer_memory_type(
            device,
            capabilities,
            ALL_BUFFER_USAGES,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let device_buffer_type = discover_buffer_memory_type(
            device,
            capabilities,
            ALL_BUFFER_USAGES,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let device_image_type = discover_image_memory_type(device, capabilities)?;

        let memory_types = [host_type, coherent_type, device_buffer_type, device_image_type];
        let arenas = build_all(
            ArenaKind::ALL.len(),
            |i| {
                let kind = ArenaKind::ALL[i];
                unsafe {
                    VulkanArena::new(
                        device,
                        memory_properties,
                        kind.name(),
                        sizes.bytes(kind),
                        memory_types[i],
                        kind.is_mapped(),
                    )
                }
            },
            // Nothing is allocated from them yet, so they are pristine.
            |arena| unsafe { arena.destroy(device) },
        )?;

        Ok(Self { arenas })
    }

    pub fn get(&self, kind: ArenaKind) -> &VulkanArena {
        &self.arenas[kind.index()]
    }

    /// # Safety
    /// Nothing may still use arena memory.
    pub(crate) unsafe fn destroy(&self, device: &ash::Device) {
        for arena in &self.arenas {
            arena.destroy(device);
        }
    }
}

/// Run `build` for `0..count`. If one fails, `release` everything already
/// built, newest first, and return that error.
fn build_all<T>(
    count: usize,
    mut build: impl FnMut(usize) -> Result<T>,
    mut release: impl FnMut(&T),
) -> Result<Vec<T>> {
    let mut built = Vec::with_capacity(count);
    for i in 0..count {
        match build(i) {
            Ok(item) => built.push(item),
            Err(e) => {
                built.iter().rev().for_each(&mut release);
                return Err(e);
            }
        }
    }
    Ok(built)
}

/// Widen `offset..offset + size` to whole non-coherent atoms, clamped to
/// `limit`. Returns `(offset, size)` relative to the same base.
///
/// Mapped allocations start on an atom boundary and span whole atoms, so the
/// widened range never reaches into a neighbouring allocation.
pub fn atom_range(offset: u64, size: u64, limit: u64) -> (u64, u64) {
    let start = offset & !(MAX_NON_COHERENT_ATOM_SIZE - 1);
    let end = align_up(offset + size, MAX_NON_COHERENT_ATOM_SIZE).min(limit);
    (start, end.saturating_sub(start))
}

unsafe fn discover_buffer_memory_type(
    device: &ash::Device,
    capabilities: &GpuCapabilities,
    usage: vk::BufferUsageFlags,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let info = vk::BufferCreateInfo::default()
        .size(1)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = device.create_buffer(&info, None).call("vkCreateBuffer")?;
    let requirements = device.get_buffer_memory_requirements(buffer);
    device.destroy_buffer(buffer, None);

    capabilities
        .find_memory_type(requirements.memory_type_bits, required)
        .ok_or(GpuError::NoMemoryType(required))
}

unsafe fn discover_image_memory_type(
    device: &ash::Device,
    capabilities: &GpuCapabilities,
) -> Result<u32> {
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .extent(vk::Extent3D {
            width: 1,
            height: 1,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let image = device.create_image(&info, None).call("vkCreateImage")?;
    let requirements = device.get_image_memory_requirements(image);
    device.destroy_image(image, None);

    capabilities
        .find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or(GpuError::NoMemoryType(vk::MemoryPropertyFlags::DEVICE_LOCAL))
}

/// A buffer bound into one of the device arenas.
pub struct Buffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    arena: ArenaKind,
    size: u64,
}

impl Buffer {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size reported by the buffer's memory requirements.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn arena(&self) -> ArenaKind {
        self.arena
    }

    /// Host address of the buffer, if its arena is mapped.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation.mapped_ptr.map(std::ptr::NonNull::as_ptr)
    }

    fn mapped_range(&self, offset: u64, size: u64) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default()
            .memory(self.allocation.memory)
            .offset(self.allocation.offset + offset)
            .size(size)
    }

    /// Make host writes to the whole buffer visible to the device.
    ///
    /// # Safety
    /// The device must own the buffer's memory.
    pub unsafe fn flush(&self, device: &ash::Device) -> Result<()> {
        self.flush_range(device, 0, self.allocation.size)
    }

    /// Flush `size` bytes starting `offset` bytes into the buffer. The range
    /// is widened to whole atoms.
    ///
    /// # Safety
    /// The device must own the buffer's memory.
    pub unsafe fn flush_range(&self, device: &ash::Device, offset: u64, size: u64) -> Result<()> {
        if self.allocation.mapped_ptr.is_none() || size == 0 {
            return Ok(());
        }
        self.check_range(offset, size)?;
        let (offset, size) = atom_range(offset, size, self.allocation.size);
        device
            .flush_mapped_memory_ranges(&[self.mapped_range(offset, size)])
            .call("vkFlushMappedMemoryRanges")
    }

    /// Make device writes to the buffer visible to the host.
    ///
    /// # Safety
    /// The device must own the buffer's memory.
    pub unsafe fn invalidate(&self, device: &ash::Device) -> Result<()> {
        if self.allocation.mapped_ptr.is_none() {
            return Ok(());
        }
        device
            .invalidate_mapped_memory_ranges(&[self.mapped_range(0, self.allocation.size)])
            .call("vkInvalidateMappedMemoryRanges")
    }

    /// Copy `data` to the start of the buffer. Call [`Self::flush`] afterwards
    /// for non-coherent memory.
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write_at(0, data)
    }

    /// Copy `data` into the buffer at `offset` bytes.
    pub fn write_at<T: Pod>(&self, offset: u64, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        self.check_range(offset, bytes.len() as u64)?;

        // SAFETY: the range was checked against the allocation, which lies
        // inside the arena's persistent mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Host view of `len` bytes at `offset`. Device writes are only visible
    /// after [`Self::invalidate`].
    pub fn bytes_at(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        self.check_range(offset, len)?;

        // SAFETY: the range lies inside the allocation's persistent mapping,
        // which lives as long as `self`.
        Ok(unsafe { std::slice::from_raw_parts(ptr.add(offset as usize).cast_const(), len as usize) })
    }

    /// Invalidate, then copy the buffer's contents out as `u32` words.
    ///
    /// # Safety
    /// The device must own the buffer's memory and have finished writing it.
    pub unsafe fn read_u32s(&self, device: &ash::Device) -> Result<Vec<u32>> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        self.invalidate(device)?;

        let bytes = std::slice::from_raw_parts(ptr.cast_const(), self.size as usize);
        Ok(bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect())
    }

    fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        let end = offset
            .checked_add(size)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.allocation.size {
            return Err(GpuError::InvalidState(format!(
                "Range {offset}..{end} exceeds buffer of {} bytes",
                self.allocation.size
            )));
        }
        Ok(())
    }

    /// Destroy the buffer and free its block.
    ///
    /// # Safety
    /// The buffer must not be in use by the device.
    pub unsafe fn destroy(self, ctx: &GpuContext) {
        ctx.device().destroy_buffer(self.buffer, None);
        ctx.arenas().get(self.arena).free(self.allocation.token);
    }
}

/// An image bound into the device-image arena.
pub struct Image {
    image: vk::Image,
    allocation: Allocation,
    format: vk::Format,
    extent: vk::Extent3D,
    samples: vk::SampleCountFlags,
}

impl Image {
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Destroy the image and free its block.
    ///
    /// # Safety
    /// The image must not be in use by the device and its views must be gone.
    pub unsafe fn destroy(self, ctx: &GpuContext) {
        ctx.device().destroy_image(self.image, None);
        ctx.arenas()
            .get(ArenaKind::DeviceImage)
            .free(self.allocation.token);
    }
}

impl GpuContext {
    /// Create an image and bind it into the device-image arena.
    pub fn create_and_bind_image(&self, create_info: &vk::ImageCreateInfo) -> Result<Image> {
        let device = self.device();
        let arena = self.arenas().get(ArenaKind::DeviceImage);
        unsafe {
            let image = device
                .create_image(create_info, None)
                .call("vkCreateImage")?;
            let requirements = device.get_image_memory_requirements(image);

            let allocation = match arena.allocate(requirements.size, requirements.alignment) {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.destroy_image(image, None);
                    return Err(e.into());
                }
            };

            if let Err(e) = device
                .bind_image_memory(image, allocation.memory, allocation.offset)
                .call("vkBindImageMemory")
            {
                device.destroy_image(image, None);
                arena.free(allocation.token);
                return Err(e);
            }

            Ok(Image {
                image,
                allocation,
                format: create_info.format,
                extent: create_info.extent,
                samples: create_info.samples,
            })
        }
    }

    /// Create a view of `image` using the image's own format.
    pub fn create_image_view(
        &self,
        image: &Image,
        view_type: vk::ImageViewType,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image.raw())
            .view_type(view_type)
            .format(image.format())
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(subresource_range);
        unsafe {
            self.device()
                .create_image_view(&info, None)
                .call("vkCreateImageView")
        }
    }

    fn create_and_bind_buffer(
        &self,
        kind: ArenaKind,
        create_info: &vk::BufferCreateInfo,
    ) -> Result<Buffer> {
        let device = self.device();
        let arena = self.arenas().get(kind);
        unsafe {
            let buffer = device
                .create_buffer(create_info, None)
                .call("vkCreateBuffer")?;
            let requirements = device.get_buffer_memory_requirements(buffer);

            let allocation = match arena.allocate(requirements.size, requirements.alignment) {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.destroy_buffer(buffer, None);
                    return Err(e.into());
                }
            };

            if let Err(e) = device
                .bind_buffer_memory(buffer, allocation.memory, allocation.offset)
                .call("vkBindBufferMemory")
            {
                device.destroy_buffer(buffer, None);
                arena.free(allocation.token);
                return Err(e);
            }

            Ok(Buffer {
                buffer,
                allocation,
                arena: kind,
                size: requirements.size,
            })
        }
    }

    /// Buffer in host-visible, non-coherent memory.
    pub fn create_and_bind_host_buffer(&self, create_info: &vk::BufferCreateInfo) -> Result<Buffer> {
        self.create_and_bind_buffer(ArenaKind::Host, create_info)
    }

    /// Buffer in host-coherent memory.
    pub fn create_and_bind_coherent_buffer(
        &self,
        create_info: &vk::BufferCreateInfo,
    ) -> Result<Buffer> {
        self.create_and_bind_buffer(ArenaKind::Coherent, create_info)
    }

    /// Buffer in device-local memory.
    pub fn create_and_bind_device_buffer(
        &self,
        create_info: &vk::BufferCreateInfo,
    ) -> Result<Buffer> {
        self.create_and_bind_buffer(ArenaKind::DeviceBuffer, create_info)
    }

    pub fn create_and_bind_default_exclusive_host_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        self.create_and_bind_host_buffer(&default_exclusive(size, usage))
    }

    pub fn create_and_bind_default_exclusive_coherent_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        self.create_and_bind_coherent_buffer(&default_exclusive(size, usage))
    }

    pub fn create_and_bind_default_exclusive_device_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        self.create_and_bind_device_buffer(&default_exclusive(size, usage))
    }
}

fn default_exclusive(size: u64, usage: vk::BufferUsageFlags) -> vk::BufferCreateInfo<'static> {
    vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_buffer_usages_cover_core_bits() {
        for usage in [
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::BufferUsageFlags::INDIRECT_BUFFER,
        ] {
            assert!(ALL_BUFFER_USAGES.contains(usage));
        }
        assert!(!ALL_BUFFER_USAGES.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
    }

    #[test]
    fn atom_range_widens_to_whole_atoms() {
        assert_eq!(atom_range(4, 10, 1024), (0, 256));
        assert_eq!(atom_range(250, 10, 1024), (0, 512));
        assert_eq!(atom_range(256, 256, 1024), (256, 256));
        assert_eq!(atom_range(300, 1, 1024), (256, 256));
    }

    #[test]
    fn atom_range_is_clamped_to_allocation() {
        // A 768-byte allocation: the last atom ends exactly at the limit.
        assert_eq!(atom_range(700, 60, 768), (512, 256));
        assert_eq!(atom_range(0, 768, 768), (0, 768));
    }

    #[test]
    fn build_all_releases_built_items_on_failure() {
        let mut released = Vec::new();
        let result = build_all(
            4,
            |i| {
                if i == 2 {
                    Err(GpuError::NoMemoryType(vk::MemoryPropertyFlags::DEVICE_LOCAL))
                } else {
                    Ok(i)
                }
            },
            |&item| released.push(item),
        );
        assert!(matches!(result, Err(GpuError::NoMemoryType(_))));
        assert_eq!(released, vec![1, 0]);
    }

    #[test]
    fn build_all_keeps_everything_on_success() {
        let mut released = 0;
        let built = build_all(4, |i| Ok(i * 10), |_| released += 1).unwrap();
        assert_eq!(built, vec![0, 10, 20, 30]);
        assert_eq!(released, 0);
    }

    #[test]
    fn arena_kinds_index_in_creation_order() {
        for (i, kind) in ArenaKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert!(ArenaKind::Host.is_mapped());
        assert!(!ArenaKind::DeviceImage.is_mapped());
        assert_eq!(ArenaSizes::default().bytes(ArenaKind::DeviceImage), 64 * MIB);
    }

    #[test]
    fn default_arena_sizes() {
        let sizes = ArenaSizes::default();
        assert_eq!(sizes.host_mb, 1);
        assert_eq!(sizes.device_image_mb, 64);
        assert_eq!(sizes.device_buffer_mb, 1);
        assert_eq!(sizes.coherent_mb, 1);
    }
}
