//! Fixed-capacity memory arenas over a single `vk::DeviceMemory`.

use crate::blocks::{align_up, BlockChain, BlockId};
use crate::error::{ArenaError, GpuError, Result, VkResultExt};
use ash::vk;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Largest `nonCoherentAtomSize` a conforming implementation may report.
///
/// Mapped arenas align and size every allocation to this so flush and
/// invalidate ranges never straddle another allocation's atom.
pub const MAX_NON_COHERENT_ATOM_SIZE: u64 = 256;

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Proof of an allocation, returned to the arena on free.
///
/// Deliberately not `Clone`: each token frees exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct AllocationToken {
    arena: u32,
    block: BlockId,
}

/// A bound region of an arena.
#[derive(Debug)]
pub struct Allocation {
    pub token: AllocationToken,
    /// Backing memory object.
    pub memory: vk::DeviceMemory,
    /// Offset to pass to `vkBind*Memory`.
    pub offset: u64,
    /// Size reserved, after any atom rounding.
    pub size: u64,
    /// Host pointer to `offset` when the arena is mapped.
    pub mapped_ptr: Option<NonNull<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct MappedBase(NonNull<u8>);

// SAFETY: the pointer is the persistent mapping of memory the arena owns. The
// arena only offsets it; reads and writes happen through `Buffer`.
unsafe impl Send for MappedBase {}
// SAFETY: see above.
unsafe impl Sync for MappedBase {}

/// Sizes tried when allocating the backing memory.
///
/// Each retry is 75% of the previous attempt; retries stop once an attempt
/// is no longer above a quarter of `requested`.
pub fn retry_sizes(requested: u64) -> impl Iterator<Item = u64> {
    std::iter::successors(Some(requested), move |&size| {
        (size > requested / 4).then_some(size / 4 * 3 + (size % 4) * 3 / 4)
    })
    .filter(|&size| size > 0)
}

/// Alignment and size a mapped arena actually reserves for a request.
pub const fn mapped_request(size: u64, alignment: u64) -> (u64, u64) {
    let alignment = if alignment > MAX_NON_COHERENT_ATOM_SIZE {
        alignment
    } else {
        MAX_NON_COHERENT_ATOM_SIZE
    };
    (align_up(size, MAX_NON_COHERENT_ATOM_SIZE), alignment)
}

/// Best-fit sub-allocator over one device memory object. Never grows.
pub struct VulkanArena {
    id: u32,
    name: &'static str,
    memory: vk::DeviceMemory,
    memory_type_index: u32,
    capacity: u64,
    mapped: Option<MappedBase>,
    chain: Mutex<BlockChain>,
}

impl VulkanArena {
    /// Allocate the backing memory, shrinking the request on
    /// `ERROR_OUT_OF_DEVICE_MEMORY`.
    ///
    /// # Safety
    /// The device must be valid and `memory_type_index` must be one of its
    /// memory types.
    pub unsafe fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        name: &'static str,
        requested: u64,
        memory_type_index: u32,
        map: bool,
    ) -> Result<Self> {
        let heap_index = memory_properties.memory_types[memory_type_index as usize].heap_index;
        let heap_size = memory_properties.memory_heaps[heap_index as usize].size;
        tracing::info!(
            arena = name,
            requested,
            heap_size,
            memory_type_index,
            "Allocating arena"
        );

        let mut last_error = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
        let mut allocated = None;
        for size in retry_sizes(requested) {
            let info = vk::MemoryAllocateInfo::default()
                .allocation_size(size)
                .memory_type_index(memory_type_index);
            match device.allocate_memory(&info, None) {
                Ok(memory) => {
                    allocated = Some((memory, size));
                    break;
                }
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => {
                    tracing::info!(
                        arena = name,
                        size,
                        "Out of device memory, retrying with 75% of the request"
                    );
                }
                Err(e) => {
                    last_error = e;
                    break;
                }
            }
        }

        let (memory, capacity) = allocated.ok_or(GpuError::Call {
            call: "vkAllocateMemory",
            result: last_error,
        })?;

        if capacity != requested {
            tracing::warn!(arena = name, requested, capacity, "Arena allocated smaller than requested");
        }

        let mapped = if map {
            let ptr = device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .call("vkMapMemory");
            match ptr {
                Ok(ptr) => NonNull::new(ptr.cast::<u8>()).map(MappedBase),
                Err(e) => {
                    device.free_memory(memory, None);
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            name,
            memory,
            memory_type_index,
            capacity,
            mapped,
            chain: Mutex::new(BlockChain::new(capacity)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Bytes actually backing the arena, after any elastic shrinking.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.chain.lock().allocation_count()
    }

    /// Size of the largest free block.
    pub fn largest_free(&self) -> u64 {
        self.chain.lock().largest_free()
    }

    /// Reserve `size` bytes at `alignment`.
    ///
    /// # Panics
    /// If `alignment` is not a power of two.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip(self)))]
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
    ) -> std::result::Result<Allocation, ArenaError> {
        assert!(
            alignment.is_power_of_two(),
            "arena '{}': alignment {alignment} is not a power of two",
            self.name
        );
        let (size, alignment) = if self.mapped.is_some() {
            mapped_request(size, alignment)
        } else {
            (size, alignment)
        };

        let placement = self.chain.lock().allocate(size, alignment).inspect_err(|e| {
            tracing::error!(arena = self.name, "{e}");
        })?;

        tracing::trace!(
            arena = self.name,
            offset = placement.offset,
            size,
            "Allocated"
        );

        let mapped_ptr = self.mapped.map(|base| {
            // SAFETY: offset lies inside the mapped range of `capacity` bytes.
            unsafe { NonNull::new_unchecked(base.0.as_ptr().add(placement.offset as usize)) }
        });

        Ok(Allocation {
            token: AllocationToken {
                arena: self.id,
                block: placement.block,
            },
            memory: self.memory,
            offset: placement.offset,
            size,
            mapped_ptr,
        })
    }

    /// Return an allocation's block to the arena.
    ///
    /// # Panics
    /// If the token came from a different arena or was already freed.
    pub fn free(&self, token: AllocationToken) {
        assert_eq!(
            token.arena, self.id,
            "token from arena #{} freed into arena '{}' (#{})",
            token.arena, self.name, self.id
        );
        self.chain.lock().free(token.block);
    }

    /// Unmap and free the backing memory.
    ///
    /// # Panics
    /// If any allocation is still outstanding.
    ///
    /// # Safety
    /// The device must be valid and nothing may still use the memory.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        let chain = self.chain.lock();
        assert!(
            chain.is_pristine(),
            "arena '{}' destroyed with {} outstanding allocation(s)",
            self.name,
            chain.allocation_count()
        );
        if self.mapped.is_some() {
            device.unmap_memory(self.memory);
        }
        device.free_memory(self.memory, None);
        tracing::debug!(arena = self.name, "Arena destroyed");
    }
}
