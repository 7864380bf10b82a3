//! Best-fit block chain backing a memory arena.
//!
//! The chain partitions `[0, capacity)` into blocks ordered by offset. Blocks
//! live in a slot vector and link to their neighbours by [`BlockId`], so no
//! block ever holds a pointer into another. Free blocks are also indexed by
//! `(size, offset)` which gives a best-fit lookup with a deterministic
//! tie-break on the lowest offset.
//!
//! This type does no GPU work; [`crate::arena::VulkanArena`] wraps it around a
//! `vk::DeviceMemory`.

use std::collections::BTreeMap;

use crate::error::ArenaError;

/// Stable handle to a block in a [`BlockChain`].
///
/// The generation makes handles to recycled slots detectable, so a double
/// free cannot silently release someone else's allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: u64,
    size: u64,
    in_use: bool,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    block: Option<Block>,
}

/// Public view of one block, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: u64,
    pub size: u64,
    pub in_use: bool,
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// The in-use block.
    pub block: BlockId,
    /// Start of the block, including alignment padding.
    pub block_offset: u64,
    /// Size of the block, including alignment padding.
    pub block_size: u64,
    /// Aligned offset to bind resources at.
    pub offset: u64,
}

/// Offset-ordered block chain with a best-fit free index.
#[derive(Debug)]
pub struct BlockChain {
    capacity: u64,
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    head: BlockId,
    free_index: BTreeMap<(u64, u64), BlockId>,
    used_blocks: usize,
}

/// Round `value` up to a multiple of the power-of-two `alignment`.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + (alignment - 1)) & !(alignment - 1)
}

impl BlockChain {
    /// Create a chain holding a single free block spanning `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "arena capacity must be non-zero");

        let head = BlockId {
            index: 0,
            generation: 0,
        };
        let mut free_index = BTreeMap::new();
        free_index.insert((capacity, 0), head);

        Self {
            capacity,
            slots: vec![Slot {
                generation: 0,
                block: Some(Block {
                    offset: 0,
                    size: capacity,
                    in_use: false,
                    prev: None,
                    next: None,
                }),
            }],
            vacant: Vec::new(),
            head,
            free_index,
            used_blocks: 0,
        }
    }

    /// Total bytes covered by the chain.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of blocks currently in use.
    pub fn allocation_count(&self) -> usize {
        self.used_blocks
    }

    /// Sum of all free block sizes.
    pub fn free_bytes(&self) -> u64 {
        self.free_index.keys().map(|&(size, _)| size).sum()
    }

    /// Size of the largest free block, or zero if the chain is full.
    pub fn largest_free(&self) -> u64 {
        self.free_index
            .keys()
            .next_back()
            .map_or(0, |&(size, _)| size)
    }

    /// True when the chain is back to one free block covering everything.
    pub fn is_pristine(&self) -> bool {
        self.used_blocks == 0 && self.free_index.len() == 1 && {
            let head = self.get(self.head);
            head.next.is_none() && !head.in_use
        }
    }

    /// Walk the chain from the head.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let mut out = Vec::new();
        let mut cursor = Some(self.head);
        while let Some(id) = cursor {
            let block = self.get(id);
            out.push(BlockInfo {
                offset: block.offset,
                size: block.size,
                in_use: block.in_use,
            });
            cursor = block.next;
        }
        out
    }

    /// Reserve `size` bytes aligned to `alignment`.
    ///
    /// Picks the smallest free block with at least `size + alignment - 1`
    /// bytes, lowest offset first on ties. The used block takes the front of
    /// that block (padding included); any tail stays free.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<Placement, ArenaError> {
        assert!(alignment > 0, "alignment must be non-zero");
        assert!(
            alignment.is_power_of_two(),
            "alignment {alignment} is not a power of two"
        );
        assert!(size > 0, "allocation size must be non-zero");

        let exhausted = ArenaError::Exhausted {
            requested: size,
            largest_free: self.largest_free(),
        };
        let needed = size.checked_add(alignment - 1).ok_or(exhausted)?;

        let (&key, &id) = self
            .free_index
            .range((needed, 0)..)
            .next()
            .ok_or(exhausted)?;
        self.free_index.remove(&key);

        let block = self.get(id);
        let offset = align_up(block.offset, alignment);
        let taken = (offset - block.offset) + size;

        if taken == block.size {
            // The slot changes owner, so ids from before the last free must
            // stop matching it.
            let used = self.reissue(id);
            self.get_mut(used).in_use = true;
            self.used_blocks += 1;
            return Ok(Placement {
                block: used,
                block_offset: block.offset,
                block_size: block.size,
                offset,
            });
        }

        let used = self.insert_slot(Block {
            offset: block.offset,
            size: taken,
            in_use: true,
            prev: block.prev,
            next: Some(id),
        });

        match block.prev {
            Some(prev) => self.get_mut(prev).next = Some(used),
            None => self.head = used,
        }

        let residual = self.get_mut(id);
        residual.prev = Some(used);
        residual.offset += taken;
        residual.size -= taken;
        let residual_key = (residual.size, residual.offset);
        self.free_index.insert(residual_key, id);
        self.used_blocks += 1;

        Ok(Placement {
            block: used,
            block_offset: block.offset,
            block_size: taken,
            offset,
        })
    }

    /// Release a block, coalescing with free neighbours.
    ///
    /// # Panics
    /// If `id` is stale, belongs to another chain, or is already free.
    pub fn free(&mut self, id: BlockId) {
        let valid = self
            .slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_ref())
            .is_some_and(|block| block.in_use);
        assert!(valid, "free of unknown or already-free block {id:?}");

        self.get_mut(id).in_use = false;
        self.used_blocks -= 1;

        let mut current = id;

        // Fold into the previous block while it is free.
        while let Some(prev) = self.get(current).prev.filter(|&p| !self.get(p).in_use) {
            let merged = self.get(current);
            let prev_block = self.get(prev);
            self.free_index.remove(&(prev_block.size, prev_block.offset));

            let target = self.get_mut(prev);
            target.size += merged.size;
            target.next = merged.next;
            if let Some(next) = merged.next {
                self.get_mut(next).prev = Some(prev);
            }
            self.release_slot(current);
            current = prev;
        }

        // Then absorb following blocks while they are free.
        while let Some(next) = self.get(current).next.filter(|&n| !self.get(n).in_use) {
            let absorbed = self.get(next);
            self.free_index.remove(&(absorbed.size, absorbed.offset));

            let target = self.get_mut(current);
            target.size += absorbed.size;
            target.next = absorbed.next;
            if let Some(after) = absorbed.next {
                self.get_mut(after).prev = Some(current);
            }
            self.release_slot(next);
        }

        let block = self.get(current);
        self.free_index.insert((block.size, block.offset), current);
    }

    fn get(&self, id: BlockId) -> Block {
        let slot = &self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "stale block id");
        slot.block.expect("block id refers to a released slot")
    }

    fn get_mut(&mut self, id: BlockId) -> &mut Block {
        let slot = &mut self.slots[id.index as usize];
        debug_assert_eq!(slot.generation, id.generation, "stale block id");
        slot.block
            .as_mut()
            .expect("block id refers to a released slot")
    }

    /// Bump the generation of `id`'s slot and relink its neighbours.
    fn reissue(&mut self, id: BlockId) -> BlockId {
        let block = self.get(id);
        let slot = &mut self.slots[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let fresh = BlockId {
            index: id.index,
            generation: slot.generation,
        };

        match block.prev {
            Some(prev) => self.get_mut(prev).next = Some(fresh),
            None => self.head = fresh,
        }
        if let Some(next) = block.next {
            self.get_mut(next).prev = Some(fresh);
        }
        fresh
    }

    fn insert_slot(&mut self, block: Block) -> BlockId {
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.block = Some(block);
            BlockId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("block slot count overflow");
            self.slots.push(Slot {
                generation: 0,
                block: Some(block),
            });
            BlockId {
                index,
                generation: 0,
            }
        }
    }

    fn release_slot(&mut self, id: BlockId) {
        let slot = &mut self.slots[id.index as usize];
        slot.block = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);
    }
}
