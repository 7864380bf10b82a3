//! Vulkan layer for the vksandbox sample harness.
//!
//! This crate provides:
//! - Instance, device and queue-role selection (render, present, async
//!   compute, sparse binding) against requested features and extensions
//! - Surface and swapchain handling
//! - Best-fit memory arenas over single device memory objects
//! - Arena-backed buffer and image factories
//! - Per-frame uniform data staged through the host arena
//! - Command buffer and synchronization helpers

pub mod arena;
pub mod blocks;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod frame_data;
pub mod instance;
pub mod queue;
pub mod requirements;
pub mod resources;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use arena::{Allocation, AllocationToken, VulkanArena};
pub use blocks::{BlockChain, BlockId, BlockInfo, Placement};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{record, rerecord, CommandPool};
pub use context::{GpuContext, GpuContextBuilder};
pub use error::{ArenaError, GpuError, Result, VkResultExt};
pub use frame_data::BufferFrameData;
pub use queue::Queue;
pub use requirements::DeviceRequirements;
pub use resources::{ArenaKind, ArenaSet, ArenaSizes, Buffer, Image};
pub use surface::{Surface, SurfaceCapabilities};
pub use swapchain::Swapchain;
pub use sync::{
    create_fence, create_semaphore, reset_fence, wait_and_reset_fence, wait_for_fence, WAIT_FOREVER,
};
