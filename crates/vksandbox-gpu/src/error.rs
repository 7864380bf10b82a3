//! GPU error types.

use ash::vk;
use thiserror::Error;

/// Arena allocation errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// No free block can hold the request. Arenas never grow.
    #[error("Arena exhausted: requested {requested} bytes, largest free block is {largest_free} bytes")]
    Exhausted { requested: u64, largest_free: u64 },
}

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// A named Vulkan entry point returned an unexpected status.
    #[error("{call} failed: {result}")]
    Call {
        call: &'static str,
        result: vk::Result,
    },

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No memory type matches the requested properties.
    #[error("No memory type with properties {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),

    /// Memory arena allocation failed.
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Attaches the failing entry point name to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn call(self, name: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn call(self, name: &'static str) -> Result<T> {
        self.map_err(|result| GpuError::Call { call: name, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_names_entry_point() {
        let raw: std::result::Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = raw.call("vkQueueSubmit").unwrap_err();
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
        assert!(matches!(
            err,
            GpuError::Call {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
    }

    #[test]
    fn arena_error_converts() {
        let err: GpuError = ArenaError::Exhausted {
            requested: 4096,
            largest_free: 1024,
        }
        .into();
        assert!(err.to_string().contains("4096"));
    }
}
