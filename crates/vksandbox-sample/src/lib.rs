//! Frame lifecycle driver for vksandbox samples.
//!
//! A sample implements [`SampleApp`]; the framework takes care of:
//! - Window, device and swapchain creation
//! - One frame slot per swapchain image with its fence and semaphores
//! - Optional depth buffer and 4x multisample target with resolve
//! - Queue ownership transfers when presenting from a separate queue family
//! - Frame timing with an optional fixed timestep
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use vksandbox_gpu::Queue;
//! use vksandbox_sample::{
//!     run_sample, FrameContext, FrameTargets, SampleApp, SampleConfig, SampleContext,
//! };
//!
//! struct Empty;
//!
//! impl SampleApp for Empty {
//!     type FrameData = ();
//!
//!     fn initialize_application_data(
//!         _ctx: &SampleContext<'_>,
//!         _init_cmd: vk::CommandBuffer,
//!         _swapchain_image_count: usize,
//!     ) -> anyhow::Result<Self> {
//!         Ok(Empty)
//!     }
//!
//!     fn initialize_frame_data(
//!         &mut self,
//!         _ctx: &SampleContext<'_>,
//!         _targets: &FrameTargets,
//!         _init_cmd: vk::CommandBuffer,
//!         _frame_index: usize,
//!     ) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, _dt: f32) {}
//!
//!     fn render(
//!         &mut self,
//!         _ctx: &SampleContext<'_>,
//!         _queue: &Queue,
//!         _frame_index: usize,
//!         _frame: FrameContext<'_, ()>,
//!     ) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_sample::<Empty>(SampleConfig::new("empty").with_env_args()?)
//! }
//! ```

pub mod app;
pub mod barriers;
pub mod clock;
pub mod driver;
pub mod frame;
pub mod lifecycle;
pub mod options;
pub mod plan;
mod runner;

pub use app::{RenderInfo, SampleApp, SampleContext};
pub use clock::{FrameClock, FrameTime, FIXED_TIMESTEP};
pub use driver::{Sample, DEPTH_FORMAT, MULTISAMPLE_COUNT};
pub use frame::{FrameContext, FrameSlot, FrameTargets};
pub use lifecycle::{FramePhase, SlotTracker};
pub use options::{SampleConfig, SampleOptions};
pub use plan::{FrameCommand, PlannedSubmission, QueueRole, SemaphoreRole, SubmissionPlan};
pub use runner::run_sample;

// Re-export commonly used types for convenience
pub use vksandbox_gpu::{ArenaSizes, DeviceRequirements, GpuContext, Queue};
