//! Frame lifecycle driver.
//!
//! [`Sample`] owns the GPU context and swapchain, builds one frame slot per
//! swapchain image and replays a [`SubmissionPlan`] every frame around the
//! sample's own render submissions.

use crate::app::{RenderInfo, SampleApp, SampleContext};
use crate::barriers::{self, QueueFamilies, SlotImages};
use crate::clock::FrameClock;
use crate::frame::{resolve_step, FrameSlot, FrameTargets, OwnedTarget, SlotCommands, SlotSync};
use crate::lifecycle::SlotTracker;
use crate::options::{SampleConfig, SampleOptions};
use crate::plan::{FrameCommand, QueueRole, SubmissionPlan};
use anyhow::{anyhow, Context};
use ash::vk;
use vksandbox_gpu::command::{begin_command_buffer, end_command_buffer};
use vksandbox_gpu::{
    create_fence, create_semaphore, wait_and_reset_fence, CommandPool, GpuContext, Queue, Swapchain,
    WAIT_FOREVER,
};

/// Format of the optional depth attachment.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// Sample count of the multisample target.
pub const MULTISAMPLE_COUNT: vk::SampleCountFlags = vk::SampleCountFlags::TYPE_4;

/// Drives a [`SampleApp`] through initialization, frames and teardown.
pub struct Sample<A: SampleApp> {
    gpu: GpuContext,
    swapchain: Swapchain,
    options: SampleOptions,
    info: RenderInfo,
    families: QueueFamilies,
    plan: SubmissionPlan,
    render_pool: CommandPool,
    present_pool: Option<CommandPool>,
    slots: Vec<FrameSlot<A::FrameData>>,
    tracker: SlotTracker,
    clock: FrameClock,
    frame_count: u64,
    app: Option<A>,
    destroyed: bool,
}

impl<A: SampleApp> Sample<A> {
    /// Take ownership of a context with a surface and its swapchain.
    pub fn new(gpu: GpuContext, swapchain: Swapchain, config: &SampleConfig) -> anyhow::Result<Self> {
        let families = QueueFamilies {
            render: gpu.render_queue().family(),
            present: gpu.present_queue().family(),
        };
        let info = RenderInfo {
            color_format: swapchain.format,
            depth_format: DEPTH_FORMAT,
            samples: if config.options.multisampling {
                MULTISAMPLE_COUNT
            } else {
                vk::SampleCountFlags::TYPE_1
            },
            extent: swapchain.extent,
        };

        let device = gpu.device();
        let render_pool = unsafe {
            CommandPool::new(
                device,
                families.render,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };
        let present_pool = if families.separate() {
            Some(unsafe {
                CommandPool::new(
                    device,
                    families.present,
                    vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                )?
            })
        } else {
            None
        };

        tracing::info!(
            format = ?info.color_format,
            extent = ?info.extent,
            samples = ?info.samples,
            separate_present = families.separate(),
            images = swapchain.image_count(),
            "Sample created"
        );

        Ok(Self {
            plan: SubmissionPlan::for_topology(families.separate()),
            tracker: SlotTracker::new(swapchain.image_count()),
            clock: FrameClock::new(config.fixed_timestep),
            options: config.options,
            gpu,
            swapchain,
            info,
            families,
            render_pool,
            present_pool,
            slots: Vec::new(),
            frame_count: 0,
            app: None,
            destroyed: false,
        })
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Context handed to the sample's callbacks.
    pub fn context(&self) -> SampleContext<'_> {
        SampleContext::new(&self.gpu, self.info, self.swapchain.image_count())
    }

    pub fn app(&self) -> Option<&A> {
        self.app.as_ref()
    }

    pub fn render_format(&self) -> vk::Format {
        self.info.color_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.info.depth_format
    }

    pub fn num_samples(&self) -> vk::SampleCountFlags {
        self.info.samples
    }

    pub fn viewport(&self) -> vk::Viewport {
        self.info.viewport()
    }

    pub fn scissor(&self) -> vk::Rect2D {
        self.info.scissor()
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Frames processed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn slots(&self) -> &[FrameSlot<A::FrameData>] {
        &self.slots
    }

    /// Build the sample and every frame slot, and wait for the GPU to finish
    /// the initialization work.
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.app.is_none(), "sample already initialized");

        let image_count = self.swapchain.image_count();
        let device = self.gpu.device();
        let ctx = SampleContext::new(&self.gpu, self.info, image_count);

        let init_cmd = unsafe {
            let cmd = self.render_pool.allocate_command_buffer(device)?;
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            cmd
        };

        let mut app = A::initialize_application_data(&ctx, init_cmd, image_count)
            .context("initializing application data")?;

        for index in 0..image_count {
            let (targets, depth, multisample) = self.create_targets(index)?;
            let images = SlotImages {
                swapchain: targets.swapchain_image,
                depth: targets.depth_image,
                multisample: targets.multisample_image,
            };

            let init = barriers::init_barriers(&images);
            unsafe { record_barriers(device, init_cmd, barriers::INIT_STAGES, &init) };

            let commands = self.record_slot_commands(&images)?;
            let sync = unsafe {
                SlotSync {
                    ready_fence: create_fence(device, false)?,
                    acquire: vk::Semaphore::null(),
                    present_ready: create_semaphore(device)?,
                    transfer: if self.families.separate() {
                        Some(create_semaphore(device)?)
                    } else {
                        None
                    },
                }
            };

            let data = app
                .initialize_frame_data(&ctx, &targets, init_cmd, index)
                .with_context(|| format!("initializing frame {index}"))?;

            self.slots.push(FrameSlot {
                targets,
                depth,
                multisample,
                commands,
                sync,
                data,
            });
        }

        unsafe {
            end_command_buffer(device, init_cmd)?;
            let submitted = self.gpu.render_queue().submit_and_wait(device, &[init_cmd]);
            self.render_pool.free_command_buffers(device, &[init_cmd]);
            submitted?;

            // Slots start out ready so the first wait on each fence returns.
            for (index, slot) in self.slots.iter().enumerate() {
                self.gpu
                    .render_queue()
                    .submit_empty_with_fence(device, slot.sync.ready_fence)?;
                self.tracker.fence_submitted(index);
            }
        }

        app.initialization_complete(&ctx)?;
        self.app = Some(app);
        tracing::info!(slots = self.slots.len(), "Sample initialized");
        Ok(())
    }

    fn create_targets(
        &self,
        index: usize,
    ) -> anyhow::Result<(FrameTargets, Option<OwnedTarget>, Option<OwnedTarget>)> {
        let extent = vk::Extent3D {
            width: self.info.extent.width,
            height: self.info.extent.height,
            depth: 1,
        };
        let target_info = |format: vk::Format,
                           samples: vk::SampleCountFlags,
                           usage: vk::ImageUsageFlags| {
            vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(extent)
                .mip_levels(1)
                .array_layers(1)
                .samples(samples)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
        };

        let depth = if self.options.depth_buffer {
            let image = self.gpu.create_and_bind_image(&target_info(
                DEPTH_FORMAT,
                self.info.samples,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ))?;
            let view = self.gpu.create_image_view(
                &image,
                vk::ImageViewType::TYPE_2D,
                barriers::depth_range(),
            )?;
            Some(OwnedTarget { image, view })
        } else {
            None
        };

        let multisample = if self.options.multisampling {
            let image = self.gpu.create_and_bind_image(&target_info(
                self.info.color_format,
                MULTISAMPLE_COUNT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ))?;
            let view = self.gpu.create_image_view(
                &image,
                vk::ImageViewType::TYPE_2D,
                barriers::color_range(),
            )?;
            Some(OwnedTarget { image, view })
        } else {
            None
        };

        let targets = FrameTargets {
            swapchain_image: self.swapchain.images[index],
            color_view: multisample
                .as_ref()
                .map_or(self.swapchain.image_views[index], |t| t.view),
            depth_image: depth.as_ref().map(|t| t.image.raw()),
            depth_view: depth.as_ref().map(|t| t.view),
            multisample_image: multisample.as_ref().map(|t| t.image.raw()),
        };
        Ok((targets, depth, multisample))
    }

    /// Record the command buffers a slot replays every frame.
    fn record_slot_commands(&self, images: &SlotImages) -> anyhow::Result<SlotCommands> {
        let device = self.gpu.device();
        let families = self.families;
        let multisampled = images.multisample.is_some();

        unsafe {
            let setup = self.render_pool.allocate_recorded(
                device,
                vk::CommandBufferUsageFlags::empty(),
                |cmd| {
                    let setup_barriers = barriers::setup_barriers(images, families);
                    record_barriers(device, cmd, barriers::SETUP_STAGES, &setup_barriers);
                },
            )?;

            let present = barriers::present_barrier(images.swapchain, multisampled, families);
            let resolve = self.render_pool.allocate_recorded(
                device,
                vk::CommandBufferUsageFlags::empty(),
                |cmd| {
                    if let Some(multisample) = images.multisample {
                        let resolve_barriers =
                            barriers::resolve_barriers(multisample, images.swapchain, families);
                        record_barriers(device, cmd, barriers::RESOLVE_STAGES, &resolve_barriers);
                        device.cmd_resolve_image(
                            cmd,
                            multisample,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            images.swapchain,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[barriers::resolve_region(self.info.extent)],
                        );
                    }
                    record_barriers(device, cmd, barriers::PRESENT_STAGES, &[present]);
                },
            )?;

            let (transfer_from_present, transfer_to_present) = match &self.present_pool {
                Some(pool) => {
                    // Either may still be pending on the present queue when
                    // the slot comes round again.
                    let flags = vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
                    let release =
                        barriers::swapchain_to_render(images.swapchain, multisampled, families);

                    let from_present = pool.allocate_recorded(device, flags, |cmd| {
                        record_barriers(device, cmd, barriers::PRESENT_STAGES, &[release]);
                    })?;
                    let to_present = pool.allocate_recorded(device, flags, |cmd| {
                        record_barriers(device, cmd, barriers::PRESENT_STAGES, &[present]);
                    })?;
                    (Some(from_present), Some(to_present))
                }
                None => (None, None),
            };

            Ok(SlotCommands {
                setup,
                resolve,
                transfer_from_present,
                transfer_to_present,
            })
        }
    }

    /// Run one frame: update, acquire, submit the plan around the sample's
    /// render work, and present.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn process_frame(&mut self) -> anyhow::Result<()> {
        let Self {
            gpu,
            swapchain,
            options,
            info,
            plan,
            slots,
            tracker,
            clock,
            frame_count,
            app,
            ..
        } = self;
        let app = app
            .as_mut()
            .ok_or_else(|| anyhow!("process_frame called before initialize"))?;
        let device = gpu.device();
        let loader = gpu.swapchain_loader()?;
        let ctx = SampleContext::new(gpu, *info, slots.len());

        let time = clock.tick();
        app.update(time.dt);

        let acquire = unsafe { create_semaphore(device)? };
        let image_index = match unsafe { swapchain.acquire_next_image(loader, acquire, WAIT_FOREVER) } {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_semaphore(acquire, None) };
                return Err(e.into());
            }
        };
        let index = image_index as usize;
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| anyhow!("acquired image {index} has no frame slot"))?;
        tracker.acquired(index);

        unsafe {
            wait_and_reset_fence(device, slot.sync.ready_fence)?;
            tracker.wait_ready(index);

            // The fence covers every render-queue use of the old semaphore.
            if slot.sync.acquire != vk::Semaphore::null() {
                device.destroy_semaphore(slot.sync.acquire, None);
            }
        }
        slot.sync.acquire = acquire;

        for step in plan.steps() {
            if step.command == FrameCommand::AppRender {
                app.render(&ctx, gpu.render_queue(), index, slot.context())
                    .with_context(|| format!("rendering frame {index}"))?;
                tracker.render_submitted(index);
                continue;
            }

            let submission = resolve_step(&slot.commands, &slot.sync, step)
                .with_context(|| format!("frame slot {index}"))?;
            let queue: &Queue = match step.queue {
                QueueRole::Render => gpu.render_queue(),
                QueueRole::Present => gpu.present_queue(),
            };
            let wait: Vec<vk::Semaphore> = submission.wait.into_iter().collect();
            let stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait.len()];
            let signal: Vec<vk::Semaphore> = submission.signal.into_iter().collect();

            unsafe {
                queue.submit(device, &[submission.cmd], &wait, &stages, &signal, submission.fence)?
            };

            if step.command == FrameCommand::Setup {
                tracker.setup_submitted(index);
            }
            if step.signals_ready_fence {
                tracker.fence_submitted(index);
            }
        }

        let present_wait = slot
            .sync
            .get(plan.present_wait())
            .ok_or_else(|| anyhow!("frame slot {index} has no present semaphore"))?;
        unsafe {
            gpu.present_queue()
                .present(loader, swapchain.swapchain, image_index, &[present_wait])?;
        }
        tracker.presented(index);
        tracker.recycled(index);

        *frame_count += 1;
        if options.verbose {
            tracing::info!(
                frame = *frame_count,
                image = index,
                elapsed_ms = time.elapsed * 1000.0,
                average_ms = time.average * 1000.0,
                "Frame"
            );
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> anyhow::Result<()> {
        self.gpu.wait_idle()?;
        Ok(())
    }

    /// Tear down the sample and every frame slot. Safe to call twice.
    pub fn destroy(&mut self) -> anyhow::Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.gpu.wait_idle()?;

        let device = self.gpu.device();
        let ctx = SampleContext::new(&self.gpu, self.info, self.swapchain.image_count());
        let mut payloads = Vec::with_capacity(self.slots.len());
        let mut framework_parts = Vec::with_capacity(self.slots.len());
        for slot in self.slots.drain(..) {
            let FrameSlot {
                depth,
                multisample,
                commands,
                sync,
                data,
                ..
            } = slot;
            payloads.push(data);
            framework_parts.push((depth, multisample, commands, sync));
        }

        if let Some(mut app) = self.app.take() {
            app.cleanup(&ctx, payloads);
        }

        for (depth, multisample, commands, sync) in framework_parts {
            unsafe {
                device.destroy_fence(sync.ready_fence, None);
                device.destroy_semaphore(sync.present_ready, None);
                if sync.acquire != vk::Semaphore::null() {
                    device.destroy_semaphore(sync.acquire, None);
                }
                if let Some(transfer) = sync.transfer {
                    device.destroy_semaphore(transfer, None);
                }

                self.render_pool
                    .free_command_buffers(device, &[commands.setup, commands.resolve]);
                if let Some(pool) = &self.present_pool {
                    let transfers: Vec<_> = commands
                        .transfer_from_present
                        .into_iter()
                        .chain(commands.transfer_to_present)
                        .collect();
                    pool.free_command_buffers(device, &transfers);
                }

                for target in depth.into_iter().chain(multisample) {
                    device.destroy_image_view(target.view, None);
                    target.image.destroy(&self.gpu);
                }
            }
        }

        unsafe {
            self.render_pool.destroy(device);
            if let Some(pool) = &self.present_pool {
                pool.destroy(device);
            }
            self.swapchain.destroy(device, self.gpu.swapchain_loader()?);
        }

        tracing::info!(frames = self.frame_count, "Sample destroyed");
        Ok(())
    }
}

impl<A: SampleApp> Drop for Sample<A> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::error!("Failed to destroy sample: {e:#}");
        }
    }
}

/// Record one `vkCmdPipelineBarrier` with image barriers only.
///
/// # Safety
/// `cmd` must be recording and every image in `image_barriers` valid.
unsafe fn record_barriers(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    (src_stage, dst_stage): (vk::PipelineStageFlags, vk::PipelineStageFlags),
    image_barriers: &[vk::ImageMemoryBarrier<'_>],
) {
    if image_barriers.is_empty() {
        return;
    }
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        image_barriers,
    );
}
