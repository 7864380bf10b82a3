//! Clear-screen sample.
//!
//! Clears the color target to a slowly cycling hue every frame and, with a
//! depth buffer, clears depth to 1.0. Each frame also uploads a small block of
//! frame constants into that frame's slot of a device-local uniform buffer.

use anyhow::Context;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use vksandbox_gpu::{rerecord, BufferFrameData, CommandPool, Queue};
use vksandbox_sample::barriers::{color_range, depth_range};
use vksandbox_sample::{FrameContext, FrameTargets, SampleApp, SampleContext};

/// Seconds for one full trip around the hue circle.
const HUE_PERIOD: f32 = 8.0;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    color: [f32; 4],
    time: f32,
    frame: u32,
    _pad: [u32; 2],
}

pub struct ClearSample {
    pool: CommandPool,
    constants: Option<BufferFrameData<FrameConstants>>,
    time: f32,
    frames_rendered: u32,
}

pub struct ClearFrame {
    cmd: vk::CommandBuffer,
}

impl SampleApp for ClearSample {
    type FrameData = ClearFrame;

    fn initialize_application_data(
        ctx: &SampleContext<'_>,
        _init_cmd: vk::CommandBuffer,
        swapchain_image_count: usize,
    ) -> anyhow::Result<Self> {
        let gpu = ctx.gpu();
        let pool = unsafe {
            CommandPool::new(
                gpu.device(),
                gpu.render_queue().family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };

        let constants = BufferFrameData::new(
            gpu,
            swapchain_image_count,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            gpu.render_queue().family(),
            FrameConstants::zeroed(),
        );
        let constants = match constants {
            Ok(constants) => constants,
            Err(e) => {
                unsafe { pool.destroy(gpu.device()) };
                return Err(e).context("frame constants");
            }
        };

        tracing::info!(
            format = ?ctx.render_format(),
            samples = ?ctx.num_samples(),
            images = swapchain_image_count,
            "Clear sample initialized"
        );

        Ok(Self {
            pool,
            constants: Some(constants),
            time: 0.0,
            frames_rendered: 0,
        })
    }

    fn initialize_frame_data(
        &mut self,
        ctx: &SampleContext<'_>,
        _targets: &FrameTargets,
        _init_cmd: vk::CommandBuffer,
        frame_index: usize,
    ) -> anyhow::Result<ClearFrame> {
        let cmd = unsafe { self.pool.allocate_command_buffer(ctx.device()) }
            .with_context(|| format!("command buffer for frame {frame_index}"))?;
        Ok(ClearFrame { cmd })
    }

    fn update(&mut self, dt: f32) {
        self.time += dt;
    }

    fn render(
        &mut self,
        ctx: &SampleContext<'_>,
        queue: &Queue,
        frame_index: usize,
        frame: FrameContext<'_, ClearFrame>,
    ) -> anyhow::Result<()> {
        let device = ctx.device();
        let color = hue_to_rgb((self.time / HUE_PERIOD).fract());
        let color_image = frame.color_image();
        let depth_image = frame.depth_image();
        let cmd = frame.data().cmd;

        let constants = self
            .constants
            .as_mut()
            .context("frame constants already destroyed")?;
        *constants.data_mut() = FrameConstants {
            color,
            time: self.time,
            frame: self.frames_rendered,
            _pad: [0; 2],
        };

        unsafe {
            // The slot's ready fence has signaled, so this frame's previous
            // upload and clear have both finished.
            constants.update(ctx.gpu(), queue, frame_index, false)?;

            rerecord(device, cmd, |cmd| {
                record_clear_color(device, cmd, color_image, color);
                if let Some(depth) = depth_image {
                    record_clear_depth(device, cmd, depth);
                }
            })?;
            queue.submit(device, &[cmd], &[], &[], &[], vk::Fence::null())?;
        }

        self.frames_rendered = self.frames_rendered.wrapping_add(1);
        Ok(())
    }

    fn cleanup(&mut self, ctx: &SampleContext<'_>, frames: Vec<ClearFrame>) {
        let gpu = ctx.gpu();
        unsafe {
            let cmds: Vec<_> = frames.iter().map(|frame| frame.cmd).collect();
            self.pool.free_command_buffers(gpu.device(), &cmds);
            self.pool.destroy(gpu.device());
            if let Some(constants) = self.constants.take() {
                constants.destroy(gpu);
            }
        }
        tracing::info!(frames = self.frames_rendered, "Clear sample cleaned up");
    }
}

/// Fully saturated color at `hue` in `0..1`.
fn hue_to_rgb(hue: f32) -> [f32; 4] {
    let h = hue * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    [r, g, b, 1.0]
}

/// Clear `image`, which is in `COLOR_ATTACHMENT_OPTIMAL`, and return it there.
unsafe fn record_clear_color(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    color: [f32; 4],
) {
    transition(
        device,
        cmd,
        image,
        color_range(),
        (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        ),
    );
    device.cmd_clear_color_image(
        cmd,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &vk::ClearColorValue { float32: color },
        &[color_range()],
    );
    transition(
        device,
        cmd,
        image,
        color_range(),
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
    );
}

/// Clear `image`, which is in `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`, to 1.0.
unsafe fn record_clear_depth(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
    let attachment_stages =
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    transition(
        device,
        cmd,
        image,
        depth_range(),
        (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (attachment_stages, vk::PipelineStageFlags::TRANSFER),
    );
    device.cmd_clear_depth_stencil_image(
        cmd,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
        &[depth_range()],
    );
    transition(
        device,
        cmd,
        image,
        depth_range(),
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (vk::PipelineStageFlags::TRANSFER, attachment_stages),
    );
}

unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    (src_stage, dst_stage): (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .image(image)
        .subresource_range(range)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hue_wheel_primaries() {
        assert_eq!(hue_to_rgb(0.0), [1.0, 0.0, 0.0, 1.0]);

        let green = hue_to_rgb(1.0 / 3.0);
        assert_relative_eq!(green[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(green[1], 1.0, epsilon = 1e-5);

        let blue = hue_to_rgb(2.0 / 3.0);
        assert_relative_eq!(blue[2], 1.0, epsilon = 1e-5);
        assert_relative_eq!(blue[1], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn hue_colors_stay_in_range() {
        for i in 0..100u8 {
            let color = hue_to_rgb(f32::from(i) / 100.0);
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
            assert_relative_eq!(color.iter().take(3).copied().fold(0.0, f32::max), 1.0);
        }
    }

    #[test]
    fn constants_fit_one_frame_slot() {
        assert_eq!(BufferFrameData::<FrameConstants>::size(), 32);
        assert_eq!(vksandbox_gpu::frame_data::slot_stride(32), 256);
    }
}
