//! Image barriers recorded by the frame driver.
//!
//! Builders here are pure so the layouts and queue-family hand-offs can be
//! checked without a device. Recording happens in [`crate::driver`].

use ash::vk;

/// Render and present queue family indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub render: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub const fn separate(&self) -> bool {
        self.render != self.present
    }

    /// `(src, dst)` for a present-to-render ownership transfer.
    const fn to_render(&self) -> (u32, u32) {
        if self.separate() {
            (self.present, self.render)
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        }
    }

    /// `(src, dst)` for a render-to-present ownership transfer.
    const fn to_present(&self) -> (u32, u32) {
        if self.separate() {
            (self.render, self.present)
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        }
    }
}

/// Images of one frame slot the barriers refer to.
#[derive(Debug, Clone, Copy)]
pub struct SlotImages {
    pub swapchain: vk::Image,
    pub depth: Option<vk::Image>,
    pub multisample: Option<vk::Image>,
}

/// Pipeline stages for the one-time transitions in the init buffer.
pub const INIT_STAGES: (vk::PipelineStageFlags, vk::PipelineStageFlags) = (
    vk::PipelineStageFlags::TOP_OF_PIPE,
    vk::PipelineStageFlags::ALL_COMMANDS,
);

/// Pipeline stages for the setup submission.
pub const SETUP_STAGES: (vk::PipelineStageFlags, vk::PipelineStageFlags) = (
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    vk::PipelineStageFlags::from_raw(
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
            | vk::PipelineStageFlags::TRANSFER.as_raw(),
    ),
);

/// Pipeline stages for the multisample resolve.
pub const RESOLVE_STAGES: (vk::PipelineStageFlags, vk::PipelineStageFlags) = (
    vk::PipelineStageFlags::ALL_COMMANDS,
    vk::PipelineStageFlags::TRANSFER,
);

/// Pipeline stages for the transition to `PRESENT_SRC_KHR` and its
/// ownership transfers.
pub const PRESENT_STAGES: (vk::PipelineStageFlags, vk::PipelineStageFlags) = (
    vk::PipelineStageFlags::ALL_COMMANDS,
    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
);

pub fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(1)
        .layer_count(1)
}

pub fn depth_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::DEPTH)
        .level_count(1)
        .layer_count(1)
}

fn barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    (src_family, dst_family): (u32, u32),
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .image(image)
        .subresource_range(range)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(src_family)
        .dst_queue_family_index(dst_family)
}

/// Layout the swapchain image is in while the sample renders.
///
/// With multisampling the sample draws into the multisample target and the
/// swapchain image only receives the resolve.
pub const fn swapchain_render_layout(multisampled: bool) -> vk::ImageLayout {
    if multisampled {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    }
}

/// One-time transitions of framework-owned images, recorded into the
/// initialization command buffer.
pub fn init_barriers(images: &SlotImages) -> Vec<vk::ImageMemoryBarrier<'static>> {
    let ignored = (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED);
    let mut barriers = Vec::with_capacity(2);

    if let Some(depth) = images.depth {
        barriers.push(barrier(
            depth,
            depth_range(),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::AccessFlags::empty(),
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            ignored,
        ));
    }
    if let Some(multisample) = images.multisample {
        barriers.push(barrier(
            multisample,
            color_range(),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::AccessFlags::empty(),
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            ignored,
        ));
    }
    barriers
}

/// Acquire half of the present-to-render ownership transfer of the swapchain
/// image. The present queue records the identical release barrier.
pub fn swapchain_to_render(
    swapchain: vk::Image,
    multisampled: bool,
    families: QueueFamilies,
) -> vk::ImageMemoryBarrier<'static> {
    let new_layout = swapchain_render_layout(multisampled);
    let dst_access = if multisampled {
        vk::AccessFlags::TRANSFER_WRITE
    } else {
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE
    };
    barrier(
        swapchain,
        color_range(),
        (vk::ImageLayout::UNDEFINED, new_layout),
        (vk::AccessFlags::empty(), dst_access),
        families.to_render(),
    )
}

/// Transitions at the start of every frame, before the sample renders.
pub fn setup_barriers(
    images: &SlotImages,
    families: QueueFamilies,
) -> Vec<vk::ImageMemoryBarrier<'static>> {
    match images.multisample {
        None => vec![swapchain_to_render(images.swapchain, false, families)],
        Some(multisample) => {
            let mut barriers = vec![barrier(
                multisample,
                color_range(),
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ),
                (
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                ),
                (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
            )];
            if families.separate() {
                barriers.push(swapchain_to_render(images.swapchain, true, families));
            }
            barriers
        }
    }
}

/// Transitions ahead of `vkCmdResolveImage`: multisample target to
/// `TRANSFER_SRC_OPTIMAL`, swapchain image to `TRANSFER_DST_OPTIMAL`.
pub fn resolve_barriers(
    multisample: vk::Image,
    swapchain: vk::Image,
    families: QueueFamilies,
) -> [vk::ImageMemoryBarrier<'static>; 2] {
    let ignored = (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED);
    let swapchain_old = if families.separate() {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else {
        vk::ImageLayout::UNDEFINED
    };
    [
        barrier(
            multisample,
            color_range(),
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            (
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            ),
            ignored,
        ),
        barrier(
            swapchain,
            color_range(),
            (swapchain_old, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
            ignored,
        ),
    ]
}

/// Full-extent single-layer resolve region.
pub fn resolve_region(extent: vk::Extent2D) -> vk::ImageResolve {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .layer_count(1);
    vk::ImageResolve::default()
        .src_subresource(layers)
        .dst_subresource(layers)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

/// Transition of the swapchain image to `PRESENT_SRC_KHR`, releasing it to
/// the present family when that differs. The present queue records the same
/// barrier as its acquire half.
pub fn present_barrier(
    swapchain: vk::Image,
    multisampled: bool,
    families: QueueFamilies,
) -> vk::ImageMemoryBarrier<'static> {
    let src_access = if multisampled {
        vk::AccessFlags::TRANSFER_WRITE
    } else {
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE
    };
    barrier(
        swapchain,
        color_range(),
        (
            swapchain_render_layout(multisampled),
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
        (src_access, vk::AccessFlags::MEMORY_READ),
        families.to_present(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const SAME: QueueFamilies = QueueFamilies {
        render: 0,
        present: 0,
    };
    const SPLIT: QueueFamilies = QueueFamilies {
        render: 0,
        present: 2,
    };

    fn images(depth: bool, msaa: bool) -> SlotImages {
        SlotImages {
            swapchain: vk::Image::from_raw(1),
            depth: depth.then_some(vk::Image::from_raw(2)),
            multisample: msaa.then_some(vk::Image::from_raw(3)),
        }
    }

    #[test]
    fn init_never_touches_swapchain() {
        let imgs = images(true, true);
        let barriers = init_barriers(&imgs);
        assert_eq!(barriers.len(), 2);
        assert!(barriers.iter().all(|b| b.image != imgs.swapchain));

        assert_eq!(barriers[0].image, vk::Image::from_raw(2));
        assert_eq!(
            barriers[0].new_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            barriers[0].subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            barriers[1].new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );

        assert!(init_barriers(&images(false, false)).is_empty());
    }

    #[test]
    fn setup_without_msaa_targets_swapchain() {
        let barriers = setup_barriers(&images(false, false), SAME);
        assert_eq!(barriers.len(), 1);
        let b = barriers[0];
        assert_eq!(b.image, vk::Image::from_raw(1));
        assert_eq!(b.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(b.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(b.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(b.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn setup_with_split_queues_acquires_ownership() {
        let b = setup_barriers(&images(false, false), SPLIT)[0];
        assert_eq!(b.src_queue_family_index, 2);
        assert_eq!(b.dst_queue_family_index, 0);

        let barriers = setup_barriers(&images(false, true), SPLIT);
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].image, vk::Image::from_raw(3));
        assert_eq!(barriers[1].image, vk::Image::from_raw(1));
        assert_eq!(barriers[1].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barriers[1].src_queue_family_index, 2);
    }

    #[test]
    fn setup_with_msaa_on_one_queue_leaves_swapchain_alone() {
        let barriers = setup_barriers(&images(true, true), SAME);
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].image, vk::Image::from_raw(3));
    }

    #[test]
    fn resolve_moves_both_images_to_transfer_layouts() {
        let [ms, sc] = resolve_barriers(vk::Image::from_raw(3), vk::Image::from_raw(1), SAME);
        assert_eq!(ms.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(ms.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(sc.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(sc.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let [_, sc] = resolve_barriers(vk::Image::from_raw(3), vk::Image::from_raw(1), SPLIT);
        assert_eq!(sc.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn present_barrier_starts_from_render_layout() {
        let b = present_barrier(vk::Image::from_raw(1), true, SAME);
        assert_eq!(b.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(b.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(b.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(b.dst_access_mask, vk::AccessFlags::MEMORY_READ);

        let b = present_barrier(vk::Image::from_raw(1), false, SPLIT);
        assert_eq!(b.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(b.src_queue_family_index, 0);
        assert_eq!(b.dst_queue_family_index, 2);
    }

    #[test]
    fn setup_stages_cover_transfer() {
        assert!(SETUP_STAGES.1.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(SETUP_STAGES
            .1
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
    }

    #[test]
    fn resolve_region_spans_extent() {
        let region = resolve_region(vk::Extent2D {
            width: 640,
            height: 480,
        });
        assert_eq!(region.extent.width, 640);
        assert_eq!(region.extent.depth, 1);
        assert_eq!(region.dst_subresource.layer_count, 1);
    }
}
