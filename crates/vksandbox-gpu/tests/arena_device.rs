//! Arena behaviour against a real device.

use ash::vk;
use vksandbox_gpu::{ArenaError, ArenaKind, ArenaSizes, GpuContext, GpuContextBuilder, GpuError};

fn headless() -> GpuContext {
    GpuContextBuilder::new()
        .app_name("vksandbox-gpu-tests")
        .validation(false)
        .arena_sizes(ArenaSizes {
            host_mb: 1,
            device_image_mb: 8,
            device_buffer_mb: 1,
            coherent_mb: 1,
        })
        .build()
        .expect("headless context")
}

#[test]
#[ignore = "Requires GPU hardware"]
fn host_buffer_round_trips_through_mapping() {
    let ctx = headless();
    let buffer = ctx
        .create_and_bind_default_exclusive_host_buffer(1024, vk::BufferUsageFlags::TRANSFER_SRC)
        .unwrap();
    assert_eq!(buffer.arena(), ArenaKind::Host);

    let words: Vec<u32> = (0..256).collect();
    buffer.write(&words).unwrap();
    unsafe {
        buffer.flush(ctx.device()).unwrap();
        let read = buffer.read_u32s(ctx.device()).unwrap();
        assert_eq!(&read[..256], &words[..]);
        buffer.destroy(&ctx);
    }
    assert_eq!(ctx.arenas().get(ArenaKind::Host).allocation_count(), 0);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn mapped_allocations_are_atom_aligned() {
    let ctx = headless();
    let buffers: Vec<_> = (0..4)
        .map(|_| {
            ctx.create_and_bind_default_exclusive_coherent_buffer(
                10,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )
            .unwrap()
        })
        .collect();

    for buffer in &buffers {
        let ptr = buffer.mapped_ptr().unwrap() as usize;
        let base = buffers[0].mapped_ptr().unwrap() as usize;
        assert_eq!((ptr.abs_diff(base)) % 256, 0);
    }
    for buffer in buffers {
        unsafe { buffer.destroy(&ctx) };
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn exhausted_device_arena_reports_error() {
    let ctx = headless();
    let capacity = ctx.arenas().get(ArenaKind::DeviceBuffer).capacity();
    let err = ctx
        .create_and_bind_default_exclusive_device_buffer(
            capacity * 2,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )
        .err()
        .unwrap();
    assert!(matches!(
        err,
        GpuError::Arena(ArenaError::Exhausted { .. })
    ));
    assert_eq!(ctx.arenas().get(ArenaKind::DeviceBuffer).allocation_count(), 0);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn images_bind_into_device_image_arena() {
    let ctx = headless();
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::D16_UNORM)
        .extent(vk::Extent3D {
            width: 64,
            height: 64,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_4)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = ctx.create_and_bind_image(&info).unwrap();
    let view = ctx
        .create_image_view(
            &image,
            vk::ImageViewType::TYPE_2D,
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .level_count(1)
                .layer_count(1),
        )
        .unwrap();
    assert_eq!(ctx.arenas().get(ArenaKind::DeviceImage).allocation_count(), 1);

    unsafe {
        ctx.device().destroy_image_view(view, None);
        image.destroy(&ctx);
    }
}
