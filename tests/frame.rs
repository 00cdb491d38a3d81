use anyhow::Result;

use deimos::headless::{self, HeadlessDevice, HeadlessSwapchain, LiveObjects, RecordedCommand};
use deimos::prelude::*;

mod framework;

#[test]
pub fn fence_value_increases_by_one() -> Result<()> {
    let mut renderer = framework::make_renderer()?;
    let first = renderer.render_frame()?;
    let second = renderer.render_frame()?;
    let third = renderer.render_frame()?;
    assert_eq!(second, first + 1);
    assert_eq!(third, second + 1);
    assert_eq!(renderer.frame_count(), 3);
    assert_eq!(renderer.ctx().fence().completed_value()?, third);
    assert_eq!(renderer.tlas().update_count(), 3);
    assert_eq!(renderer.swapchain().present_count(), 3);
    Ok(())
}

#[test]
pub fn frame_command_sequence() -> Result<()> {
    let mut renderer = framework::make_renderer()?;
    let back_buffer = renderer.swapchain().back_buffer();
    renderer.render_frame()?;

    let submissions = renderer.ctx().device().submissions()?;
    let frame = submissions.last().expect("frame should be submitted");
    let output = renderer.output().handle();
    let tlas = renderer.tlas().result_buffer().handle();

    assert!(matches!(frame[0], RecordedCommand::SetDescriptorHeap(heap) if heap == renderer.heap().handle()));
    assert!(matches!(&frame[1], RecordedCommand::ResourceBarrier(b) if b == &[ResourceBarrier::uav(tlas)]));
    assert!(matches!(&frame[2], RecordedCommand::BuildAccelerationStructure(info) if info.is_update()));
    assert!(matches!(&frame[3], RecordedCommand::ResourceBarrier(b) if b == &[ResourceBarrier::uav(tlas)]));
    assert!(matches!(
        &frame[4],
        RecordedCommand::ResourceBarrier(b)
            if b == &[ResourceBarrier::transition(output, ResourceState::CopySource, ResourceState::UnorderedAccess)]
    ));
    assert!(matches!(frame[5], RecordedCommand::SetComputeRootSignature(_)));
    assert!(matches!(frame[6], RecordedCommand::SetPipelineState(pipeline) if pipeline == renderer.pipeline().handle()));
    let RecordedCommand::DispatchRays(desc) = &frame[7] else {
        panic!("expected a dispatch, got {:?}", frame[7]);
    };
    assert_eq!((desc.width, desc.height, desc.depth), (32, 16, 1));
    assert_eq!(desc.hit_group.size, 512);
    assert!(matches!(
        &frame[8],
        RecordedCommand::ResourceBarrier(b) if b == &[
            ResourceBarrier::transition(output, ResourceState::UnorderedAccess, ResourceState::CopySource),
            ResourceBarrier::transition(back_buffer, ResourceState::Present, ResourceState::CopyDest),
        ]
    ));
    assert!(matches!(frame[9], RecordedCommand::CopyResource { dst, src } if dst == back_buffer && src == output));
    assert!(matches!(
        &frame[10],
        RecordedCommand::ResourceBarrier(b)
            if b == &[ResourceBarrier::transition(back_buffer, ResourceState::CopyDest, ResourceState::Present)]
    ));
    assert_eq!(frame.len(), 11);

    // Resources are back in their resting states
    let allocator = renderer.ctx().allocator();
    assert_eq!(allocator.state(output)?, ResourceState::CopySource);
    assert_eq!(allocator.state(back_buffer)?, ResourceState::Present);
    Ok(())
}

#[test]
pub fn back_buffers_rotate() -> Result<()> {
    let mut renderer = framework::make_renderer()?;
    let first = renderer.swapchain().back_buffer();
    renderer.render_frame()?;
    let second = renderer.swapchain().back_buffer();
    assert_ne!(first, second);
    renderer.render_frame()?;
    assert_eq!(renderer.swapchain().back_buffer(), first, "Two back buffers should alternate.");
    Ok(())
}

#[test]
pub fn rotation_advances_per_frame() -> Result<()> {
    let mut renderer = framework::make_renderer()?;
    let step = renderer.settings().rotation_step;
    assert_eq!(renderer.scene().rotation(), 0.0, "Loading must not advance the rotation.");
    renderer.render_frame()?;
    assert_eq!(renderer.scene().rotation(), step);
    // The first frame refits at the initial rotation
    assert_eq!(renderer.tlas().instances()[1].transform, deimos::scene::instance_transforms(0.0)[1]);
    renderer.render_frame()?;
    assert_eq!(renderer.tlas().instances()[1].transform, deimos::scene::instance_transforms(step)[1]);
    Ok(())
}

#[test]
pub fn descriptors_are_written() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let device = renderer.ctx().device();
    let heap = renderer.heap().handle();
    assert!(matches!(
        device.descriptor(heap, deimos::renderer::OUTPUT_SLOT)?,
        Some(DescriptorView::UnorderedAccessImage { resource, .. }) if resource == renderer.output().handle()
    ));
    assert_eq!(
        device.descriptor(heap, deimos::renderer::TLAS_SLOT)?,
        Some(DescriptorView::AccelerationStructure {
            location: renderer.tlas().address()
        })
    );
    assert!(matches!(
        device.descriptor(heap, deimos::renderer::VERTEX_BUFFER_SLOT)?,
        Some(DescriptorView::StructuredBuffer {
            element_count: 3,
            stride: 28,
            ..
        })
    ));
    Ok(())
}

#[test]
pub fn mismatched_back_buffer_extent() -> Result<()> {
    let settings = framework::settings();
    let mut ctx = framework::make_context()?;
    let swapchain = HeadlessSwapchain::new(ctx.allocator_mut(), vk::Extent2D { width: 8, height: 8 }, 2)?;
    let mut renderer = Renderer::load(ctx, swapchain, &headless::HeadlessCompiler::new(), settings)?;
    let submissions = renderer.ctx().device().submission_count()?;
    let err = renderer.render_frame().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Device(_))));
    assert_eq!(renderer.ctx().device().submission_count()?, submissions, "Nothing should be submitted.");
    Ok(())
}

#[test]
pub fn unsupported_device_creates_nothing() -> Result<()> {
    let device = HeadlessDevice::with_capabilities(RayTracingCapabilities {
        tier: RayTracingTier::NotSupported,
        shader_table: ShaderTableProperties::default(),
    });
    let allocator = device.allocator();
    let err = GraphicsContext::new(device.clone(), allocator.clone()).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RayTracingUnsupported)));
    assert_eq!(allocator.live_allocations()?, 0);
    assert_eq!(device.live_objects()?, LiveObjects::default());
    Ok(())
}

#[test]
pub fn zero_table_alignment_creates_nothing() -> Result<()> {
    let device = HeadlessDevice::with_capabilities(RayTracingCapabilities {
        tier: RayTracingTier::Tier11,
        shader_table: ShaderTableProperties {
            table_alignment: 0,
            ..Default::default()
        },
    });
    let allocator = device.allocator();
    let err = GraphicsContext::new(device.clone(), allocator.clone()).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ZeroAlignment("table alignment"))));
    assert_eq!(device.live_objects()?, LiveObjects::default());
    Ok(())
}

#[test]
pub fn unsupported_ray_type_count() -> Result<()> {
    let mut settings = framework::settings();
    settings.ray_type_count = 3;
    let err = framework::make_renderer_with_settings(settings).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ValueOutOfRange { what: "ray type count", .. })));
    Ok(())
}

#[test]
pub fn shutdown_releases_everything() -> Result<()> {
    let mut renderer = framework::make_renderer()?;
    renderer.render_frame()?;
    let device = renderer.ctx().device().clone();
    renderer.shutdown()?;
    assert_eq!(device.live_objects()?, LiveObjects::default());
    assert_eq!(device.allocator().live_allocations()?, 0);
    Ok(())
}
