//! Contains the per-frame dispatch logic.
//!
//! Every frame refits the top level structure, traces rays over the full output extent, copies the output into the
//! current back buffer and presents it. The dispatcher then blocks until the frame has completed on the GPU, so the
//! top level structure is never updated while a trace may still read it. There is no overlap between frames.
//!
//! Pipeline state, shader binding table and bottom level structures are never touched per frame.

use anyhow::{ensure, Result};
use ash::vk;

use crate::allocator::traits::Allocator;
use crate::core::context::GraphicsContext;
use crate::core::device::{CommandList, Device, ResourceBarrier, ResourceState};
use crate::core::error::Error;
use crate::pipeline::raytracing::PipelineState;
use crate::pipeline::shader_binding_table::ShaderBindingTable;
use crate::resource::descriptor_heap::DescriptorHeap;
use crate::resource::image::Image;
use crate::resource::raytracing::TopLevelStructure;
use crate::util::transform::TransformMatrix;
use crate::wsi::swapchain::Swapchain;

/// Everything a frame reads or updates.
pub struct FrameResources<'f, D: Device, A: Allocator> {
    /// The top level structure, refitted with `transforms`
    pub tlas: &'f mut TopLevelStructure<A>,
    /// The ray tracing pipeline
    pub pipeline: &'f PipelineState<D>,
    /// The shader binding table of `pipeline`
    pub sbt: &'f ShaderBindingTable<A>,
    /// The shader visible descriptor heap
    pub heap: &'f DescriptorHeap<D>,
    /// The ray traced output image. Must be in the copy source state between frames.
    pub output: &'f Image<A>,
    /// New instance transforms, one per instance
    pub transforms: &'f [TransformMatrix],
}

/// Records, submits and presents frames. There is at most one frame in flight.
#[derive(Debug)]
pub struct FrameDispatcher {
    extent: vk::Extent2D,
    frame_count: u64,
    last_fence_value: u64,
}

impl FrameDispatcher {
    /// Create a dispatcher tracing `extent` rays per frame.
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            frame_count: 0,
            last_fence_value: 0,
        }
    }

    /// Record, submit and present one frame, then wait for it to complete and reset the command list.
    /// Returns the fence value the frame signaled.
    /// # Errors
    /// Fails if the output image or the back buffer does not match the dispatch extent, or if any device call fails.
    pub fn render_frame<D: Device, A: Allocator, S: Swapchain>(
        &mut self,
        ctx: &mut GraphicsContext<D, A>,
        swapchain: &mut S,
        frame: FrameResources<'_, D, A>,
    ) -> Result<u64> {
        ensure!(
            frame.output.extent() == self.extent && swapchain.extent() == self.extent,
            Error::Device(format!(
                "output {:?} and back buffer {:?} must match the dispatch extent {:?}",
                frame.output.extent(),
                swapchain.extent(),
                self.extent
            ))
        );
        let back_buffer = swapchain.back_buffer();
        let output = frame.output.handle();

        ctx.command_list().set_descriptor_heap(frame.heap.handle());
        frame.tlas.update(ctx, frame.transforms)?;

        let cmd = ctx.command_list();
        cmd.resource_barrier(&[ResourceBarrier::transition(
            output,
            ResourceState::CopySource,
            ResourceState::UnorderedAccess,
        )]);
        if let Some(signature) = frame.pipeline.global_root_signature() {
            cmd.set_compute_root_signature(signature);
        }
        cmd.set_pipeline_state(frame.pipeline.handle());
        cmd.dispatch_rays(&frame.sbt.dispatch_desc(self.extent.width, self.extent.height));

        cmd.resource_barrier(&[
            ResourceBarrier::transition(output, ResourceState::UnorderedAccess, ResourceState::CopySource),
            ResourceBarrier::transition(back_buffer, ResourceState::Present, ResourceState::CopyDest),
        ]);
        cmd.copy_resource(back_buffer, output);
        cmd.resource_barrier(&[ResourceBarrier::transition(
            back_buffer,
            ResourceState::CopyDest,
            ResourceState::Present,
        )]);

        let value = ctx.submit()?;
        swapchain.present()?;
        ctx.wait(value)?;
        ctx.reset()?;

        self.frame_count += 1;
        self.last_fence_value = value;
        trace!("Frame {} completed (fence value {value})", self.frame_count);
        Ok(value)
    }

    /// Dispatch extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of frames rendered
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Fence value signaled by the last frame
    pub fn last_fence_value(&self) -> u64 {
        self.last_fence_value
    }
}
