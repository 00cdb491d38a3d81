//! The graphics context owns the device, the allocator, the command list and the frame fence.
//!
//! Every component that creates device objects or records commands takes the context by reference.
//! There is a single command list and a single fence, so at most one batch of work is in flight.

use anyhow::{ensure, Result};

use crate::allocator::traits::Allocator;
use crate::core::device::{Device, RayTracingCapabilities, ShaderTableProperties};
use crate::core::error::Error;
use crate::sync::fence::Fence;

/// Explicit replacement for global device state.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct GraphicsContext<D: Device, A: Allocator> {
    #[derivative(Debug = "ignore")]
    device: D,
    #[derivative(Debug = "ignore")]
    allocator: A,
    #[derivative(Debug = "ignore")]
    command_list: D::CommandList,
    fence: Fence<D>,
    capabilities: RayTracingCapabilities,
}

impl<D: Device, A: Allocator> GraphicsContext<D, A> {
    /// Create a new context. Fails with [`Error::RayTracingUnsupported`] if the device cannot do ray tracing,
    /// or [`Error::ZeroAlignment`] if it reports unusable shader table alignments, before anything is created on it.
    pub fn new(device: D, allocator: A) -> Result<Self> {
        let capabilities = device.capabilities()?;
        ensure!(capabilities.supported(), Error::RayTracingUnsupported);
        capabilities.shader_table.validate()?;
        info!("Ray tracing tier: {:?}", capabilities.tier);
        debug!("Shader table properties: {:?}", capabilities.shader_table);

        let command_list = device.create_command_list()?;
        let fence = Fence::new(device.clone(), 0)?;
        Ok(Self {
            device,
            allocator,
            command_list,
            fence,
            capabilities,
        })
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Mutable access to the allocator, for creating resources.
    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    /// The command list that is currently being recorded.
    pub fn command_list(&mut self) -> &mut D::CommandList {
        &mut self.command_list
    }

    /// Ray tracing capabilities queried at creation
    pub fn capabilities(&self) -> &RayTracingCapabilities {
        &self.capabilities
    }

    /// Shader table size and alignment constraints
    pub fn shader_table_properties(&self) -> &ShaderTableProperties {
        &self.capabilities.shader_table
    }

    /// The frame fence
    pub fn fence(&self) -> &Fence<D> {
        &self.fence
    }

    /// Submit the recorded commands and signal the fence with its next value. Returns the value to wait on.
    pub fn submit(&mut self) -> Result<u64> {
        self.device.submit(&mut self.command_list)?;
        let value = self.fence.signal()?;
        trace!("Submitted command list, fence value {value}");
        Ok(value)
    }

    /// Block until the fence reaches `value`.
    pub fn wait(&self, value: u64) -> Result<()> {
        self.fence.wait(value)
    }

    /// Reset the command list for recording. Only valid once all submitted work has completed.
    pub fn reset(&mut self) -> Result<()> {
        self.device.reset_command_list(&mut self.command_list)
    }

    /// Submit, wait for completion and reset the command list.
    pub fn flush(&mut self) -> Result<u64> {
        let value = self.submit()?;
        self.wait(value)?;
        self.reset()?;
        Ok(value)
    }
}
