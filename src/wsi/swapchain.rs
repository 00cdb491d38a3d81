//! The presentation interface used by the frame dispatcher.

use anyhow::Result;
use ash::vk;

use crate::core::handle::ResourceHandle;

/// A swapchain is an abstraction of a presentation system. It owns a ring of back buffers, the current one is
/// the copy destination of the traced image each frame.
///
/// Back buffers are expected to be in [`ResourceState::Present`](crate::core::device::ResourceState::Present)
/// whenever the dispatcher is not recording a frame.
pub trait Swapchain {
    /// Number of back buffers
    fn image_count(&self) -> u32;
    /// Index of the back buffer that the next frame renders to
    fn current_image_index(&self) -> u32;
    /// The back buffer that the next frame renders to
    fn back_buffer(&self) -> ResourceHandle;
    /// Size of the back buffers
    fn extent(&self) -> vk::Extent2D;
    /// Present the current back buffer and advance to the next one.
    fn present(&mut self) -> Result<()>;
}
