//! Traits to implement for a custom GPU resource allocator.

use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::core::handle::ResourceHandle;
use crate::resource::buffer::BufferCreateInfo;
use crate::resource::image::ImageCreateInfo;

/// A resource created by an [`Allocator`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Allocation {
    /// Handle of the created resource
    pub handle: ResourceHandle,
    /// GPU virtual address of the resource. Zero for images.
    pub address: vk::DeviceAddress,
    /// Size of the resource in bytes
    pub size: vk::DeviceSize,
}

/// Creates buffers and images in GPU memory. Allocators are cheap handles: resources keep a clone of the allocator
/// that created them and free themselves through it when dropped.
pub trait Allocator: Clone {
    /// Create a buffer committed to memory of the requested type.
    fn create_buffer(&mut self, name: &str, info: &BufferCreateInfo) -> Result<Allocation>;

    /// Create a 2D image committed to device memory.
    fn create_image(&mut self, name: &str, info: &ImageCreateInfo) -> Result<Allocation>;

    /// Map a host-visible buffer. Fails with [`Error::UnmappableBuffer`](crate::Error::UnmappableBuffer) for buffers in
    /// GPU-only memory. The returned pointer stays valid for the size of the buffer until [`Allocator::unmap`]
    /// or [`Allocator::free`] is called.
    fn map(&mut self, resource: ResourceHandle) -> Result<NonNull<u8>>;

    /// Unmap a previously mapped buffer.
    fn unmap(&mut self, resource: ResourceHandle);

    /// Release a resource.
    fn free(&mut self, resource: ResourceHandle) -> Result<()>;
}
