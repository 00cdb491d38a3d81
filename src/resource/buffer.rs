//! Wrappers for GPU buffers.
//!
//! This module exposes three types: [`Buffer`], [`BufferView`] and [`MappedBuffer`]. A [`BufferView`] does not own
//! the resource, so it can be freely copied around as long as the owning [`Buffer`] lives. A [`MappedBuffer`] is a
//! scoped host mapping of a buffer in a mappable heap (one whose [`MemoryType`] is not `GpuOnly`), the buffer is
//! unmapped when it goes out of scope.
//!
//! # Example
//!
//! ```
//! use deimos::prelude::*;
//! use deimos::headless::HeadlessAllocator;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut alloc = HeadlessAllocator::new();
//! let mut buf = Buffer::new(&mut alloc, "constants", &BufferCreateInfo {
//!     size: 16,
//!     usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
//!     initial_state: ResourceState::GenericRead,
//!     location: MemoryType::CpuToGpu,
//! })?;
//! buf.write(0, &[1.0f32, 0.0, 1.0, 1.0])?;
//! assert_eq!(&buf.read_back()?[4..8], &0.0f32.to_ne_bytes());
//! # Ok(())
//! # }
//! ```

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use anyhow::{ensure, Result};
use ash::vk;
use bytemuck::Pod;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::Allocator;
use crate::core::device::ResourceState;
use crate::core::error::Error;
use crate::core::handle::ResourceHandle;

/// Parameters for creating a buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BufferCreateInfo {
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// How the buffer will be used. Unordered access corresponds to `STORAGE_BUFFER`.
    pub usage: vk::BufferUsageFlags,
    /// State the buffer is created in
    pub initial_state: ResourceState,
    /// Memory heap of the buffer
    pub location: MemoryType,
}

/// An owned GPU buffer. The buffer is freed through its allocator when dropped.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Buffer<A: Allocator> {
    #[derivative(Debug = "ignore")]
    allocator: A,
    handle: ResourceHandle,
    address: vk::DeviceAddress,
    size: vk::DeviceSize,
    location: MemoryType,
}

/// View into a specific offset and range of a [`Buffer`].
/// Care should be taken with the lifetime of this, as there is no checking that the buffer
/// is not dropped while using this.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferView {
    handle: ResourceHandle,
    address: vk::DeviceAddress,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

/// Host mapping of a buffer. Dereferences to the bytes of the entire buffer.
pub struct MappedBuffer<'b, A: Allocator> {
    buffer: &'b mut Buffer<A>,
    pointer: NonNull<u8>,
}

impl<A: Allocator> Buffer<A> {
    /// Allocate a new buffer.
    pub fn new(allocator: &mut A, name: &str, info: &BufferCreateInfo) -> Result<Self> {
        let allocation = allocator.create_buffer(name, info)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new buffer {name} {:?} (size = {} bytes)", allocation.handle, allocation.size);
        Ok(Self {
            allocator: allocator.clone(),
            handle: allocation.handle,
            address: allocation.address,
            size: allocation.size,
            location: info.location,
        })
    }

    /// Allocate a buffer in the upload heap and fill it with `data`.
    pub fn new_with_data<T: Pod>(allocator: &mut A, name: &str, usage: vk::BufferUsageFlags, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            allocator,
            name,
            &BufferCreateInfo {
                size: bytes.len() as vk::DeviceSize,
                usage,
                initial_state: ResourceState::GenericRead,
                location: MemoryType::CpuToGpu,
            },
        )?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }

    /// Map the buffer into host memory.
    /// # Errors
    /// Fails if this buffer is not mappable.
    pub fn map(&mut self) -> Result<MappedBuffer<'_, A>> {
        ensure!(self.location.is_mappable(), Error::UnmappableBuffer);
        let pointer = self.allocator.map(self.handle)?;
        Ok(MappedBuffer {
            buffer: self,
            pointer,
        })
    }

    /// Copy `data` into the buffer at byte offset `offset`.
    /// # Errors
    /// Fails if the buffer is not mappable, or if the data does not fit.
    pub fn write<T: Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset + bytes.len() as vk::DeviceSize;
        ensure!(end <= self.size, Error::BufferViewOutOfRange);
        let mut mapped = self.map()?;
        mapped[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy the entire contents of the buffer into host memory.
    pub fn read_back(&mut self) -> Result<Vec<u8>> {
        let mapped = self.map()?;
        Ok(mapped.to_vec())
    }

    /// Creates a view into an offset and size of the buffer.
    /// # Errors
    /// Fails if `offset + size > self.size`.
    pub fn view(&self, offset: impl Into<vk::DeviceSize>, size: impl Into<vk::DeviceSize>) -> Result<BufferView> {
        let offset = offset.into();
        let size = size.into();
        ensure!(offset + size <= self.size, Error::BufferViewOutOfRange);
        Ok(BufferView {
            handle: self.handle,
            address: self.address + offset,
            offset,
            size,
        })
    }

    /// Creates a view of the entire buffer.
    pub fn view_full(&self) -> BufferView {
        BufferView {
            handle: self.handle,
            address: self.address,
            offset: 0,
            size: self.size,
        }
    }

    /// Get the resource handle of this buffer
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Get the size of this buffer
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Get the device address of this buffer
    pub fn address(&self) -> vk::DeviceAddress {
        self.address
    }

    /// Get the memory type this buffer was allocated in
    pub fn location(&self) -> MemoryType {
        self.location
    }
}

impl<A: Allocator> Drop for Buffer<A> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying buffer {:?}", self.handle);
        if let Err(err) = self.allocator.free(self.handle) {
            error!("Failed to free buffer {:?}: {err}", self.handle);
        }
    }
}

impl BufferView {
    /// Get the handle of the owning buffer.
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Get the offset of this buffer view into the owning buffer
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Get the size of this buffer view.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Get the device address of the start of this buffer view.
    pub fn address(&self) -> vk::DeviceAddress {
        self.address
    }
}

impl<'b, A: Allocator> Deref for MappedBuffer<'b, A> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: The allocator guarantees the mapping covers the whole buffer until it is unmapped,
        // which only happens when this guard is dropped. The guard holds a unique borrow of the buffer.
        unsafe { std::slice::from_raw_parts(self.pointer.as_ptr(), self.buffer.size as usize) }
    }
}

impl<'b, A: Allocator> DerefMut for MappedBuffer<'b, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: See `deref`.
        unsafe { std::slice::from_raw_parts_mut(self.pointer.as_ptr(), self.buffer.size as usize) }
    }
}

impl<'b, A: Allocator> Drop for MappedBuffer<'b, A> {
    fn drop(&mut self) {
        let handle = self.buffer.handle;
        self.buffer.allocator.unmap(handle);
    }
}
