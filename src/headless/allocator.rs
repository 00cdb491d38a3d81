//! Host memory allocator for the headless backend.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{ensure, Result};
use ash::vk;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::{Allocation, Allocator};
use crate::core::device::ResourceState;
use crate::core::error::Error;
use crate::core::handle::ResourceHandle;
use crate::resource::buffer::BufferCreateInfo;
use crate::resource::image::ImageCreateInfo;
use crate::util::align::align;
use crate::util::byte_size::ByteSize;

/// Address of the first allocation.
pub const BASE_ADDRESS: vk::DeviceAddress = 0x1_0000_0000;
/// Allocations are placed at multiples of this alignment.
pub const ALLOCATION_ALIGNMENT: vk::DeviceSize = 256;

/// One entry of the allocation log.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AllocationRecord {
    /// Name given at creation
    pub name: String,
    /// The resource
    pub handle: ResourceHandle,
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// Memory location the resource was placed in
    pub location: gpu_allocator::MemoryLocation,
    /// State the resource was created in
    pub initial_state: ResourceState,
}

#[derive(Debug)]
pub(crate) struct Resource {
    pub(crate) name: String,
    pub(crate) address: vk::DeviceAddress,
    pub(crate) location: MemoryType,
    pub(crate) state: ResourceState,
    pub(crate) data: Box<[u8]>,
    pub(crate) mapped: bool,
}

/// Resources shared between a [`HeadlessAllocator`] and the [`HeadlessDevice`](super::HeadlessDevice) that
/// executes commands on them.
#[derive(Debug)]
pub(crate) struct ResourceTable {
    pub(crate) resources: HashMap<ResourceHandle, Resource>,
    next_handle: u64,
    next_address: vk::DeviceAddress,
    log: Vec<AllocationRecord>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self {
            resources: HashMap::new(),
            next_handle: 1,
            next_address: BASE_ADDRESS,
            log: vec![],
        }
    }
}

impl ResourceTable {
    fn insert(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        location: MemoryType,
        initial_state: ResourceState,
    ) -> Result<Allocation> {
        ensure!(size > 0, Error::Device(format!("cannot create zero-sized resource `{name}`")));
        let handle = ResourceHandle::from_raw(self.next_handle);
        let address = self.next_address;
        self.next_handle += 1;
        self.next_address += align(size, ALLOCATION_ALIGNMENT);
        self.resources.insert(
            handle,
            Resource {
                name: name.to_owned(),
                address,
                location,
                state: initial_state,
                data: vec![0; size as usize].into_boxed_slice(),
                mapped: false,
            },
        );
        self.log.push(AllocationRecord {
            name: name.to_owned(),
            handle,
            size,
            location: location.into(),
            initial_state,
        });
        Ok(Allocation {
            handle,
            address,
            size,
        })
    }

    pub(crate) fn get(&self, handle: ResourceHandle) -> Result<&Resource> {
        self.resources
            .get(&handle)
            .ok_or_else(|| Error::Device(format!("unknown resource {handle:?}")).into())
    }

    pub(crate) fn get_mut(&mut self, handle: ResourceHandle) -> Result<&mut Resource> {
        self.resources
            .get_mut(&handle)
            .ok_or_else(|| Error::Device(format!("unknown resource {handle:?}")).into())
    }

    /// Find the resource whose memory contains `address`.
    pub(crate) fn find_address(&self, address: vk::DeviceAddress) -> Option<(ResourceHandle, &Resource)> {
        self.resources
            .iter()
            .find(|(_, resource)| (resource.address..resource.address + resource.data.len() as u64).contains(&address))
            .map(|(handle, resource)| (*handle, resource))
    }
}

fn texel_size(format: vk::Format) -> usize {
    match format {
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => 4,
        other => other.byte_size().unwrap_or(16),
    }
}

/// Allocator that backs every resource with host memory. Mapping returns a pointer straight into that memory.
///
/// This allocator is `Clone`, `Send` and `Sync`. All clones share the same resources.
///
/// # Example
/// ```
/// use deimos::prelude::*;
/// use deimos::headless::HeadlessAllocator;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut alloc = HeadlessAllocator::new();
/// let buffer = Buffer::new_with_data(&mut alloc, "vertices", vk::BufferUsageFlags::VERTEX_BUFFER, &[1.0f32, 2.0, 3.0])?;
/// assert_eq!(alloc.contents(buffer.handle())?.len(), 12);
/// assert_eq!(alloc.live_allocations()?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Derivative, Default)]
#[derivative(Debug)]
pub struct HeadlessAllocator {
    #[derivative(Debug = "ignore")]
    table: Arc<Mutex<ResourceTable>>,
}

impl HeadlessAllocator {
    /// Create an allocator with its own resource table.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_table(table: Arc<Mutex<ResourceTable>>) -> Self {
        Self {
            table,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ResourceTable>> {
        Ok(self.table.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Copy out the memory of a resource.
    pub fn contents(&self, resource: ResourceHandle) -> Result<Vec<u8>> {
        Ok(self.lock()?.get(resource)?.data.to_vec())
    }

    /// The state a resource is in, after all submitted commands.
    pub fn state(&self, resource: ResourceHandle) -> Result<ResourceState> {
        Ok(self.lock()?.get(resource)?.state)
    }

    /// Name a resource was created with.
    pub fn name(&self, resource: ResourceHandle) -> Result<String> {
        Ok(self.lock()?.get(resource)?.name.clone())
    }

    /// Number of resources that have not been freed.
    pub fn live_allocations(&self) -> Result<usize> {
        Ok(self.lock()?.resources.len())
    }

    /// Every resource created so far, in creation order. Freed resources stay in the log.
    pub fn allocations(&self) -> Result<Vec<AllocationRecord>> {
        Ok(self.lock()?.log.clone())
    }
}

impl Allocator for HeadlessAllocator {
    fn create_buffer(&mut self, name: &str, info: &BufferCreateInfo) -> Result<Allocation> {
        let allocation = self.lock()?.insert(name, info.size, info.location, info.initial_state)?;
        trace!("Allocated buffer {name} at {:#x} ({} bytes, {:?})", allocation.address, allocation.size, info.location);
        Ok(allocation)
    }

    fn create_image(&mut self, name: &str, info: &ImageCreateInfo) -> Result<Allocation> {
        let size = info.extent.width as vk::DeviceSize * info.extent.height as vk::DeviceSize * texel_size(info.format) as vk::DeviceSize;
        let mut allocation = self.lock()?.insert(name, size, MemoryType::GpuOnly, info.initial_state)?;
        allocation.address = 0;
        trace!("Allocated image {name} ({}x{} {:?})", info.extent.width, info.extent.height, info.format);
        Ok(allocation)
    }

    fn map(&mut self, resource: ResourceHandle) -> Result<NonNull<u8>> {
        let mut table = self.lock()?;
        let entry = table.get_mut(resource)?;
        ensure!(entry.location.is_mappable(), Error::UnmappableBuffer);
        entry.mapped = true;
        NonNull::new(entry.data.as_mut_ptr()).ok_or_else(|| Error::Device(format!("null mapping for {resource:?}")).into())
    }

    fn unmap(&mut self, resource: ResourceHandle) {
        match self.lock() {
            Ok(mut table) => {
                if let Some(entry) = table.resources.get_mut(&resource) {
                    entry.mapped = false;
                }
            }
            Err(err) => error!("Failed to unmap {resource:?}: {err}"),
        }
    }

    fn free(&mut self, resource: ResourceHandle) -> Result<()> {
        let entry = self
            .lock()?
            .resources
            .remove(&resource)
            .ok_or_else(|| Error::Device(format!("double free of {resource:?}")))?;
        if entry.mapped {
            warn!("Freeing buffer {} while it is still mapped", entry.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: vk::DeviceSize, location: MemoryType) -> BufferCreateInfo {
        BufferCreateInfo {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            initial_state: ResourceState::Common,
            location,
        }
    }

    #[test]
    fn addresses_are_aligned_and_distinct() -> Result<()> {
        let mut alloc = HeadlessAllocator::new();
        let a = alloc.create_buffer("a", &info(100, MemoryType::GpuOnly))?;
        let b = alloc.create_buffer("b", &info(300, MemoryType::GpuOnly))?;
        assert_eq!(a.address, BASE_ADDRESS);
        assert_eq!(b.address, BASE_ADDRESS + 256);
        assert_ne!(a.handle, b.handle);
        Ok(())
    }

    #[test]
    fn gpu_only_memory_is_not_mappable() -> Result<()> {
        let mut alloc = HeadlessAllocator::new();
        let a = alloc.create_buffer("a", &info(16, MemoryType::GpuOnly))?;
        let err = alloc.map(a.handle).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnmappableBuffer)));
        Ok(())
    }

    #[test]
    fn zero_sized_and_double_free() -> Result<()> {
        let mut alloc = HeadlessAllocator::new();
        assert!(alloc.create_buffer("empty", &info(0, MemoryType::CpuToGpu)).is_err());
        let a = alloc.create_buffer("a", &info(16, MemoryType::CpuToGpu))?;
        alloc.free(a.handle)?;
        assert!(alloc.free(a.handle).is_err());
        assert_eq!(alloc.live_allocations()?, 0);
        assert_eq!(alloc.allocations()?[0].location, gpu_allocator::MemoryLocation::CpuToGpu);
        Ok(())
    }
}
