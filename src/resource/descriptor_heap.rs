//! A shader visible descriptor heap that descriptor table root arguments point into.

use anyhow::{ensure, Result};
use ash::vk;

use crate::core::device::Device;
use crate::core::error::Error;
use crate::core::handle::{DescriptorHandle, DescriptorHeapHandle, ResourceHandle};

/// A view written into a descriptor heap slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorView {
    /// Read-write view of a 2D image.
    UnorderedAccessImage {
        /// The image
        resource: ResourceHandle,
        /// View format
        format: vk::Format,
    },
    /// Read-only view of a top level acceleration structure. Acceleration structure views are created from
    /// the GPU address of the structure, not from a resource.
    AccelerationStructure {
        /// Address of the top level structure
        location: vk::DeviceAddress,
    },
    /// Read-only view of a structured buffer.
    StructuredBuffer {
        /// The buffer
        resource: ResourceHandle,
        /// Index of the first element in the view
        first_element: u64,
        /// Number of elements in the view
        element_count: u32,
        /// Size of one element in bytes
        stride: u32,
    },
}

impl DescriptorView {
    /// The equivalent Vulkan descriptor type
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorView::UnorderedAccessImage {
                ..
            } => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorView::AccelerationStructure {
                ..
            } => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            DescriptorView::StructuredBuffer {
                ..
            } => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

/// Fixed-capacity shader visible descriptor heap.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct DescriptorHeap<D: Device> {
    #[derivative(Debug = "ignore")]
    device: D,
    handle: DescriptorHeapHandle,
    gpu_start: DescriptorHandle,
    increment: u32,
    capacity: u32,
}

impl<D: Device> DescriptorHeap<D> {
    /// Create a new descriptor heap with room for `capacity` descriptors.
    pub fn new(device: &D, capacity: u32) -> Result<Self> {
        let info = device.create_descriptor_heap(capacity)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new descriptor heap {:?} (capacity = {capacity})", info.handle);
        Ok(Self {
            device: device.clone(),
            handle: info.handle,
            gpu_start: info.gpu_start,
            increment: info.increment,
            capacity,
        })
    }

    /// Write a view into slot `index`.
    pub fn write(&self, index: u32, view: &DescriptorView) -> Result<()> {
        ensure!(
            index < self.capacity,
            Error::ValueOutOfRange {
                what: "descriptor index",
                value: index as u64,
                max: self.capacity.saturating_sub(1) as u64,
            }
        );
        trace!("Writing {:?} descriptor at heap slot {index}", view.descriptor_type());
        self.device.write_descriptor(self.handle, index, view)
    }

    /// GPU handle of the descriptor in slot `index`, used as a descriptor table root argument.
    pub fn gpu_handle(&self, index: u32) -> DescriptorHandle {
        self.gpu_start.offset(index, self.increment)
    }

    /// Get the raw heap handle
    pub fn handle(&self) -> DescriptorHeapHandle {
        self.handle
    }

    /// Distance in bytes between two descriptors
    pub fn increment(&self) -> u32 {
        self.increment
    }

    /// Number of descriptors the heap can hold
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl<D: Device> Drop for DescriptorHeap<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying descriptor heap {:?}", self.handle);
        self.device.destroy_descriptor_heap(self.handle);
    }
}
