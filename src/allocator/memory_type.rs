//! Exposes different memory types that determine where memory allocations should live.

/// The memory type of an allocation indicates where it should live.
/// Give this to an [`Allocator`](crate::Allocator) through a
/// [`BufferCreateInfo`](crate::resource::buffer::BufferCreateInfo).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryType {
    /// GPU only accessible memory. Acceleration structures, their scratch memory and the ray traced output live here.
    GpuOnly,
    /// Host-visible memory the GPU reads directly, the upload heap. Vertex data, instance descriptors, constant buffers
    /// and shader tables are written from the host and live here.
    CpuToGpu,
    /// Memory useful for CPU readback of data.
    GpuToCpu,
}

impl MemoryType {
    /// Whether buffers of this memory type can be mapped on the host.
    pub fn is_mappable(&self) -> bool {
        !matches!(self, MemoryType::GpuOnly)
    }
}

impl From<MemoryType> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryType) -> Self {
        match value {
            MemoryType::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryType::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryType::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}
