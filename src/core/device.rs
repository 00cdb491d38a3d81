//! The device and command list interfaces that all GPU work goes through.
//!
//! Deimos does not talk to a graphics API directly. Instead, everything that creates device objects
//! or records commands does so through the [`Device`] and [`CommandList`] traits. A backend implements
//! both. The crate ships a [`headless`](crate::headless) backend that executes everything on the host.

use anyhow::{ensure, Result};
use ash::vk;

use crate::core::error::Error;
use crate::core::handle::{DescriptorHandle, DescriptorHeapHandle, FenceHandle, PipelineHandle, ResourceHandle, RootSignatureHandle};
use crate::pipeline::raytracing::RayTracingPipelineCreateInfo;
use crate::pipeline::root_signature::RootSignatureDesc;
use crate::resource::descriptor_heap::DescriptorView;
use crate::resource::raytracing::{AccelerationStructureBuildInfo, AccelerationStructureBuildSize};

/// Maximum number of bytes of hit attributes a ray tracing pipeline can declare.
pub const MAX_ATTRIBUTE_SIZE: u32 = 32;
/// Maximum ray recursion depth of a ray tracing pipeline.
pub const MAX_RECURSION_DEPTH: u32 = 31;

/// Ray tracing support level reported by the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum RayTracingTier {
    /// No hardware ray tracing.
    NotSupported,
    /// Tier 1.0
    Tier10,
    /// Tier 1.1
    Tier11,
}

/// Size and alignment constraints for shader tables.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ShaderTableProperties {
    /// Size in bytes of a program identifier
    pub identifier_size: u32,
    /// Required alignment of the stride between records
    pub record_alignment: u64,
    /// Required alignment of the start of each table region
    pub table_alignment: u64,
    /// Largest allowed record stride
    pub max_record_stride: u64,
}

impl ShaderTableProperties {
    /// Check that both alignments are usable.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.record_alignment != 0, Error::ZeroAlignment("record alignment"));
        ensure!(self.table_alignment != 0, Error::ZeroAlignment("table alignment"));
        Ok(())
    }
}

impl Default for ShaderTableProperties {
    fn default() -> Self {
        Self {
            identifier_size: 32,
            record_alignment: 32,
            table_alignment: 64,
            max_record_stride: 4096,
        }
    }
}

/// Result of the ray tracing capability query.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RayTracingCapabilities {
    /// Supported ray tracing tier
    pub tier: RayTracingTier,
    /// Shader table constraints
    pub shader_table: ShaderTableProperties,
}

impl RayTracingCapabilities {
    /// Whether the device can run ray tracing pipelines at all.
    pub fn supported(&self) -> bool {
        self.tier != RayTracingTier::NotSupported
    }
}

/// State a resource is in, used for transition barriers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    /// Common state
    Common,
    /// Read by shaders through any binding, or as build input
    GenericRead,
    /// Read and written through unordered access views
    UnorderedAccess,
    /// Acceleration structure storage
    AccelerationStructure,
    /// Shader resource read by non-pixel shaders
    NonPixelShaderResource,
    /// Source of a copy
    CopySource,
    /// Destination of a copy
    CopyDest,
    /// Ready for presentation
    Present,
}

/// A resource barrier recorded into a command list.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceBarrier {
    /// Transition a resource between two states.
    Transition {
        /// The resource
        resource: ResourceHandle,
        /// State before the barrier
        before: ResourceState,
        /// State after the barrier
        after: ResourceState,
    },
    /// Wait for all unordered access writes to a resource to finish before later accesses.
    UnorderedAccess {
        /// The resource
        resource: ResourceHandle,
    },
}

impl ResourceBarrier {
    /// Create a transition barrier
    pub fn transition(resource: ResourceHandle, before: ResourceState, after: ResourceState) -> Self {
        Self::Transition {
            resource,
            before,
            after,
        }
    }

    /// Create an unordered access barrier
    pub fn uav(resource: ResourceHandle) -> Self {
        Self::UnorderedAccess {
            resource,
        }
    }
}

/// Opaque program identifier, queried from a pipeline by export name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ShaderIdentifier(Box<[u8]>);

impl ShaderIdentifier {
    /// Wrap identifier bytes returned by the backend
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Identifier bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size of the identifier in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the identifier is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Information about a freshly created descriptor heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorHeapInfo {
    /// The heap
    pub handle: DescriptorHeapHandle,
    /// GPU handle of the first descriptor
    pub gpu_start: DescriptorHandle,
    /// Distance between two descriptors
    pub increment: u32,
}

/// Parameters of a ray dispatch. Each region points into a shader binding table.
#[derive(Debug, Copy, Clone, Default)]
pub struct DispatchRaysDesc {
    /// Ray generation record
    pub ray_generation: vk::StridedDeviceAddressRegionKHR,
    /// Miss records
    pub miss: vk::StridedDeviceAddressRegionKHR,
    /// Hit group records
    pub hit_group: vk::StridedDeviceAddressRegionKHR,
    /// Dispatch width
    pub width: u32,
    /// Dispatch height
    pub height: u32,
    /// Dispatch depth
    pub depth: u32,
}

/// Records commands for later submission with [`Device::submit`].
pub trait CommandList {
    /// Build or update an acceleration structure.
    fn build_acceleration_structure(&mut self, info: &AccelerationStructureBuildInfo);
    /// Record resource barriers.
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]);
    /// Bind the shader visible descriptor heap.
    fn set_descriptor_heap(&mut self, heap: DescriptorHeapHandle);
    /// Bind the global root signature for compute and ray tracing work.
    fn set_compute_root_signature(&mut self, signature: RootSignatureHandle);
    /// Bind a ray tracing pipeline.
    fn set_pipeline_state(&mut self, pipeline: PipelineHandle);
    /// Dispatch rays.
    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc);
    /// Copy the full contents of `src` into `dst`.
    fn copy_resource(&mut self, dst: ResourceHandle, src: ResourceHandle);
}

/// A logical device capable of ray tracing. Implementations are cheap handles that can be cloned,
/// all clones refer to the same device.
pub trait Device: Clone {
    /// Command list type of this device
    type CommandList: CommandList;

    /// Query ray tracing support.
    fn capabilities(&self) -> Result<RayTracingCapabilities>;

    /// Query the buffer sizes needed to build an acceleration structure. Only the type, flags and inputs
    /// of `info` are used.
    fn acceleration_structure_build_sizes(&self, info: &AccelerationStructureBuildInfo) -> Result<AccelerationStructureBuildSize>;

    /// Serialize a root signature description. On failure, returns the serializer diagnostic.
    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> std::result::Result<Vec<u8>, String>;
    /// Create a root signature from a serialized blob.
    fn create_root_signature(&self, blob: &[u8]) -> Result<RootSignatureHandle>;
    /// Destroy a root signature.
    fn destroy_root_signature(&self, signature: RootSignatureHandle);

    /// Create a ray tracing pipeline state object.
    fn create_pipeline_state(&self, info: &RayTracingPipelineCreateInfo) -> Result<PipelineHandle>;
    /// Destroy a pipeline state object.
    fn destroy_pipeline_state(&self, pipeline: PipelineHandle);
    /// Get the program identifier of an export or hit group in a pipeline.
    fn shader_identifier(&self, pipeline: PipelineHandle, export: &str) -> Option<ShaderIdentifier>;

    /// Create a shader visible descriptor heap.
    fn create_descriptor_heap(&self, capacity: u32) -> Result<DescriptorHeapInfo>;
    /// Destroy a descriptor heap.
    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle);
    /// Write a view into a descriptor heap slot.
    fn write_descriptor(&self, heap: DescriptorHeapHandle, index: u32, view: &DescriptorView) -> Result<()>;

    /// Create a command list in the recording state.
    fn create_command_list(&self) -> Result<Self::CommandList>;
    /// Reset a command list after its work completed, so it can be recorded again.
    fn reset_command_list(&self, list: &mut Self::CommandList) -> Result<()>;
    /// Close and submit a command list.
    fn submit(&self, list: &mut Self::CommandList) -> Result<()>;

    /// Create a fence with an initial value.
    fn create_fence(&self, initial_value: u64) -> Result<FenceHandle>;
    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);
    /// Signal a fence from the queue after all previously submitted work.
    fn signal(&self, fence: FenceHandle, value: u64) -> Result<()>;
    /// Block until the fence reaches `value`. There is no timeout.
    fn wait(&self, fence: FenceHandle, value: u64) -> Result<()>;
    /// The last value the fence reached.
    fn completed_value(&self, fence: FenceHandle) -> Result<u64>;
}
