//! A device that records commands and executes them on the host.
//!
//! Nothing is traced. Execution validates the command stream instead: every transition barrier must name the state
//! the resource is actually in, acceleration structure builds must target memory in the right states, updates must
//! refit a structure that was built with `ALLOW_UPDATE`, and copies move the bytes between resources. Every submitted
//! command list is kept in a log for inspection.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, ensure, Result};
use ash::vk;

use crate::core::device::{
    CommandList, DescriptorHeapInfo, Device, DispatchRaysDesc, RayTracingCapabilities, RayTracingTier, ResourceBarrier,
    ResourceState, ShaderIdentifier, ShaderTableProperties,
};
use crate::core::error::Error;
use crate::core::handle::{DescriptorHandle, DescriptorHeapHandle, FenceHandle, PipelineHandle, ResourceHandle, RootSignatureHandle};
use crate::headless::allocator::{HeadlessAllocator, ResourceTable};
use crate::pipeline::raytracing::{RayTracingPipelineCreateInfo, StateSubobject};
use crate::pipeline::root_signature::{RootParameter, RootSignatureDesc};
use crate::pipeline::shader::ShaderStage;
use crate::resource::descriptor_heap::DescriptorView;
use crate::resource::raytracing::{
    AccelerationStructureBuildInfo, AccelerationStructureBuildSize, AccelerationStructureInputs, AccelerationStructureType,
};
use crate::util::align::align;

const ROOT_SIGNATURE_MAGIC: &[u8] = b"RSIG";
const DESCRIPTOR_INCREMENT: u32 = 32;
const SIZE_GRANULARITY: vk::DeviceSize = 256;

/// A command recorded into a [`HeadlessCommandList`].
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    /// Acceleration structure build or update
    BuildAccelerationStructure(AccelerationStructureBuildInfo),
    /// Resource barriers
    ResourceBarrier(Vec<ResourceBarrier>),
    /// Descriptor heap binding
    SetDescriptorHeap(DescriptorHeapHandle),
    /// Global root signature binding
    SetComputeRootSignature(RootSignatureHandle),
    /// Pipeline binding
    SetPipelineState(PipelineHandle),
    /// Ray dispatch
    DispatchRays(DispatchRaysDesc),
    /// Full resource copy
    CopyResource {
        /// Destination
        dst: ResourceHandle,
        /// Source
        src: ResourceHandle,
    },
}

/// Command list of the headless device.
#[derive(Debug, Default)]
pub struct HeadlessCommandList {
    commands: Vec<RecordedCommand>,
    closed: bool,
}

impl HeadlessCommandList {
    /// Commands recorded since the last reset
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Whether the list was submitted and not reset yet
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn record(&mut self, command: RecordedCommand) {
        if self.closed {
            error!("Recording {command:?} into a closed command list");
        }
        trace!("Recorded {command:?}");
        self.commands.push(command);
    }
}

impl CommandList for HeadlessCommandList {
    fn build_acceleration_structure(&mut self, info: &AccelerationStructureBuildInfo) {
        self.record(RecordedCommand::BuildAccelerationStructure(info.clone()));
    }

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.record(RecordedCommand::ResourceBarrier(barriers.to_vec()));
    }

    fn set_descriptor_heap(&mut self, heap: DescriptorHeapHandle) {
        self.record(RecordedCommand::SetDescriptorHeap(heap));
    }

    fn set_compute_root_signature(&mut self, signature: RootSignatureHandle) {
        self.record(RecordedCommand::SetComputeRootSignature(signature));
    }

    fn set_pipeline_state(&mut self, pipeline: PipelineHandle) {
        self.record(RecordedCommand::SetPipelineState(pipeline));
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) {
        self.record(RecordedCommand::DispatchRays(*desc));
    }

    fn copy_resource(&mut self, dst: ResourceHandle, src: ResourceHandle) {
        self.record(RecordedCommand::CopyResource {
            dst,
            src,
        });
    }
}

/// Number of device objects that have not been destroyed.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LiveObjects {
    /// Root signatures
    pub root_signatures: usize,
    /// Pipeline state objects
    pub pipelines: usize,
    /// Descriptor heaps
    pub descriptor_heaps: usize,
    /// Fences
    pub fences: usize,
}

#[derive(Debug)]
struct DeviceState {
    capabilities: RayTracingCapabilities,
    next_handle: u64,
    root_signatures: HashSet<RootSignatureHandle>,
    pipelines: HashMap<PipelineHandle, HashSet<String>>,
    heaps: HashMap<DescriptorHeapHandle, Vec<Option<DescriptorView>>>,
    fences: HashMap<FenceHandle, u64>,
    // Result address of every built structure, with its build flags
    structures: HashMap<vk::DeviceAddress, vk::BuildAccelerationStructureFlagsKHR>,
    submissions: Vec<Vec<RecordedCommand>>,
}

impl DeviceState {
    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

/// A ray tracing device that runs on the host.
///
/// Clones share all state. [`HeadlessDevice::allocator`] returns an allocator whose resources the device can see, so
/// barriers and copies are checked against real resource states.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct HeadlessDevice {
    #[derivative(Debug = "ignore")]
    state: Arc<Mutex<DeviceState>>,
    #[derivative(Debug = "ignore")]
    resources: Arc<Mutex<ResourceTable>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Create a tier 1.1 device with the default shader table properties.
    pub fn new() -> Self {
        Self::with_capabilities(RayTracingCapabilities {
            tier: RayTracingTier::Tier11,
            shader_table: ShaderTableProperties::default(),
        })
    }

    /// Create a device that reports the given capabilities.
    pub fn with_capabilities(capabilities: RayTracingCapabilities) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                capabilities,
                next_handle: 1,
                root_signatures: HashSet::new(),
                pipelines: HashMap::new(),
                heaps: HashMap::new(),
                fences: HashMap::new(),
                structures: HashMap::new(),
                submissions: vec![],
            })),
            resources: Arc::default(),
        }
    }

    /// An allocator whose resources this device executes commands on.
    pub fn allocator(&self) -> HeadlessAllocator {
        HeadlessAllocator::with_table(self.resources.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceState>> {
        Ok(self.state.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Every command list submitted so far, oldest first.
    pub fn submissions(&self) -> Result<Vec<Vec<RecordedCommand>>> {
        Ok(self.lock()?.submissions.clone())
    }

    /// Number of command lists submitted so far.
    pub fn submission_count(&self) -> Result<usize> {
        Ok(self.lock()?.submissions.len())
    }

    /// Number of device objects that are still alive.
    pub fn live_objects(&self) -> Result<LiveObjects> {
        let state = self.lock()?;
        Ok(LiveObjects {
            root_signatures: state.root_signatures.len(),
            pipelines: state.pipelines.len(),
            descriptor_heaps: state.heaps.len(),
            fences: state.fences.len(),
        })
    }

    /// The view written into a descriptor heap slot.
    pub fn descriptor(&self, heap: DescriptorHeapHandle, index: u32) -> Result<Option<DescriptorView>> {
        let state = self.lock()?;
        let slots = state
            .heaps
            .get(&heap)
            .ok_or_else(|| Error::Device(format!("unknown descriptor heap {heap:?}")))?;
        Ok(slots.get(index as usize).copied().flatten())
    }

    fn identifier(&self, pipeline: PipelineHandle, export: &str, size: usize) -> ShaderIdentifier {
        let mut bytes = Vec::with_capacity(size + 8);
        let mut chunk = 0u64;
        while bytes.len() < size {
            let mut hasher = DefaultHasher::new();
            (pipeline, export, chunk).hash(&mut hasher);
            bytes.extend_from_slice(&hasher.finish().to_le_bytes());
            chunk += 1;
        }
        bytes.truncate(size);
        ShaderIdentifier::new(bytes)
    }

    fn execute(&self, commands: &[RecordedCommand]) -> Result<()> {
        let mut state = self.lock()?;
        let mut resources = self.resources.lock().map_err(|_| Error::PoisonError)?;
        let mut heap_bound = false;
        let mut pipeline_bound = false;
        for command in commands {
            match command {
                RecordedCommand::BuildAccelerationStructure(info) => {
                    let (_, dst) = resources
                        .find_address(info.destination())
                        .ok_or_else(|| Error::Device(format!("build destination {:#x} is not in any resource", info.destination())))?;
                    ensure!(
                        dst.state == ResourceState::AccelerationStructure,
                        Error::Device(format!("build destination `{}` is in state {:?}", dst.name, dst.state))
                    );
                    let (_, scratch) = resources
                        .find_address(info.scratch())
                        .ok_or_else(|| Error::Device(format!("scratch {:#x} is not in any resource", info.scratch())))?;
                    ensure!(
                        scratch.state == ResourceState::UnorderedAccess,
                        Error::Device(format!("scratch `{}` is in state {:?}", scratch.name, scratch.state))
                    );
                    if info.is_update() {
                        let source = info.source().unwrap_or_default();
                        let flags = state
                            .structures
                            .get(&source)
                            .ok_or_else(|| Error::Device(format!("update source {source:#x} was never built")))?;
                        ensure!(
                            flags.contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE),
                            Error::Device(format!("update source {source:#x} was not built with ALLOW_UPDATE"))
                        );
                    }
                    state.structures.insert(info.destination(), info.build_flags());
                }
                RecordedCommand::ResourceBarrier(barriers) => {
                    for barrier in barriers {
                        match *barrier {
                            ResourceBarrier::Transition {
                                resource,
                                before,
                                after,
                            } => {
                                let entry = resources.get_mut(resource)?;
                                ensure!(
                                    entry.state == before,
                                    Error::Device(format!(
                                        "transition of `{}` from {before:?}, but it is in state {:?}",
                                        entry.name, entry.state
                                    ))
                                );
                                entry.state = after;
                            }
                            ResourceBarrier::UnorderedAccess {
                                resource,
                            } => {
                                resources.get(resource)?;
                            }
                        }
                    }
                }
                RecordedCommand::SetDescriptorHeap(heap) => {
                    ensure!(state.heaps.contains_key(heap), Error::Device(format!("unknown descriptor heap {heap:?}")));
                    heap_bound = true;
                }
                RecordedCommand::SetComputeRootSignature(signature) => {
                    ensure!(
                        state.root_signatures.contains(signature),
                        Error::Device(format!("unknown root signature {signature:?}"))
                    );
                }
                RecordedCommand::SetPipelineState(pipeline) => {
                    ensure!(state.pipelines.contains_key(pipeline), Error::Device(format!("unknown pipeline {pipeline:?}")));
                    pipeline_bound = true;
                }
                RecordedCommand::DispatchRays(desc) => {
                    ensure!(pipeline_bound, Error::Device("dispatch without a pipeline".into()));
                    ensure!(heap_bound, Error::Device("dispatch without a descriptor heap".into()));
                    ensure!(
                        desc.width > 0 && desc.height > 0 && desc.depth > 0,
                        Error::Device(format!("empty dispatch {}x{}x{}", desc.width, desc.height, desc.depth))
                    );
                    ensure!(desc.ray_generation.size > 0, Error::Device("dispatch without a ray generation record".into()));
                }
                RecordedCommand::CopyResource {
                    dst,
                    src,
                } => {
                    let source = resources.get(*src)?;
                    ensure!(
                        source.state == ResourceState::CopySource,
                        Error::Device(format!("copy source `{}` is in state {:?}", source.name, source.state))
                    );
                    let data = source.data.clone();
                    let target = resources.get_mut(*dst)?;
                    ensure!(
                        target.state == ResourceState::CopyDest,
                        Error::Device(format!("copy destination `{}` is in state {:?}", target.name, target.state))
                    );
                    ensure!(
                        target.data.len() == data.len(),
                        Error::Device(format!("copy between resources of {} and {} bytes", data.len(), target.data.len()))
                    );
                    target.data.copy_from_slice(&data);
                }
            }
        }
        state.submissions.push(commands.to_vec());
        Ok(())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

impl Device for HeadlessDevice {
    type CommandList = HeadlessCommandList;

    fn capabilities(&self) -> Result<RayTracingCapabilities> {
        Ok(self.lock()?.capabilities)
    }

    fn acceleration_structure_build_sizes(&self, info: &AccelerationStructureBuildInfo) -> Result<AccelerationStructureBuildSize> {
        let allow_update = info.build_flags().contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE);
        let sizes = match (info.ty(), info.inputs()) {
            (AccelerationStructureType::BottomLevel, AccelerationStructureInputs::Triangles(geometries)) => {
                ensure!(!geometries.is_empty(), Error::Device("size query without geometry".into()));
                let primitives = geometries
                    .iter()
                    .map(|geometry| geometry.primitive_count() as vk::DeviceSize)
                    .sum::<vk::DeviceSize>();
                AccelerationStructureBuildSize {
                    size: align(256 + 64 * primitives, SIZE_GRANULARITY),
                    build_scratch_size: align(128 + 32 * primitives, SIZE_GRANULARITY),
                    update_scratch_size: if allow_update {
                        align(64 + 16 * primitives, SIZE_GRANULARITY)
                    } else {
                        0
                    },
                }
            }
            (
                AccelerationStructureType::TopLevel,
                AccelerationStructureInputs::Instances {
                    count,
                    ..
                },
            ) => {
                let count = *count as vk::DeviceSize;
                AccelerationStructureBuildSize {
                    size: align(256 + 128 * count, SIZE_GRANULARITY),
                    build_scratch_size: align(256 + 64 * count, SIZE_GRANULARITY),
                    update_scratch_size: if allow_update {
                        align(128 + 32 * count, SIZE_GRANULARITY)
                    } else {
                        0
                    },
                }
            }
            (ty, _) => bail!(Error::Device(format!("{ty:?} size query with mismatched inputs"))),
        };
        Ok(sizes)
    }

    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> std::result::Result<Vec<u8>, String> {
        for (index, parameter) in desc.parameters().iter().enumerate() {
            if let RootParameter::DescriptorTable(ranges) = parameter {
                if ranges.is_empty() {
                    return Err(format!("root parameter {index}: descriptor table has no ranges"));
                }
                if let Some(range) = ranges.iter().find(|range| range.count == 0) {
                    return Err(format!("root parameter {index}: descriptor range at offset {} is empty", range.offset_in_table));
                }
            }
        }
        let mut blob = ROOT_SIGNATURE_MAGIC.to_vec();
        blob.extend_from_slice(format!("{desc:?}").as_bytes());
        Ok(blob)
    }

    fn create_root_signature(&self, blob: &[u8]) -> Result<RootSignatureHandle> {
        ensure!(blob.starts_with(ROOT_SIGNATURE_MAGIC), Error::Device("invalid root signature blob".into()));
        let mut state = self.lock()?;
        let handle = RootSignatureHandle::from_raw(state.handle());
        state.root_signatures.insert(handle);
        Ok(handle)
    }

    fn destroy_root_signature(&self, signature: RootSignatureHandle) {
        match self.lock() {
            Ok(mut state) => {
                if !state.root_signatures.remove(&signature) {
                    warn!("Destroying unknown root signature {signature:?}");
                }
            }
            Err(err) => error!("Failed to destroy {signature:?}: {err}"),
        }
    }

    fn create_pipeline_state(&self, info: &RayTracingPipelineCreateInfo) -> Result<PipelineHandle> {
        let library = info.library().ok_or(Error::MissingShaderLibrary)?;
        for export in library.exports() {
            ensure!(
                contains(library.bytecode(), format!("{}(", export.name()).as_bytes()),
                Error::Device(format!("export `{}` not found in shader library", export.name()))
            );
        }
        let mut state = self.lock()?;
        for subobject in info.subobjects() {
            match subobject {
                StateSubobject::LocalRootSignature(signature) | StateSubobject::GlobalRootSignature(signature) => {
                    ensure!(
                        state.root_signatures.contains(signature),
                        Error::Device(format!("pipeline uses unknown root signature {signature:?}"))
                    );
                }
                StateSubobject::ExportsAssociation {
                    subobject,
                    ..
                } => {
                    ensure!(
                        *subobject < info.subobjects().len(),
                        Error::Device(format!("association with subobject {subobject} out of range"))
                    );
                }
                _ => {}
            }
        }
        let addressable = library
            .exports()
            .iter()
            .filter(|export| matches!(export.stage(), ShaderStage::RayGeneration | ShaderStage::Miss))
            .map(|export| export.name().to_owned())
            .chain(info.hit_groups().iter().map(|group| group.name().to_owned()))
            .collect();
        let handle = PipelineHandle::from_raw(state.handle());
        state.pipelines.insert(handle, addressable);
        Ok(handle)
    }

    fn destroy_pipeline_state(&self, pipeline: PipelineHandle) {
        match self.lock() {
            Ok(mut state) => {
                if state.pipelines.remove(&pipeline).is_none() {
                    warn!("Destroying unknown pipeline {pipeline:?}");
                }
            }
            Err(err) => error!("Failed to destroy {pipeline:?}: {err}"),
        }
    }

    fn shader_identifier(&self, pipeline: PipelineHandle, export: &str) -> Option<ShaderIdentifier> {
        let state = self.state.lock().ok()?;
        let size = state.capabilities.shader_table.identifier_size as usize;
        state
            .pipelines
            .get(&pipeline)
            .filter(|names| names.contains(export))
            .map(|_| self.identifier(pipeline, export, size))
    }

    fn create_descriptor_heap(&self, capacity: u32) -> Result<DescriptorHeapInfo> {
        ensure!(capacity > 0, Error::Device("descriptor heap without descriptors".into()));
        let mut state = self.lock()?;
        let handle = DescriptorHeapHandle::from_raw(state.handle());
        state.heaps.insert(handle, vec![None; capacity as usize]);
        Ok(DescriptorHeapInfo {
            handle,
            gpu_start: DescriptorHandle {
                ptr: 0x2_0000_0000 + handle.as_raw() * 0x1_0000,
            },
            increment: DESCRIPTOR_INCREMENT,
        })
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        match self.lock() {
            Ok(mut state) => {
                if state.heaps.remove(&heap).is_none() {
                    warn!("Destroying unknown descriptor heap {heap:?}");
                }
            }
            Err(err) => error!("Failed to destroy {heap:?}: {err}"),
        }
    }

    fn write_descriptor(&self, heap: DescriptorHeapHandle, index: u32, view: &DescriptorView) -> Result<()> {
        let mut state = self.lock()?;
        let slots = state
            .heaps
            .get_mut(&heap)
            .ok_or_else(|| Error::Device(format!("unknown descriptor heap {heap:?}")))?;
        let slot = slots
            .get_mut(index as usize)
            .ok_or_else(|| Error::Device(format!("descriptor index {index} out of range")))?;
        *slot = Some(*view);
        Ok(())
    }

    fn create_command_list(&self) -> Result<HeadlessCommandList> {
        Ok(HeadlessCommandList::default())
    }

    fn reset_command_list(&self, list: &mut HeadlessCommandList) -> Result<()> {
        ensure!(list.closed, Error::Device("reset of a command list that was not submitted".into()));
        list.commands.clear();
        list.closed = false;
        Ok(())
    }

    fn submit(&self, list: &mut HeadlessCommandList) -> Result<()> {
        ensure!(!list.closed, Error::Device("command list submitted twice without a reset".into()));
        list.closed = true;
        self.execute(&list.commands)?;
        debug!("Executed command list with {} commands", list.commands.len());
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceHandle> {
        let mut state = self.lock()?;
        let handle = FenceHandle::from_raw(state.handle());
        state.fences.insert(handle, initial_value);
        Ok(handle)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        match self.lock() {
            Ok(mut state) => {
                if state.fences.remove(&fence).is_none() {
                    warn!("Destroying unknown fence {fence:?}");
                }
            }
            Err(err) => error!("Failed to destroy {fence:?}: {err}"),
        }
    }

    fn signal(&self, fence: FenceHandle, value: u64) -> Result<()> {
        let mut state = self.lock()?;
        let current = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| Error::Device(format!("unknown fence {fence:?}")))?;
        ensure!(value >= *current, Error::Device(format!("fence signaled with {value}, already at {current}")));
        // Work completes on submission, so the signal is reached immediately
        *current = value;
        Ok(())
    }

    fn wait(&self, fence: FenceHandle, value: u64) -> Result<()> {
        let completed = self.completed_value(fence)?;
        ensure!(
            completed >= value,
            Error::Device(format!("waiting for fence value {value} that is never signaled (at {completed})"))
        );
        Ok(())
    }

    fn completed_value(&self, fence: FenceHandle) -> Result<u64> {
        self.lock()?
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| Error::Device(format!("unknown fence {fence:?}")).into())
    }
}
