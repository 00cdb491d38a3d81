//! Bottom and top level acceleration structures.
//!
//! A [`BottomLevelStructure`] is built once from triangle geometry and never changes. A [`TopLevelStructure`] places
//! bottom level structures in the scene through [`InstanceRecord`]s. It is built once, and then refitted in place every
//! time instance transforms change. Both record their commands into the command list of the [`GraphicsContext`], each
//! build is followed by an unordered access barrier on its result so later builds and traces see the finished structure.

use anyhow::{ensure, Result};
use ash::vk;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::Allocator;
use crate::core::context::GraphicsContext;
use crate::core::device::{CommandList, Device, ResourceBarrier, ResourceState};
use crate::core::error::Error;
use crate::resource::buffer::{Buffer, BufferCreateInfo};
use crate::resource::raytracing::{
    query_build_size, AccelerationStructureBuildInfo, AccelerationStructureBuildSize, AccelerationStructureInstance,
    AccelerationStructureType, GeometryDescriptor, InstanceRecord, INSTANCE_TRANSFORM_SIZE,
};
use crate::util::transform::TransformMatrix;

/// Size in bytes of one instance descriptor in the instance buffer
pub const INSTANCE_DESCRIPTOR_SIZE: vk::DeviceSize = std::mem::size_of::<AccelerationStructureInstance>() as vk::DeviceSize;

/// Non-owning reference to a built bottom level structure, stored in instance records.
/// Only obtainable from a [`BottomLevelStructure`], so the referenced build is always recorded first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BlasReference {
    address: vk::DeviceAddress,
    geometry_count: u32,
}

impl BlasReference {
    pub(crate) fn new(address: vk::DeviceAddress, geometry_count: u32) -> Self {
        Self {
            address,
            geometry_count,
        }
    }

    /// GPU address of the bottom level structure
    pub fn address(&self) -> vk::DeviceAddress {
        self.address
    }

    /// Number of geometries in the bottom level structure
    pub fn geometry_count(&self) -> u32 {
        self.geometry_count
    }
}

/// A built bottom level acceleration structure. Owns its scratch and result buffers.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct BottomLevelStructure<A: Allocator> {
    scratch: Buffer<A>,
    result: Buffer<A>,
    geometry_count: u32,
    sizes: AccelerationStructureBuildSize,
}

impl<A: Allocator> BottomLevelStructure<A> {
    /// Reference to this structure, for use in instance records.
    pub fn reference(&self) -> BlasReference {
        BlasReference::new(self.result.address(), self.geometry_count)
    }

    /// GPU address of the structure
    pub fn address(&self) -> vk::DeviceAddress {
        self.result.address()
    }

    /// Number of geometries the structure was built from
    pub fn geometry_count(&self) -> u32 {
        self.geometry_count
    }

    /// The buffer holding the structure
    pub fn result_buffer(&self) -> &Buffer<A> {
        &self.result
    }

    /// The scratch buffer used for the build
    pub fn scratch_buffer(&self) -> &Buffer<A> {
        &self.scratch
    }

    /// Sizes reported by the size query
    pub fn sizes(&self) -> &AccelerationStructureBuildSize {
        &self.sizes
    }
}

/// Build a bottom level structure from an ordered set of triangle geometries.
///
/// Records the build into the context's command list, followed by an unordered access barrier on the result.
/// # Errors
/// - [`Error::EmptyGeometry`] if `geometries` is empty. Nothing is recorded or allocated in this case.
/// - Any validation error of the geometries.
pub fn build_bottom_level<D: Device, A: Allocator>(
    ctx: &mut GraphicsContext<D, A>,
    geometries: &[GeometryDescriptor],
) -> Result<BottomLevelStructure<A>> {
    ensure!(!geometries.is_empty(), Error::EmptyGeometry);
    for geometry in geometries {
        geometry.validate()?;
    }

    let info = geometries
        .iter()
        .fold(AccelerationStructureBuildInfo::new_build().set_type(AccelerationStructureType::BottomLevel), |info, geometry| {
            info.push_triangles(*geometry)
        });
    let sizes = query_build_size(ctx.device(), &info)?;

    let scratch = Buffer::new(
        ctx.allocator_mut(),
        "blas scratch",
        &BufferCreateInfo {
            size: sizes.build_scratch_size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            initial_state: ResourceState::UnorderedAccess,
            location: MemoryType::GpuOnly,
        },
    )?;
    let result = Buffer::new(
        ctx.allocator_mut(),
        "blas",
        &BufferCreateInfo {
            size: sizes.size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            initial_state: ResourceState::AccelerationStructure,
            location: MemoryType::GpuOnly,
        },
    )?;

    let info = info.dst(result.address()).scratch_data(scratch.address());
    let cmd = ctx.command_list();
    cmd.build_acceleration_structure(&info);
    cmd.resource_barrier(&[ResourceBarrier::uav(result.handle())]);
    info!("Recorded bottom level build over {} geometries", geometries.len());

    Ok(BottomLevelStructure {
        scratch,
        result,
        geometry_count: geometries.len() as u32,
        sizes,
    })
}

/// A top level acceleration structure over an ordered, fixed set of instances.
///
/// The order of the instance records is the order of the descriptors in the instance buffer, and thus
/// the instance index seen by shaders. The structure is built with `ALLOW_UPDATE` and refitted in place.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct TopLevelStructure<A: Allocator> {
    scratch: Buffer<A>,
    result: Buffer<A>,
    instance_buffer: Buffer<A>,
    instances: Vec<InstanceRecord>,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    sizes: AccelerationStructureBuildSize,
    update_count: u64,
}

impl<A: Allocator> TopLevelStructure<A> {
    /// Build a top level structure. Allocates the scratch, result and instance buffers and writes every instance descriptor.
    /// # Errors
    /// - [`Error::EmptyInstanceSet`] if `instances` is empty.
    /// - [`Error::ValueOutOfRange`] if an instance id or hit group offset does not fit in 24 bits.
    pub fn build<D: Device>(ctx: &mut GraphicsContext<D, A>, instances: Vec<InstanceRecord>) -> Result<Self> {
        ensure!(!instances.is_empty(), Error::EmptyInstanceSet);
        let descriptors = instances
            .iter()
            .map(|instance| instance.descriptor())
            .collect::<Result<Vec<_>>>()?;

        let mut instance_buffer = Buffer::new(
            ctx.allocator_mut(),
            "tlas instances",
            &BufferCreateInfo {
                size: INSTANCE_DESCRIPTOR_SIZE * instances.len() as vk::DeviceSize,
                usage: vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                initial_state: ResourceState::GenericRead,
                location: MemoryType::CpuToGpu,
            },
        )?;
        {
            let mut mapped = instance_buffer.map()?;
            for (slot, descriptor) in mapped.chunks_exact_mut(INSTANCE_DESCRIPTOR_SIZE as usize).zip(&descriptors) {
                slot.copy_from_slice(descriptor.as_bytes());
            }
        }

        let flags = vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
        let info = AccelerationStructureBuildInfo::new_build()
            .set_type(AccelerationStructureType::TopLevel)
            .flags(flags)
            .instances(instance_buffer.address(), instances.len() as u32);
        let sizes = query_build_size(ctx.device(), &info)?;

        // Updates reuse the scratch buffer of the build
        let scratch = Buffer::new(
            ctx.allocator_mut(),
            "tlas scratch",
            &BufferCreateInfo {
                size: sizes.build_scratch_size.max(sizes.update_scratch_size),
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                initial_state: ResourceState::UnorderedAccess,
                location: MemoryType::GpuOnly,
            },
        )?;
        let result = Buffer::new(
            ctx.allocator_mut(),
            "tlas",
            &BufferCreateInfo {
                size: sizes.size,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
                initial_state: ResourceState::AccelerationStructure,
                location: MemoryType::GpuOnly,
            },
        )?;

        let info = info.dst(result.address()).scratch_data(scratch.address());
        let cmd = ctx.command_list();
        cmd.build_acceleration_structure(&info);
        cmd.resource_barrier(&[ResourceBarrier::uav(result.handle())]);
        info!("Recorded top level build over {} instances", instances.len());

        Ok(Self {
            scratch,
            result,
            instance_buffer,
            instances,
            flags,
            sizes,
            update_count: 0,
        })
    }

    /// Refit the structure in place with new instance transforms, one per instance in build order.
    ///
    /// Rewrites only the transforms in the instance buffer. Then records an unordered access barrier on the result,
    /// since a previous trace may still read it, an update with the structure as both source and destination, and a
    /// final barrier on the result. Nothing is recorded if the instance buffer cannot be written. No buffers are
    /// allocated.
    /// # Errors
    /// [`Error::InstanceCountChanged`] if the number of transforms differs from the number of instances.
    pub fn update<D: Device>(&mut self, ctx: &mut GraphicsContext<D, A>, transforms: &[TransformMatrix]) -> Result<()> {
        ensure!(
            transforms.len() == self.instances.len(),
            Error::InstanceCountChanged {
                expected: self.instances.len(),
                actual: transforms.len(),
            }
        );

        {
            let mut mapped = self.instance_buffer.map()?;
            for (slot, transform) in mapped
                .chunks_exact_mut(INSTANCE_DESCRIPTOR_SIZE as usize)
                .zip(transforms)
            {
                slot[..INSTANCE_TRANSFORM_SIZE].copy_from_slice(bytemuck::cast_slice::<f32, u8>(transform.elements()));
            }
        }
        for (instance, transform) in self.instances.iter_mut().zip(transforms) {
            instance.transform = *transform;
        }

        let info = AccelerationStructureBuildInfo::new_update()
            .set_type(AccelerationStructureType::TopLevel)
            .flags(self.flags)
            .instances(self.instance_buffer.address(), self.instances.len() as u32)
            .src(self.result.address())
            .dst(self.result.address())
            .scratch_data(self.scratch.address());
        let cmd = ctx.command_list();
        cmd.resource_barrier(&[ResourceBarrier::uav(self.result.handle())]);
        cmd.build_acceleration_structure(&info);
        cmd.resource_barrier(&[ResourceBarrier::uav(self.result.handle())]);
        self.update_count += 1;
        trace!("Recorded top level update #{}", self.update_count);
        Ok(())
    }

    /// Refit the structure with a full set of instance records. Only the transforms may differ from the records
    /// the structure was built with.
    /// # Errors
    /// - [`Error::InstanceCountChanged`] if instances were added or removed.
    /// - [`Error::InstanceLayoutChanged`] if anything but the transform of an instance changed.
    pub fn refit<D: Device>(&mut self, ctx: &mut GraphicsContext<D, A>, instances: &[InstanceRecord]) -> Result<()> {
        ensure!(
            instances.len() == self.instances.len(),
            Error::InstanceCountChanged {
                expected: self.instances.len(),
                actual: instances.len(),
            }
        );
        if let Some(index) = self
            .instances
            .iter()
            .zip(instances)
            .position(|(old, new)| !old.same_layout(new))
        {
            return Err(Error::InstanceLayoutChanged(index).into());
        }
        let transforms = instances.iter().map(|instance| instance.transform).collect::<Vec<_>>();
        self.update(ctx, &transforms)
    }

    /// The instance records, in instance buffer order
    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    /// Number of instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// GPU address of the structure
    pub fn address(&self) -> vk::DeviceAddress {
        self.result.address()
    }

    /// The buffer holding the structure
    pub fn result_buffer(&self) -> &Buffer<A> {
        &self.result
    }

    /// The scratch buffer used for builds and updates
    pub fn scratch_buffer(&self) -> &Buffer<A> {
        &self.scratch
    }

    /// The buffer holding the instance descriptors
    pub fn instance_buffer(&self) -> &Buffer<A> {
        &self.instance_buffer
    }

    /// Mutable access to the instance buffer, for reading back descriptors.
    pub fn instance_buffer_mut(&mut self) -> &mut Buffer<A> {
        &mut self.instance_buffer
    }

    /// Sizes reported by the size query
    pub fn sizes(&self) -> &AccelerationStructureBuildSize {
        &self.sizes
    }

    /// Number of updates recorded since the build
    pub fn update_count(&self) -> u64 {
        self.update_count
    }
}

/// Build a top level structure into an empty `existing`, or update the structure it holds in place.
///
/// Without a structure, this is a full build. With one, the structure is refitted: buffers are reused, and only instance
/// transforms may change. If the refit is rejected, the existing structure is left as it was.
pub fn build_or_update_top_level<'a, D: Device, A: Allocator>(
    ctx: &mut GraphicsContext<D, A>,
    instances: &[InstanceRecord],
    existing: &'a mut Option<TopLevelStructure<A>>,
) -> Result<&'a mut TopLevelStructure<A>> {
    match existing {
        Some(tlas) => {
            tlas.refit(ctx, instances)?;
            Ok(tlas)
        }
        None => Ok(existing.insert(TopLevelStructure::build(ctx, instances.to_vec())?)),
    }
}
