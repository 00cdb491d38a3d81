//! Shader binding table layout and construction.
//!
//! A shader binding table holds one record per ray generation, miss and hit group slot. Each record starts with the
//! program identifier, followed by the root arguments of the program's local root signature in consecutive 8-byte slots.
//! All records share one stride: the largest record, rounded up to the record alignment. Regions are laid out in the order
//! ray generation, miss, hit group, each starting at a multiple of the table alignment.
//!
//! # Example
//! ```ignore
//! let sbt = ShaderBindingTableBuilder::new()
//!     .ray_generation("rayGen", [RootArgument::DescriptorTable(heap.gpu_handle(0))])
//!     .miss("miss", [])
//!     .miss("shadowMiss", [])
//!     .hit_group("HitGroup", [RootArgument::GpuAddress(constants.address()), RootArgument::DescriptorTable(heap.gpu_handle(2))])
//!     .hit_group("ShadowHitGroup", []);
//! let sbt = ShaderBindingTable::new(&mut ctx, &pipeline, &topology, sbt)?;
//! ```

use anyhow::{ensure, Result};
use ash::vk;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::Allocator;
use crate::core::context::GraphicsContext;
use crate::core::device::{Device, DispatchRaysDesc, ResourceState, ShaderTableProperties};
use crate::core::error::Error;
use crate::core::handle::DescriptorHandle;
use crate::pipeline::raytracing::PipelineState;
use crate::pipeline::root_signature::RootArgumentKind;
use crate::pipeline::shader::ShaderStage;
use crate::pipeline::topology::ShaderTableTopology;
use crate::resource::buffer::{Buffer, BufferCreateInfo};
use crate::util::align::{align, is_aligned};

/// Size in bytes of a single root argument in a shader record.
pub const ROOT_ARGUMENT_SIZE: vk::DeviceSize = 8;

/// A value written into a shader record after the program identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RootArgument {
    /// GPU address for a root descriptor
    GpuAddress(vk::DeviceAddress),
    /// Descriptor heap handle for a descriptor table
    DescriptorTable(DescriptorHandle),
}

impl RootArgument {
    /// The kind of root parameter this argument binds to
    pub fn kind(&self) -> RootArgumentKind {
        match self {
            RootArgument::GpuAddress(_) => RootArgumentKind::GpuAddress,
            RootArgument::DescriptorTable(_) => RootArgumentKind::DescriptorTable,
        }
    }

    /// Bytes written into the shader record
    pub fn to_bytes(&self) -> [u8; ROOT_ARGUMENT_SIZE as usize] {
        match self {
            RootArgument::GpuAddress(address) => address.to_le_bytes(),
            RootArgument::DescriptorTable(handle) => handle.ptr.to_le_bytes(),
        }
    }
}

/// One shader record: the program it calls and its root arguments.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ShaderTableEntry {
    /// Export or hit group name
    pub program: String,
    /// Root arguments, in local root signature parameter order
    pub arguments: Vec<RootArgument>,
}

impl ShaderTableEntry {
    /// Create a new entry
    pub fn new(program: impl Into<String>, arguments: impl Into<Vec<RootArgument>>) -> Self {
        Self {
            program: program.into(),
            arguments: arguments.into(),
        }
    }

    /// Size of this record before padding, given the identifier size
    pub fn footprint(&self, identifier_size: u32) -> vk::DeviceSize {
        identifier_size as vk::DeviceSize + ROOT_ARGUMENT_SIZE * self.arguments.len() as vk::DeviceSize
    }
}

/// A single region in a shader binding table
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct SBTEntry {
    /// Byte offset of this region into the table
    pub offset: vk::DeviceSize,
    /// Amount of records in this region
    pub count: u32,
}

/// Byte layout of a shader binding table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ShaderTableLayout {
    /// Distance between two records
    pub stride: vk::DeviceSize,
    /// Size of the program identifier at the start of each record
    pub identifier_size: u32,
    /// Ray generation region
    pub ray_generation: SBTEntry,
    /// Miss region
    pub miss: SBTEntry,
    /// Hit group region
    pub hit_group: SBTEntry,
    /// Total size of the table
    pub size: vk::DeviceSize,
}

impl ShaderTableLayout {
    /// Compute the table layout for the given regions.
    /// # Errors
    /// - [`Error::ZeroAlignment`] if either alignment in `properties` is zero.
    /// - [`Error::ShaderRecordTooLarge`] if the stride exceeds the maximum record stride.
    /// - [`Error::MisalignedRootDescriptor`] if a root argument does not land on an 8-byte boundary.
    pub fn compute(
        properties: &ShaderTableProperties,
        ray_generation: &[ShaderTableEntry],
        miss: &[ShaderTableEntry],
        hit_group: &[ShaderTableEntry],
    ) -> Result<Self> {
        properties.validate()?;
        let regions = [ray_generation, miss, hit_group];
        let largest = regions
            .iter()
            .flat_map(|region| region.iter())
            .map(|entry| entry.footprint(properties.identifier_size))
            .max()
            .unwrap_or(properties.identifier_size as vk::DeviceSize);
        let stride = align(largest, properties.record_alignment);
        ensure!(
            stride <= properties.max_record_stride,
            Error::ShaderRecordTooLarge {
                size: stride,
                max: properties.max_record_stride,
            }
        );

        let region_size = |count: usize| stride * count as vk::DeviceSize;
        let ray_generation_region = SBTEntry {
            offset: 0,
            count: ray_generation.len() as u32,
        };
        let miss_region = SBTEntry {
            offset: align(region_size(ray_generation.len()), properties.table_alignment),
            count: miss.len() as u32,
        };
        let hit_group_region = SBTEntry {
            offset: align(miss_region.offset + region_size(miss.len()), properties.table_alignment),
            count: hit_group.len() as u32,
        };
        let layout = Self {
            stride,
            identifier_size: properties.identifier_size,
            ray_generation: ray_generation_region,
            miss: miss_region,
            hit_group: hit_group_region,
            size: hit_group_region.offset + region_size(hit_group.len()),
        };

        let mut record = 0;
        for (region, entries) in [ray_generation_region, miss_region, hit_group_region].iter().zip(regions) {
            for (index, entry) in entries.iter().enumerate() {
                let start = region.offset + stride * index as vk::DeviceSize;
                for argument in 0..entry.arguments.len() {
                    let offset = layout.argument_offset(argument);
                    ensure!(
                        is_aligned(start + offset, ROOT_ARGUMENT_SIZE),
                        Error::MisalignedRootDescriptor {
                            record,
                            offset,
                        }
                    );
                }
                record += 1;
            }
        }

        debug!(
            "Shader table layout: stride {}, regions at {}/{}/{}, {} bytes",
            layout.stride, layout.ray_generation.offset, layout.miss.offset, layout.hit_group.offset, layout.size
        );
        Ok(layout)
    }

    /// Offset of a root argument within a record
    pub fn argument_offset(&self, argument: usize) -> vk::DeviceSize {
        self.identifier_size as vk::DeviceSize + ROOT_ARGUMENT_SIZE * argument as vk::DeviceSize
    }

    /// Byte size of a region
    pub fn region_size(&self, region: &SBTEntry) -> vk::DeviceSize {
        self.stride * region.count as vk::DeviceSize
    }

    /// Total number of records
    pub fn record_count(&self) -> u32 {
        self.ray_generation.count + self.miss.count + self.hit_group.count
    }
}

/// Collects the records of a shader binding table, per region.
#[derive(Debug, Clone, Default)]
pub struct ShaderBindingTableBuilder {
    ray_generation: Vec<ShaderTableEntry>,
    miss: Vec<ShaderTableEntry>,
    hit_group: Vec<ShaderTableEntry>,
}

impl ShaderBindingTableBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ray generation record
    pub fn ray_generation(mut self, export: impl Into<String>, arguments: impl Into<Vec<RootArgument>>) -> Self {
        self.ray_generation.push(ShaderTableEntry::new(export, arguments));
        self
    }

    /// Add a miss record. Miss records are indexed by ray type.
    pub fn miss(mut self, export: impl Into<String>, arguments: impl Into<Vec<RootArgument>>) -> Self {
        self.miss.push(ShaderTableEntry::new(export, arguments));
        self
    }

    /// Add a hit group record. Hit group records are ordered by instance, then geometry, then ray type.
    pub fn hit_group(mut self, group: impl Into<String>, arguments: impl Into<Vec<RootArgument>>) -> Self {
        self.hit_group.push(ShaderTableEntry::new(group, arguments));
        self
    }

    /// Compute the layout of the records added so far.
    pub fn layout(&self, properties: &ShaderTableProperties) -> Result<ShaderTableLayout> {
        ShaderTableLayout::compute(properties, &self.ray_generation, &self.miss, &self.hit_group)
    }
}

/// A shader binding table in an upload heap buffer. Written once, read by every dispatch.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ShaderBindingTable<A: Allocator> {
    buffer: Buffer<A>,
    layout: ShaderTableLayout,
    regions: [vk::StridedDeviceAddressRegionKHR; 3],
}

impl<A: Allocator> ShaderBindingTable<A> {
    /// Validate the records against the pipeline and instance topology, then allocate and write the table.
    /// # Errors
    /// - [`Error::ShaderTableRegionMismatch`] if a region does not hold the number of records the topology needs.
    /// - [`Error::UnknownExport`] or [`Error::WrongShaderStage`] if a record names the wrong kind of program.
    /// - [`Error::RootArgumentMismatch`] if the arguments of a record do not match the local root signature of its program.
    /// - Any layout error of [`ShaderTableLayout::compute`].
    pub fn new<D: Device>(
        ctx: &mut GraphicsContext<D, A>,
        pipeline: &PipelineState<D>,
        topology: &ShaderTableTopology,
        builder: ShaderBindingTableBuilder,
    ) -> Result<Self> {
        check_count("ray generation", 1, builder.ray_generation.len())?;
        check_count("miss", topology.miss_record_count(), builder.miss.len())?;
        check_count("hit group", topology.hit_record_count(), builder.hit_group.len())?;

        for entry in &builder.ray_generation {
            check_stage(pipeline, &entry.program, ShaderStage::RayGeneration)?;
        }
        for entry in &builder.miss {
            check_stage(pipeline, &entry.program, ShaderStage::Miss)?;
        }
        for entry in &builder.hit_group {
            ensure!(
                pipeline.hit_groups().iter().any(|group| group.name() == entry.program),
                Error::UnknownExport(entry.program.clone())
            );
        }
        let records = builder
            .ray_generation
            .iter()
            .chain(&builder.miss)
            .chain(&builder.hit_group)
            .collect::<Vec<_>>();
        for entry in &records {
            check_arguments(pipeline, entry)?;
        }

        let layout = builder.layout(ctx.shader_table_properties())?;
        let mut buffer = Buffer::new(
            ctx.allocator_mut(),
            "shader binding table",
            &BufferCreateInfo {
                size: layout.size,
                usage: vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                initial_state: ResourceState::GenericRead,
                location: MemoryType::CpuToGpu,
            },
        )?;

        {
            let mut mapped = buffer.map()?;
            let starts = [layout.ray_generation, layout.miss, layout.hit_group]
                .into_iter()
                .flat_map(|region| (0..region.count).map(move |index| region.offset + layout.stride * index as vk::DeviceSize));
            for (start, entry) in starts.zip(&records) {
                let start = start as usize;
                let identifier = pipeline.identifier(&entry.program)?;
                mapped[start..start + identifier.len()].copy_from_slice(identifier.as_bytes());
                for (index, argument) in entry.arguments.iter().enumerate() {
                    let offset = start + layout.argument_offset(index) as usize;
                    mapped[offset..offset + ROOT_ARGUMENT_SIZE as usize].copy_from_slice(&argument.to_bytes());
                }
            }
        }

        let region = |entry: &SBTEntry| -> Result<vk::StridedDeviceAddressRegionKHR> {
            let view = buffer.view(entry.offset, layout.region_size(entry))?;
            Ok(vk::StridedDeviceAddressRegionKHR {
                device_address: view.address(),
                stride: layout.stride,
                size: view.size(),
            })
        };
        let regions = [region(&layout.ray_generation)?, region(&layout.miss)?, region(&layout.hit_group)?];
        info!("Wrote shader binding table with {} records ({} bytes)", layout.record_count(), layout.size);

        Ok(Self {
            buffer,
            layout,
            regions,
        })
    }

    /// Address regions for ray generation, miss and hit group records, in that order.
    pub fn regions(&self) -> &[vk::StridedDeviceAddressRegionKHR; 3] {
        &self.regions
    }

    /// Dispatch description covering a `width` by `height` grid of rays with this table.
    pub fn dispatch_desc(&self, width: u32, height: u32) -> DispatchRaysDesc {
        DispatchRaysDesc {
            ray_generation: self.regions[0],
            miss: self.regions[1],
            hit_group: self.regions[2],
            width,
            height,
            depth: 1,
        }
    }

    /// Byte layout of the table
    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }

    /// Record stride
    pub fn stride(&self) -> vk::DeviceSize {
        self.layout.stride
    }

    /// Total number of records
    pub fn record_count(&self) -> u32 {
        self.layout.record_count()
    }

    /// The buffer holding the table
    pub fn buffer(&self) -> &Buffer<A> {
        &self.buffer
    }

    /// Mutable access to the buffer, for reading back records.
    pub fn buffer_mut(&mut self) -> &mut Buffer<A> {
        &mut self.buffer
    }
}

fn check_count(region: &'static str, expected: usize, actual: usize) -> Result<()> {
    ensure!(
        expected == actual,
        Error::ShaderTableRegionMismatch {
            region,
            expected,
            actual,
        }
    );
    Ok(())
}

fn check_stage<D: Device>(pipeline: &PipelineState<D>, program: &str, stage: ShaderStage) -> Result<()> {
    let export = pipeline
        .library()
        .export(program)
        .ok_or_else(|| Error::UnknownExport(program.to_owned()))?;
    ensure!(
        export.stage() == stage,
        Error::WrongShaderStage {
            export: program.to_owned(),
            expected: stage,
        }
    );
    Ok(())
}

fn check_arguments<D: Device>(pipeline: &PipelineState<D>, entry: &ShaderTableEntry) -> Result<()> {
    let expected = pipeline.local_root_arguments(&entry.program);
    let mismatch = |reason: String| Error::RootArgumentMismatch {
        export: entry.program.clone(),
        reason,
    };
    ensure!(
        expected.len() == entry.arguments.len(),
        mismatch(format!("expected {} arguments, got {}", expected.len(), entry.arguments.len()))
    );
    for (index, (kind, argument)) in expected.iter().zip(&entry.arguments).enumerate() {
        ensure!(
            *kind == argument.kind(),
            mismatch(format!("argument {index} is {:?}, expected {kind:?}", argument.kind()))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(arguments: usize) -> ShaderTableEntry {
        ShaderTableEntry::new("program", vec![RootArgument::GpuAddress(0x1000); arguments])
    }

    #[test]
    fn stride_covers_largest_record() -> Result<()> {
        let properties = ShaderTableProperties::default();
        let layout = ShaderTableLayout::compute(&properties, &[entry(1)], &[entry(0), entry(0)], &[entry(2), entry(0)])?;
        // 32 byte identifier + 16 bytes of arguments, aligned to 32
        assert_eq!(layout.stride, 64);
        assert_eq!(layout.miss.offset, 64);
        assert_eq!(layout.hit_group.offset, 192);
        assert_eq!(layout.size, 320);
        assert_eq!(layout.argument_offset(1), 40);
        Ok(())
    }

    #[test]
    fn regions_start_on_table_alignment() -> Result<()> {
        let properties = ShaderTableProperties::default();
        let layout = ShaderTableLayout::compute(&properties, &[entry(0)], &[entry(0)], &[entry(0)])?;
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.miss.offset, 64);
        assert_eq!(layout.hit_group.offset, 128);
        assert_eq!(layout.region_size(&layout.miss), 32);
        Ok(())
    }

    #[test]
    fn oversized_record() {
        let properties = ShaderTableProperties::default();
        let err = ShaderTableLayout::compute(&properties, &[entry(600)], &[], &[]).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ShaderRecordTooLarge { size: 4832, max: 4096 })));
    }

    #[test]
    fn zero_record_alignment() {
        let properties = ShaderTableProperties {
            record_alignment: 0,
            ..Default::default()
        };
        let err = ShaderTableLayout::compute(&properties, &[entry(0)], &[], &[]).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ZeroAlignment("record alignment"))));
    }

    #[test]
    fn misaligned_arguments() {
        let properties = ShaderTableProperties {
            identifier_size: 36,
            ..Default::default()
        };
        assert!(ShaderTableLayout::compute(&properties, &[entry(0)], &[], &[]).is_ok());
        let err = ShaderTableLayout::compute(&properties, &[entry(0)], &[entry(1)], &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MisalignedRootDescriptor { record: 1, offset: 36 })
        ));
    }

    #[test]
    fn argument_bytes() {
        let argument = RootArgument::DescriptorTable(DescriptorHandle {
            ptr: 0x0102_0304,
        });
        assert_eq!(argument.kind(), RootArgumentKind::DescriptorTable);
        assert_eq!(argument.to_bytes(), [4, 3, 2, 1, 0, 0, 0, 0]);
    }
}
