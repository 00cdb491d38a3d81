//! Parameters for acceleration structure build commands

use ash::vk;

use crate::resource::raytracing::{AccelerationStructureType, GeometryDescriptor};

/// Geometry inputs of a build.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AccelerationStructureInputs {
    /// Triangle geometries of a bottom level structure, in build order.
    Triangles(Vec<GeometryDescriptor>),
    /// Instance descriptors of a top level structure.
    Instances {
        /// Address of the instance descriptor buffer
        data: vk::DeviceAddress,
        /// Number of descriptors in the buffer
        count: u32,
    },
}

/// A complete acceleration structure build or update command.
///
/// The destination and source are the GPU addresses of result buffers. An update with
/// `src == dst` refits the structure in place.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AccelerationStructureBuildInfo {
    ty: AccelerationStructureType,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    mode: vk::BuildAccelerationStructureModeKHR,
    src: Option<vk::DeviceAddress>,
    dst: vk::DeviceAddress,
    scratch_data: vk::DeviceAddress,
    inputs: AccelerationStructureInputs,
}

impl Default for AccelerationStructureBuildInfo {
    fn default() -> Self {
        Self {
            ty: AccelerationStructureType::TopLevel,
            flags: Default::default(),
            mode: Default::default(),
            src: None,
            dst: 0,
            scratch_data: 0,
            inputs: AccelerationStructureInputs::Triangles(vec![]),
        }
    }
}

impl AccelerationStructureBuildInfo {
    /// A full build
    pub fn new_build() -> Self {
        Self::default().mode(vk::BuildAccelerationStructureModeKHR::BUILD)
    }

    /// An incremental update. Requires the source structure to be built with `ALLOW_UPDATE`.
    pub fn new_update() -> Self {
        Self::default().mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
    }

    /// Set the level of the structure
    pub fn set_type(mut self, ty: AccelerationStructureType) -> Self {
        self.ty = ty;
        self
    }

    /// Set the build flags
    pub fn flags(mut self, flags: vk::BuildAccelerationStructureFlagsKHR) -> Self {
        self.flags = flags;
        self
    }

    /// Set the build mode
    pub fn mode(mut self, mode: vk::BuildAccelerationStructureModeKHR) -> Self {
        self.mode = mode;
        self
    }

    /// Set the structure an update reads from
    pub fn src(mut self, src: vk::DeviceAddress) -> Self {
        self.src = Some(src);
        self
    }

    /// Set the structure that is written
    pub fn dst(mut self, dst: vk::DeviceAddress) -> Self {
        self.dst = dst;
        self
    }

    /// Set the scratch memory address
    pub fn scratch_data(mut self, data: vk::DeviceAddress) -> Self {
        self.scratch_data = data;
        self
    }

    /// Append a triangle geometry. Replaces instance inputs if any were set.
    pub fn push_triangles(mut self, triangles: GeometryDescriptor) -> Self {
        match &mut self.inputs {
            AccelerationStructureInputs::Triangles(geometries) => geometries.push(triangles),
            AccelerationStructureInputs::Instances {
                ..
            } => self.inputs = AccelerationStructureInputs::Triangles(vec![triangles]),
        }
        self
    }

    /// Use `count` instance descriptors at `data` as input
    pub fn instances(mut self, data: vk::DeviceAddress, count: u32) -> Self {
        self.inputs = AccelerationStructureInputs::Instances {
            data,
            count,
        };
        self
    }

    /// The structure level
    pub fn ty(&self) -> AccelerationStructureType {
        self.ty
    }

    /// The build flags
    pub fn build_flags(&self) -> vk::BuildAccelerationStructureFlagsKHR {
        self.flags
    }

    /// The build mode
    pub fn build_mode(&self) -> vk::BuildAccelerationStructureModeKHR {
        self.mode
    }

    /// Whether this is an incremental update
    pub fn is_update(&self) -> bool {
        self.mode == vk::BuildAccelerationStructureModeKHR::UPDATE
    }

    /// Source structure address, for updates
    pub fn source(&self) -> Option<vk::DeviceAddress> {
        self.src
    }

    /// Destination structure address
    pub fn destination(&self) -> vk::DeviceAddress {
        self.dst
    }

    /// Scratch memory address
    pub fn scratch(&self) -> vk::DeviceAddress {
        self.scratch_data
    }

    /// The geometry inputs
    pub fn inputs(&self) -> &AccelerationStructureInputs {
        &self.inputs
    }

    /// Number of geometries (bottom level) or instances (top level) in the inputs.
    pub fn input_count(&self) -> u32 {
        match &self.inputs {
            AccelerationStructureInputs::Triangles(geometries) => geometries.len() as u32,
            AccelerationStructureInputs::Instances {
                count,
                ..
            } => *count,
        }
    }
}
