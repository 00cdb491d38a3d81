//! Utilities for querying acceleration structure build sizes

use anyhow::{ensure, Result};
use ash::vk;

use crate::core::device::Device;
use crate::core::error::Error;
use crate::resource::raytracing::AccelerationStructureBuildInfo;

/// Holds the required sizes of buffers for the acceleration structure
#[derive(Debug, Default, Eq, PartialEq, Hash, Copy, Clone)]
pub struct AccelerationStructureBuildSize {
    /// Required size of the acceleration structure
    pub size: vk::DeviceSize,
    /// Required size of the scratch buffer for update operations
    pub update_scratch_size: vk::DeviceSize,
    /// Required size of the scratch buffer for build operations
    pub build_scratch_size: vk::DeviceSize,
}

/// Get the build sizes for this acceleration structure build info. The sizes are used as reported by the device.
pub fn query_build_size<D: Device>(device: &D, info: &AccelerationStructureBuildInfo) -> Result<AccelerationStructureBuildSize> {
    let sizes = device.acceleration_structure_build_sizes(info)?;
    ensure!(
        sizes.size > 0,
        Error::Device(format!("size query for {:?} acceleration structure reported an empty result", info.ty()))
    );
    debug!(
        "{:?} acceleration structure over {} inputs: result {} bytes, build scratch {} bytes, update scratch {} bytes",
        info.ty(),
        info.input_count(),
        sizes.size,
        sizes.build_scratch_size,
        sizes.update_scratch_size
    );
    Ok(sizes)
}
