//! Mapping of instances and ray types onto shader table records.
//!
//! During traversal, the hit group record for a hit is found at
//! `hit_group_offset(instance) + geometry_index * ray_type_count + ray_type`. This module computes the
//! per-instance offsets so every (instance, geometry, ray type) triple gets its own record, in instance order.
//! Miss records are indexed by ray type only.

use anyhow::{ensure, Result};

use crate::core::error::Error;
use crate::resource::raytracing::{BlasReference, InstanceRecord, MAX_INSTANCE_FIELD};

/// Record counts and hit group offsets for one instance set.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ShaderTableTopology {
    ray_type_count: u32,
    offsets: Vec<u32>,
    geometry_counts: Vec<u32>,
}

impl ShaderTableTopology {
    /// Assign consecutive hit group offsets to instances of the given bottom level structures, in order.
    ///
    /// # Example
    /// ```
    /// # use deimos::prelude::*;
    /// # fn offsets(triangle_and_plane: BlasReference, triangle: BlasReference) {
    /// let topology = ShaderTableTopology::new(2, &[triangle_and_plane, triangle, triangle]);
    /// assert_eq!(topology.hit_group_offset(2), Some(6));
    /// # }
    /// ```
    pub fn new(ray_type_count: u32, instances: &[BlasReference]) -> Self {
        let mut offsets = Vec::with_capacity(instances.len());
        let mut next = 0;
        for blas in instances {
            offsets.push(next);
            next += blas.geometry_count() * ray_type_count;
        }
        Self {
            ray_type_count,
            offsets,
            geometry_counts: instances.iter().map(|blas| blas.geometry_count()).collect(),
        }
    }

    /// Derive the topology from instance records that already carry hit group offsets.
    /// # Errors
    /// - [`Error::ValueOutOfRange`] if an offset does not fit in 24 bits.
    /// - [`Error::HitGroupOffsetMismatch`] if the record ranges of two instances overlap or leave gaps.
    pub fn from_instances(ray_type_count: u32, instances: &[InstanceRecord]) -> Result<Self> {
        let expected = Self::new(ray_type_count, &instances.iter().map(|instance| instance.blas).collect::<Vec<_>>());
        for (index, instance) in instances.iter().enumerate() {
            ensure!(
                instance.hit_group_offset <= MAX_INSTANCE_FIELD,
                Error::ValueOutOfRange {
                    what: "hit group offset",
                    value: instance.hit_group_offset as u64,
                    max: MAX_INSTANCE_FIELD as u64,
                }
            );
            ensure!(
                Some(instance.hit_group_offset) == expected.hit_group_offset(index),
                Error::HitGroupOffsetMismatch {
                    instance: index,
                    expected: expected.offsets[index],
                    actual: instance.hit_group_offset,
                }
            );
        }
        Ok(expected)
    }

    /// Hit group offset of an instance
    pub fn hit_group_offset(&self, instance: usize) -> Option<u32> {
        self.offsets.get(instance).copied()
    }

    /// All hit group offsets, in instance order
    pub fn hit_group_offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Number of ray types
    pub fn ray_type_count(&self) -> u32 {
        self.ray_type_count
    }

    /// Number of instances
    pub fn instance_count(&self) -> usize {
        self.offsets.len()
    }

    /// Number of records in the hit group region
    pub fn hit_record_count(&self) -> usize {
        self.geometry_counts.iter().map(|&count| (count * self.ray_type_count) as usize).sum()
    }

    /// Number of records in the miss region
    pub fn miss_record_count(&self) -> usize {
        self.ray_type_count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_geometry_counts() {
        let two = BlasReference::new(0x1000, 2);
        let one = BlasReference::new(0x2000, 1);
        let topology = ShaderTableTopology::new(2, &[two, one, one]);
        assert_eq!(topology.hit_group_offsets(), &[0, 4, 6]);
        assert_eq!(topology.hit_record_count(), 8);
        assert_eq!(topology.miss_record_count(), 2);
        assert_eq!(topology.hit_group_offset(3), None);
    }

    #[test]
    fn instance_offsets_checked() {
        let one = BlasReference::new(0x2000, 1);
        let good = [InstanceRecord::new(one), InstanceRecord::new(one).hit_group_offset(2)];
        assert_eq!(ShaderTableTopology::from_instances(2, &good).unwrap().hit_record_count(), 4);

        let overlapping = [InstanceRecord::new(one), InstanceRecord::new(one).hit_group_offset(1)];
        let err = ShaderTableTopology::from_instances(2, &overlapping).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::HitGroupOffsetMismatch { instance: 1, expected: 2, actual: 1 })));
    }
}
