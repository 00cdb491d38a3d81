//! Instance records of top level acceleration structures, and their GPU descriptor layout

use anyhow::{ensure, Result};
use ash::vk;
use ash::vk::Packed24_8;

use crate::core::error::Error;
use crate::resource::raytracing::BlasReference;
use crate::util::to_vk::IntoVulkanType;
use crate::util::transform::TransformMatrix;

/// Largest value that fits in the 24-bit instance fields.
pub const MAX_INSTANCE_FIELD: u32 = (1 << 24) - 1;

/// Size in bytes of the transform at the start of each instance descriptor
pub const INSTANCE_TRANSFORM_SIZE: usize = std::mem::size_of::<vk::TransformMatrixKHR>();

/// An instance in the acceleration structure instance buffer. This is the 64 byte
/// `VkAccelerationStructureInstanceKHR` layout, which matches `D3D12_RAYTRACING_INSTANCE_DESC`.
#[derive(Derivative, Copy, Clone)]
#[derivative(Debug)]
#[repr(transparent)]
pub struct AccelerationStructureInstance(#[derivative(Debug = "ignore")] vk::AccelerationStructureInstanceKHR);

const_assert_eq!(std::mem::size_of::<AccelerationStructureInstance>(), 64);
const_assert_eq!(INSTANCE_TRANSFORM_SIZE, 48);

impl Default for AccelerationStructureInstance {
    /// Create a default instance in an acceleration structure
    fn default() -> Self {
        Self(vk::AccelerationStructureInstanceKHR {
            transform: TransformMatrix::default().into_vulkan(),
            instance_custom_index_and_mask: Packed24_8::new(0, 0),
            instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(0, 0),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: 0,
            },
        })
    }
}

impl AccelerationStructureInstance {
    /// Set the custom index of this instance. Only 24 bits of precision are supported.
    pub fn custom_index(mut self, idx: u32) -> Result<Self> {
        ensure!(
            idx <= MAX_INSTANCE_FIELD,
            Error::ValueOutOfRange {
                what: "instance id",
                value: idx as u64,
                max: MAX_INSTANCE_FIELD as u64,
            }
        );
        self.0.instance_custom_index_and_mask = Packed24_8::new(idx, self.0.instance_custom_index_and_mask.high_8());
        Ok(self)
    }

    /// Set the mask of this instance, used to disable specific instances when tracing
    pub fn mask(mut self, mask: u8) -> Self {
        self.0.instance_custom_index_and_mask = Packed24_8::new(self.0.instance_custom_index_and_mask.low_24(), mask);
        self
    }

    /// Set the hit group offset into the shader binding table for this instance. Only 24 bits of precision are supported.
    pub fn sbt_record_offset(mut self, offset: u32) -> Result<Self> {
        ensure!(
            offset <= MAX_INSTANCE_FIELD,
            Error::ValueOutOfRange {
                what: "hit group offset",
                value: offset as u64,
                max: MAX_INSTANCE_FIELD as u64,
            }
        );
        self.0.instance_shader_binding_table_record_offset_and_flags =
            Packed24_8::new(offset, self.0.instance_shader_binding_table_record_offset_and_flags.high_8());
        Ok(self)
    }

    /// Set the instance flags
    pub fn flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.0.instance_shader_binding_table_record_offset_and_flags = Packed24_8::new(
            self.0.instance_shader_binding_table_record_offset_and_flags.low_24(),
            flags.as_raw() as u8,
        );
        self
    }

    /// Set the device address of the bottom level structure this instance refers to
    pub fn acceleration_structure(mut self, address: vk::DeviceAddress) -> Self {
        self.0.acceleration_structure_reference = vk::AccelerationStructureReferenceKHR {
            device_handle: address,
        };
        self
    }

    /// Set this instance's transform matrix
    pub fn transform(mut self, transform: TransformMatrix) -> Self {
        self.0.transform = transform.into_vulkan();
        self
    }

    /// The raw bytes of this descriptor, as written to the instance buffer.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: The descriptor is 48 bytes of floats, two packed u32 and a u64 union, all initialized
        // and without padding (checked by the size assertion above).
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, std::mem::size_of::<Self>()) }
    }
}

/// A bottom level structure placed in the scene. The reference to the bottom level structure is non-owning.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InstanceRecord {
    /// The instanced bottom level structure
    pub blas: BlasReference,
    /// Object to world transform
    pub transform: TransformMatrix,
    /// Instance id visible to shaders, 24 bits
    pub instance_id: u32,
    /// Instance mask, tested against the ray mask
    pub mask: u8,
    /// Index of the first hit group record of this instance, 24 bits
    pub hit_group_offset: u32,
    /// Instance flags
    pub flags: vk::GeometryInstanceFlagsKHR,
}

impl InstanceRecord {
    /// Create an instance of `blas` with an identity transform, visible to all rays.
    pub fn new(blas: BlasReference) -> Self {
        Self {
            blas,
            transform: TransformMatrix::identity(),
            instance_id: 0,
            mask: 0xFF,
            hit_group_offset: 0,
            flags: vk::GeometryInstanceFlagsKHR::empty(),
        }
    }

    /// Set the transform
    pub fn transform(mut self, transform: impl Into<TransformMatrix>) -> Self {
        self.transform = transform.into();
        self
    }

    /// Set the instance id
    pub fn instance_id(mut self, id: u32) -> Self {
        self.instance_id = id;
        self
    }

    /// Set the instance mask
    pub fn mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    /// Set the hit group offset
    pub fn hit_group_offset(mut self, offset: u32) -> Self {
        self.hit_group_offset = offset;
        self
    }

    /// Set the instance flags
    pub fn flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.flags = flags;
        self
    }

    /// Whether `other` differs from this record in nothing but the transform.
    pub fn same_layout(&self, other: &InstanceRecord) -> bool {
        self.blas == other.blas
            && self.instance_id == other.instance_id
            && self.mask == other.mask
            && self.hit_group_offset == other.hit_group_offset
            && self.flags == other.flags
    }

    /// Build the GPU descriptor of this instance.
    pub fn descriptor(&self) -> Result<AccelerationStructureInstance> {
        Ok(AccelerationStructureInstance::default()
            .transform(self.transform)
            .custom_index(self.instance_id)?
            .mask(self.mask)
            .sbt_record_offset(self.hit_group_offset)?
            .flags(self.flags)
            .acceleration_structure(self.blas.address()))
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;

    fn blas() -> BlasReference {
        BlasReference::new(0xABCD_0000, 1)
    }

    #[test]
    fn descriptor_layout() -> Result<()> {
        let transform = TransformMatrix::from_mat4(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
        let instance = InstanceRecord::new(blas())
            .transform(transform)
            .instance_id(2)
            .hit_group_offset(6)
            .descriptor()?;
        let bytes = instance.as_bytes();
        assert_eq!(bytes.len(), 64);
        // Translation x is the fourth float of the first row
        assert_eq!(&bytes[12..16], &2.0f32.to_ne_bytes());
        // Instance id in the low 24 bits, mask in the high 8
        assert_eq!(u32::from_ne_bytes([bytes[48], bytes[49], bytes[50], bytes[51]]), 2 | (0xFF << 24));
        assert_eq!(u32::from_ne_bytes([bytes[52], bytes[53], bytes[54], bytes[55]]), 6);
        assert_eq!(&bytes[56..64], &0xABCD_0000u64.to_ne_bytes());
        Ok(())
    }

    #[test]
    fn instance_id_out_of_range() {
        let err = InstanceRecord::new(blas()).instance_id(1 << 24).descriptor().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ValueOutOfRange { .. })));
    }

    #[test]
    fn layout_ignores_transform() {
        let a = InstanceRecord::new(blas()).hit_group_offset(4);
        let b = a.transform(Mat4::from_rotation_y(0.5));
        assert!(a.same_layout(&b));
        assert!(!a.same_layout(&b.mask(0x01)));
    }
}
