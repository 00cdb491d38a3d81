//! Triangle geometry input of bottom level acceleration structures

use anyhow::{ensure, Result};
use ash::vk;

use crate::core::error::Error;
use crate::util::byte_size::ByteSize;

/// Non-indexed triangle list geometry. Immutable once handed to a build.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GeometryDescriptor {
    /// Address of the vertex buffer
    pub vertex_data: vk::DeviceAddress,
    /// Vertex stride in the vertex buffer
    pub stride: vk::DeviceSize,
    /// Number of vertices, three per triangle
    pub vertex_count: u32,
    /// The vertex position format
    pub format: vk::Format,
    /// Geometry flags
    pub flags: vk::GeometryFlagsKHR,
}

impl GeometryDescriptor {
    /// Describe `vertex_count` vertices starting at `vertex_data`.
    pub fn new(vertex_data: vk::DeviceAddress, stride: vk::DeviceSize, vertex_count: u32, format: vk::Format) -> Self {
        Self {
            vertex_data,
            stride,
            vertex_count,
            format,
            flags: vk::GeometryFlagsKHR::empty(),
        }
    }

    /// Set the geometry flags
    pub fn flags(mut self, flags: vk::GeometryFlagsKHR) -> Self {
        self.flags = flags;
        self
    }

    /// Number of triangles in this geometry
    pub fn primitive_count(&self) -> u32 {
        self.vertex_count / 3
    }

    /// Check that this geometry can be built: the vertex count is a non-zero multiple of three and the stride
    /// fits at least one vertex position.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.vertex_count > 0 && self.vertex_count % 3 == 0,
            Error::InvalidVertexCount(self.vertex_count)
        );
        let required = self
            .format
            .byte_size()
            .ok_or(Error::UnsupportedVertexFormat(self.format))? as vk::DeviceSize;
        ensure!(
            self.stride >= required,
            Error::VertexStrideTooSmall {
                stride: self.stride,
                required,
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> GeometryDescriptor {
        GeometryDescriptor::new(0x1000, 28, 3, vk::Format::R32G32B32_SFLOAT)
    }

    #[test]
    fn valid_triangle() {
        assert!(triangle().validate().is_ok());
        assert_eq!(triangle().primitive_count(), 1);
    }

    #[test]
    fn rejects_partial_triangles() {
        let geometry = GeometryDescriptor {
            vertex_count: 4,
            ..triangle()
        };
        let err = geometry.validate().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidVertexCount(4))));
    }

    #[test]
    fn rejects_small_stride() {
        let geometry = GeometryDescriptor {
            stride: 8,
            ..triangle()
        };
        let err = geometry.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::VertexStrideTooSmall {
                stride: 8,
                required: 12
            })
        ));
    }
}
