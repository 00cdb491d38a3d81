//! Vertex data for one mesh, uploaded once into GPU-visible memory.

use std::mem::size_of;

use anyhow::{ensure, Result};
use ash::vk;
use bytemuck::Pod;

use crate::allocator::traits::Allocator;
use crate::core::error::Error;
use crate::resource::buffer::Buffer;
use crate::resource::raytracing::GeometryDescriptor;

/// Owns the vertex buffer of a single non-indexed triangle mesh.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct GeometryBuffer<A: Allocator> {
    buffer: Buffer<A>,
    vertex_count: u32,
    stride: vk::DeviceSize,
    format: vk::Format,
}

impl<A: Allocator> GeometryBuffer<A> {
    /// Upload `vertices`. The position of each vertex must be at the start of `V` and have format `format`.
    pub fn new<V: Pod>(allocator: &mut A, name: &str, vertices: &[V], format: vk::Format) -> Result<Self> {
        ensure!(!vertices.is_empty(), Error::InvalidVertexCount(0));
        let buffer = Buffer::new_with_data(
            allocator,
            name,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            vertices,
        )?;
        debug!("Uploaded {} vertices for {name} ({} bytes)", vertices.len(), buffer.size());
        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
            stride: size_of::<V>() as vk::DeviceSize,
            format,
        })
    }

    /// Geometry descriptor of this mesh, used as bottom level build input. Geometry is marked opaque.
    pub fn descriptor(&self) -> GeometryDescriptor {
        GeometryDescriptor::new(self.buffer.address(), self.stride, self.vertex_count, self.format).flags(vk::GeometryFlagsKHR::OPAQUE)
    }

    /// The vertex buffer
    pub fn buffer(&self) -> &Buffer<A> {
        &self.buffer
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Size of one vertex in bytes
    pub fn stride(&self) -> vk::DeviceSize {
        self.stride
    }

    /// Position format
    pub fn format(&self) -> vk::Format {
        self.format
    }
}
