//! The static demo scene.
//!
//! Two meshes: a triangle and a large ground plane. The first bottom level structure holds both, the second only the
//! triangle. Instance 0 places the first structure at the origin, instances 1 and 2 place the second one to the left
//! and right, rotating about the Y axis a little more every frame. Each instance has a constant buffer with three
//! vertex colors.

use std::mem::size_of;

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::allocator::traits::Allocator;
use crate::pipeline::topology::ShaderTableTopology;
use crate::resource::buffer::Buffer;
use crate::resource::geometry_buffer::GeometryBuffer;
use crate::resource::raytracing::{BlasReference, GeometryDescriptor, InstanceRecord};
use crate::util::transform::TransformMatrix;

/// A vertex with a position and a color. The position is read by acceleration structure builds, the color by
/// the closest hit shader through a structured buffer view.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TriVertex {
    /// Object space position
    pub position: [f32; 3],
    /// RGBA color
    pub color: [f32; 4],
}

const_assert_eq!(size_of::<TriVertex>(), 28);

/// Format of [`TriVertex::position`]
pub const VERTEX_FORMAT: vk::Format = vk::Format::R32G32B32_SFLOAT;

const fn vertex(position: [f32; 3], color: [f32; 4]) -> TriVertex {
    TriVertex {
        position,
        color,
    }
}

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const YELLOW: [f32; 4] = [1.0, 1.0, 0.0, 1.0];
const CYAN: [f32; 4] = [0.0, 1.0, 1.0, 1.0];
const MAGENTA: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

/// The triangle
pub const TRIANGLE_VERTICES: [TriVertex; 3] = [
    vertex([0.0, 1.0, 0.0], RED),
    vertex([0.866, -0.5, 0.0], GREEN),
    vertex([-0.866, -0.5, 0.0], BLUE),
];

/// The ground plane, two triangles
pub const PLANE_VERTICES: [TriVertex; 6] = [
    vertex([-100.0, -1.0, -2.0], RED),
    vertex([100.0, -1.0, 100.0], RED),
    vertex([-100.0, -1.0, 100.0], RED),
    vertex([-100.0, -1.0, -2.0], RED),
    vertex([100.0, -1.0, -2.0], RED),
    vertex([100.0, -1.0, 100.0], RED),
];

/// Contents of the constant buffer of one instance: a color per triangle corner.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct InstanceColors(pub [[f32; 4]; 3]);

const_assert_eq!(size_of::<InstanceColors>(), 48);

/// Constant buffer contents, per instance
pub const INSTANCE_COLORS: [InstanceColors; 3] = [
    InstanceColors([RED, GREEN, BLUE]),
    InstanceColors([YELLOW, CYAN, MAGENTA]),
    InstanceColors([MAGENTA, YELLOW, CYAN]),
];

/// Number of instances in the scene
pub const INSTANCE_COUNT: usize = INSTANCE_COLORS.len();

/// Which bottom level structure each instance uses: 0 for the triangle and plane, 1 for the triangle.
pub const INSTANCE_BLAS: [usize; INSTANCE_COUNT] = [0, 1, 1];

/// Instance transforms for a rotation angle in radians. The first instance never moves.
pub fn instance_transforms(rotation: f32) -> Vec<TransformMatrix> {
    let rotation = Mat4::from_rotation_y(rotation);
    vec![
        TransformMatrix::identity(),
        TransformMatrix::from_mat4(Mat4::from_translation(Vec3::new(-2.0, 0.0, 0.0)) * rotation),
        TransformMatrix::from_mat4(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)) * rotation),
    ]
}

/// The shader table topology of the scene, given references to both bottom level structures.
pub fn topology(blases: &[BlasReference; 2], ray_type_count: u32) -> ShaderTableTopology {
    ShaderTableTopology::new(ray_type_count, &INSTANCE_BLAS.map(|index| blases[index]))
}

/// Geometry and per-instance data of the demo scene.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Scene<A: Allocator> {
    triangle: GeometryBuffer<A>,
    plane: GeometryBuffer<A>,
    constant_buffers: Vec<Buffer<A>>,
    rotation: f32,
    rotation_step: f32,
}

impl<A: Allocator> Scene<A> {
    /// Upload the scene geometry.
    pub fn new(allocator: &mut A, rotation_step: f32) -> Result<Self> {
        let triangle = GeometryBuffer::new(allocator, "triangle vertices", &TRIANGLE_VERTICES, VERTEX_FORMAT)?;
        let plane = GeometryBuffer::new(allocator, "plane vertices", &PLANE_VERTICES, VERTEX_FORMAT)?;
        Ok(Self {
            triangle,
            plane,
            constant_buffers: vec![],
            rotation: 0.0,
            rotation_step,
        })
    }

    /// Upload one constant buffer per instance. Replaces previously created buffers.
    pub fn create_constant_buffers(&mut self, allocator: &mut A) -> Result<()> {
        self.constant_buffers = INSTANCE_COLORS
            .iter()
            .enumerate()
            .map(|(index, colors)| {
                Buffer::new_with_data(
                    allocator,
                    &format!("instance {index} constants"),
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    std::slice::from_ref(colors),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Created {} instance constant buffers", self.constant_buffers.len());
        Ok(())
    }

    /// Geometries of the first bottom level structure: the triangle, then the plane.
    pub fn triangle_and_plane_geometry(&self) -> [GeometryDescriptor; 2] {
        [self.triangle.descriptor(), self.plane.descriptor()]
    }

    /// Geometry of the second bottom level structure.
    pub fn triangle_geometry(&self) -> [GeometryDescriptor; 1] {
        [self.triangle.descriptor()]
    }

    /// Instance records at the current rotation, with hit group offsets taken from `topology`.
    pub fn instances(&self, blases: &[BlasReference; 2], topology: &ShaderTableTopology) -> Vec<InstanceRecord> {
        INSTANCE_BLAS
            .iter()
            .zip(self.transforms())
            .enumerate()
            .map(|(index, (&blas, transform))| {
                InstanceRecord::new(blases[blas])
                    .transform(transform)
                    .instance_id(index as u32)
                    .hit_group_offset(topology.hit_group_offset(index).unwrap_or_default())
            })
            .collect()
    }

    /// Instance transforms at the current rotation.
    pub fn transforms(&self) -> Vec<TransformMatrix> {
        instance_transforms(self.rotation)
    }

    /// Advance the rotation by one step.
    pub fn advance(&mut self) {
        self.rotation += self.rotation_step;
    }

    /// Current rotation in radians
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    /// Triangle vertex buffer
    pub fn triangle(&self) -> &GeometryBuffer<A> {
        &self.triangle
    }

    /// Plane vertex buffer
    pub fn plane(&self) -> &GeometryBuffer<A> {
        &self.plane
    }

    /// Constant buffers, one per instance. Empty until [`Scene::create_constant_buffers`] is called.
    pub fn constant_buffers(&self) -> &[Buffer<A>] {
        &self.constant_buffers
    }
}
