//! Exposes the GPU resources used by the ray tracer: buffers, images, descriptor heaps, vertex geometry and
//! acceleration structures.

pub mod buffer;
pub mod descriptor_heap;
pub mod geometry_buffer;
pub mod image;
pub mod raytracing;
