//! Re-exports the commonly used types of the crate.

pub use ash::vk;

pub use crate::allocator::memory_type::MemoryType;
pub use crate::allocator::traits::*;

pub use crate::core::app_info::*;
pub use crate::core::context::GraphicsContext;
pub use crate::core::device::*;
pub use crate::core::error::Error;
pub use crate::core::handle::*;

pub use crate::sync::fence::Fence;

pub use crate::resource::buffer::*;
pub use crate::resource::descriptor_heap::*;
pub use crate::resource::geometry_buffer::GeometryBuffer;
pub use crate::resource::image::*;
pub use crate::resource::raytracing::*;

pub use crate::pipeline::raytracing::*;
pub use crate::pipeline::root_signature::*;
pub use crate::pipeline::shader::*;
pub use crate::pipeline::shader_binding_table::*;
pub use crate::pipeline::topology::ShaderTableTopology;

pub use crate::util::transform::TransformMatrix;

pub use crate::wsi::frame::*;
pub use crate::wsi::swapchain::Swapchain;

pub use crate::renderer::{Renderer, RootSignatures};
pub use crate::scene::{InstanceColors, Scene, TriVertex};
