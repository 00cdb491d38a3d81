//! Various utilities

pub mod align;
pub mod byte_size;
pub mod to_vk;
pub mod transform;
