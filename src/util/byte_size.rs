//! Byte sizes of vertex formats used by acceleration structure geometry

use std::mem::size_of;

use ash::vk;

/// Size in bytes of a single element of this type.
pub trait ByteSize {
    /// Returns `None` if the size is not known for this value.
    fn byte_size(&self) -> Option<usize>;
}

impl ByteSize for vk::Format {
    fn byte_size(&self) -> Option<usize> {
        match *self {
            vk::Format::R32G32_SFLOAT => Some(2 * size_of::<f32>()),
            vk::Format::R32G32B32_SFLOAT => Some(3 * size_of::<f32>()),
            vk::Format::R32G32B32A32_SFLOAT => Some(4 * size_of::<f32>()),
            vk::Format::R16G16_SFLOAT => Some(2 * size_of::<u16>()),
            vk::Format::R16G16B16A16_SFLOAT => Some(4 * size_of::<u16>()),
            vk::Format::R16G16_SNORM => Some(2 * size_of::<i16>()),
            vk::Format::R16G16B16A16_SNORM => Some(4 * size_of::<i16>()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_position_formats() {
        assert_eq!(vk::Format::R32G32B32_SFLOAT.byte_size(), Some(12));
        assert_eq!(vk::Format::R32G32_SFLOAT.byte_size(), Some(8));
        assert_eq!(vk::Format::R8G8B8A8_UNORM.byte_size(), None);
    }
}
