//! Provides utilities to manage 2D images.
//!
//! Images are managed through the [`Image`] struct. These images are backed by an allocation made through an
//! [`Allocator`], and are freed through it when dropped. The ray traced output and the headless swapchain
//! images are both [`Image`]s.

use anyhow::Result;
use ash::vk;

use crate::allocator::traits::Allocator;
use crate::core::device::ResourceState;
use crate::core::handle::ResourceHandle;

/// Parameters for creating an image.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ImageCreateInfo {
    /// Image format
    pub format: vk::Format,
    /// Size of the image
    pub extent: vk::Extent2D,
    /// How the image will be used. Unordered access corresponds to `STORAGE`.
    pub usage: vk::ImageUsageFlags,
    /// State the image is created in
    pub initial_state: ResourceState,
}

/// An owned 2D image.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Image<A: Allocator> {
    #[derivative(Debug = "ignore")]
    allocator: A,
    handle: ResourceHandle,
    /// Image format
    format: vk::Format,
    /// Size of the image.
    extent: vk::Extent2D,
}

impl<A: Allocator> Image<A> {
    /// Create a new image and allocate memory for it.
    pub fn new(allocator: &mut A, name: &str, info: &ImageCreateInfo) -> Result<Self> {
        let allocation = allocator.create_image(name, info)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new image {name} {:?} ({}x{} {:?})", allocation.handle, info.extent.width, info.extent.height, info.format);
        Ok(Self {
            allocator: allocator.clone(),
            handle: allocation.handle,
            format: info.format,
            extent: info.extent,
        })
    }

    /// Get the resource handle of this image
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Get the image format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Get the image size.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get the width of the image.
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    /// Get the height of the image.
    pub fn height(&self) -> u32 {
        self.extent.height
    }
}

impl<A: Allocator> Drop for Image<A> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying image {:?}", self.handle);
        if let Err(err) = self.allocator.free(self.handle) {
            error!("Failed to free image {:?}: {err}", self.handle);
        }
    }
}
