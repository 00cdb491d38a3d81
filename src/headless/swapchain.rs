//! A swapchain of plain images that rotates on present.

use anyhow::{ensure, Result};
use ash::vk;

use crate::core::device::ResourceState;
use crate::core::error::Error;
use crate::core::handle::ResourceHandle;
use crate::headless::allocator::HeadlessAllocator;
use crate::resource::image::{Image, ImageCreateInfo};
use crate::wsi::swapchain::Swapchain;

/// Format of the headless back buffers
pub const BACK_BUFFER_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Swapchain that owns `image_count` images in the present state and advances to the next one on every present.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    images: Vec<Image<HeadlessAllocator>>,
    extent: vk::Extent2D,
    current: u32,
    present_count: u64,
}

impl HeadlessSwapchain {
    /// Create the back buffers.
    pub fn new(allocator: &mut HeadlessAllocator, extent: vk::Extent2D, image_count: u32) -> Result<Self> {
        ensure!(
            image_count > 0,
            Error::ValueOutOfRange {
                what: "back buffer count",
                value: 0,
                max: u32::MAX as u64,
            }
        );
        let images = (0..image_count)
            .map(|index| {
                Image::new(
                    allocator,
                    &format!("back buffer {index}"),
                    &ImageCreateInfo {
                        format: BACK_BUFFER_FORMAT,
                        extent,
                        usage: vk::ImageUsageFlags::TRANSFER_DST,
                        initial_state: ResourceState::Present,
                    },
                )
            })
            .collect::<Result<Vec<_>>>()?;
        info!("Created headless swapchain with {image_count} {}x{} images", extent.width, extent.height);
        Ok(Self {
            images,
            extent,
            current: 0,
            present_count: 0,
        })
    }

    /// Number of presents so far
    pub fn present_count(&self) -> u64 {
        self.present_count
    }

    /// All back buffers
    pub fn images(&self) -> &[Image<HeadlessAllocator>] {
        &self.images
    }
}

impl Swapchain for HeadlessSwapchain {
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn current_image_index(&self) -> u32 {
        self.current
    }

    fn back_buffer(&self) -> ResourceHandle {
        self.images[self.current as usize].handle()
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn present(&mut self) -> Result<()> {
        trace!("Presenting back buffer {}", self.current);
        self.current = (self.current + 1) % self.image_count();
        self.present_count += 1;
        Ok(())
    }
}
