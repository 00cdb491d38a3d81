//! Exposes all structs needed to store initialization parameters.

use std::path::PathBuf;

use ash::vk;

/// Application settings used to initialize the renderer.
///
/// # Example
/// ```
/// use deimos::prelude::*;
///
/// let settings = AppBuilder::new()
///     .name("Deimos demo app")
///     .extent(1280, 720)
///     .back_buffers(3)
///     .shader_library("data/shaders.hlsl", "lib_6_3")
///     .build();
/// assert_eq!(settings.extent.width, 1280);
/// ```
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Application name. Used for logging and object names.
    pub name: String,
    /// Size of the ray traced output and of the back buffers.
    pub extent: vk::Extent2D,
    /// Number of swapchain images.
    pub back_buffer_count: u32,
    /// Number of ray types traced by the shaders. Each ray type gets a miss record and a hit record per geometry.
    pub ray_type_count: u32,
    /// Maximum ray payload size in bytes.
    pub max_payload_size: u32,
    /// Maximum hit attribute size in bytes.
    pub max_attribute_size: u32,
    /// Maximum trace recursion depth.
    pub max_recursion_depth: u32,
    /// Angle in radians the animated instances rotate each frame.
    pub rotation_step: f32,
    /// Path to the HLSL shader library.
    pub shader_path: PathBuf,
    /// Target profile passed to the shader compiler.
    pub shader_profile: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            name: String::from("Deimos app"),
            extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            back_buffer_count: 3,
            ray_type_count: 2,
            max_payload_size: 3 * std::mem::size_of::<f32>() as u32,
            max_attribute_size: 2 * std::mem::size_of::<f32>() as u32,
            max_recursion_depth: 2,
            rotation_step: 0.005,
            shader_path: PathBuf::from("data/shaders.hlsl"),
            shader_profile: String::from("lib_6_3"),
        }
    }
}

/// Application settings builder. Start from the defaults and override what you need.
pub struct AppBuilder {
    inner: AppSettings,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    /// Create a new application settings builder.
    pub fn new() -> Self {
        AppBuilder {
            inner: AppSettings::default(),
        }
    }

    /// Set the application name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Set the output size
    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.inner.extent = vk::Extent2D {
            width,
            height,
        };
        self
    }

    /// Set the number of swapchain images
    pub fn back_buffers(mut self, count: u32) -> Self {
        self.inner.back_buffer_count = count;
        self
    }

    /// Set the number of ray types
    pub fn ray_types(mut self, count: u32) -> Self {
        self.inner.ray_type_count = count;
        self
    }

    /// Set the payload and attribute size limits in bytes.
    pub fn payload_limits(mut self, max_payload_size: u32, max_attribute_size: u32) -> Self {
        self.inner.max_payload_size = max_payload_size;
        self.inner.max_attribute_size = max_attribute_size;
        self
    }

    /// Set the max recursion depth
    pub fn max_recursion_depth(mut self, depth: u32) -> Self {
        self.inner.max_recursion_depth = depth;
        self
    }

    /// Set the per-frame rotation of the animated instances, in radians
    pub fn rotation_step(mut self, step: f32) -> Self {
        self.inner.rotation_step = step;
        self
    }

    /// Set the shader library source and its compile target
    pub fn shader_library(mut self, path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        self.inner.shader_path = path.into();
        self.inner.shader_profile = profile.into();
        self
    }

    /// Build the resulting application settings.
    pub fn build(self) -> AppSettings {
        self.inner
    }
}
