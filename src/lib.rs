//! Two-level acceleration structures, ray tracing pipeline assembly and shader binding tables.
//!
//! Deimos builds everything a ray traced frame needs on top of a small device interface:
//! bottom and top level acceleration structures, a ray tracing pipeline state assembled from a shader library
//! and its root signatures, and a shader binding table laid out to match the scene. A frame dispatcher then
//! refits the top level structure, dispatches rays and presents the result, one frame at a time.
//!
//! To get started, the easiest way is to simply
//! ```
//! // Import types under a namespace.
//! use deimos::prelude as dm;
//!
//! // Or, if you dont care about using the types under a namespace
//! use deimos::prelude::*;
//! ```
//!
//! # Example
//!
//! The crate ships a [`headless`] backend that runs all device work on the host. It validates every
//! command it executes, which makes it useful for tests and for checking a setup without a GPU.
//! ```
//! use deimos::prelude::*;
//! use deimos::headless::{self, HeadlessCompiler, HeadlessSwapchain};
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = AppBuilder::new()
//!     .name("Deimos demo app")
//!     .extent(64, 64)
//!     .shader_library(concat!(env!("CARGO_MANIFEST_DIR"), "/data/shaders.hlsl"), "lib_6_3")
//!     .build();
//! let mut ctx = headless::context()?;
//! let swapchain = HeadlessSwapchain::new(ctx.allocator_mut(), settings.extent, settings.back_buffer_count)?;
//! let mut renderer = Renderer::load(ctx, swapchain, &HeadlessCompiler::new(), settings)?;
//! renderer.render_frame()?;
//! renderer.shutdown()?;
//! # Ok(())
//! # }
//! ```
//! For further reading, check out the following modules
//! - [`resource::raytracing`] for acceleration structure builds and updates.
//! - [`pipeline`] for pipeline state assembly and the shader binding table.
//! - [`wsi`] for the presentation interface and frame dispatch.
//! - [`core`] for the device interface every backend implements.
//! - [`allocator`] for the allocator interface.
//! - [`headless`] for the host backend.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod prelude;
pub use crate::prelude::*;

pub mod allocator;
pub mod core;
pub mod headless;
pub mod pipeline;
pub mod renderer;
pub mod resource;
pub mod scene;
pub mod sync;
pub mod util;
pub mod wsi;
