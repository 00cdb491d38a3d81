#![allow(dead_code)]

use anyhow::Result;

use deimos::headless::{self, HeadlessAllocator, HeadlessCompiler, HeadlessDevice, HeadlessSwapchain};
use deimos::{AppBuilder, AppSettings, GraphicsContext, Renderer};

pub type Context = GraphicsContext<HeadlessDevice, HeadlessAllocator>;
pub type TestRenderer = Renderer<HeadlessDevice, HeadlessAllocator, HeadlessSwapchain>;

/// Creates a headless deimos context ready for automated tests
pub fn make_context() -> Result<Context> {
    let _ = pretty_env_logger::try_init();
    headless::context()
}

/// Settings for a small output, using the shader library shipped with the crate
pub fn settings() -> AppSettings {
    AppBuilder::new()
        .name("deimos test framework")
        .extent(32, 16)
        .back_buffers(2)
        .shader_library(concat!(env!("CARGO_MANIFEST_DIR"), "/data/shaders.hlsl"), "lib_6_3")
        .build()
}

/// Loads the demo scene on a fresh headless context
pub fn make_renderer() -> Result<TestRenderer> {
    make_renderer_with_settings(settings())
}

pub fn make_renderer_with_settings(settings: AppSettings) -> Result<TestRenderer> {
    let mut ctx = make_context()?;
    let swapchain = HeadlessSwapchain::new(ctx.allocator_mut(), settings.extent, settings.back_buffer_count)?;
    Renderer::load(ctx, swapchain, &HeadlessCompiler::new(), settings)
}
