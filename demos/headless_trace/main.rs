use anyhow::Result;

use deimos::headless::{self, HeadlessCompiler, HeadlessSwapchain};
use deimos::prelude::*;

const FRAME_COUNT: u32 = 60;

fn main() -> Result<()> {
    pretty_env_logger::init();

    let settings = AppBuilder::new()
        .name("Deimos headless trace")
        .extent(1280, 720)
        .back_buffers(3)
        .shader_library(concat!(env!("CARGO_MANIFEST_DIR"), "/data/shaders.hlsl"), "lib_6_3")
        .build();

    // The headless device validates every command list it executes.
    let mut ctx = headless::context()?;
    let swapchain = HeadlessSwapchain::new(ctx.allocator_mut(), settings.extent, settings.back_buffer_count)?;
    let mut renderer = Renderer::load(ctx, swapchain, &HeadlessCompiler::new(), settings)?;

    let sbt = renderer.sbt().layout();
    log::info!(
        "Shader table: {} records, stride {}, regions at {}/{}/{}",
        sbt.record_count(),
        sbt.stride,
        sbt.ray_generation.offset,
        sbt.miss.offset,
        sbt.hit_group.offset
    );

    for _ in 0..FRAME_COUNT {
        let value = renderer.render_frame()?;
        log::trace!("Frame done at fence value {value}");
    }
    log::info!(
        "Rendered {} frames, {} top level updates, rotation {:.3}",
        renderer.frame_count(),
        renderer.tlas().update_count(),
        renderer.scene().rotation()
    );
    renderer.shutdown()
}
