//! A backend that runs everything on the host.
//!
//! The headless backend implements every external interface: [`HeadlessDevice`] records and validates commands,
//! [`HeadlessAllocator`] backs resources with host memory, [`HeadlessCompiler`] checks shader source and
//! [`HeadlessSwapchain`] rotates through plain images. No rays are traced, but the full load and frame sequence
//! runs and can be inspected.
//!
//! # Example
//! ```
//! use deimos::headless;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = headless::context()?;
//! assert!(ctx.capabilities().supported());
//! # Ok(())
//! # }
//! ```

use anyhow::Result;

pub use allocator::*;
pub use compiler::*;
pub use device::*;
pub use swapchain::*;

use crate::core::context::GraphicsContext;

pub mod allocator;
pub mod compiler;
pub mod device;
pub mod swapchain;

/// Create a context on a new headless device, with an allocator that shares the device's resources.
pub fn context() -> Result<GraphicsContext<HeadlessDevice, HeadlessAllocator>> {
    let device = HeadlessDevice::new();
    let allocator = device.allocator();
    GraphicsContext::new(device, allocator)
}
