//! The wsi module provides the presentation interface and the per-frame dispatch logic.
//! Any presentation system can be used by implementing [`Swapchain`](swapchain::Swapchain).

pub mod frame;
pub mod swapchain;
