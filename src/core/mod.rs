//! The core module holds all functionality that is minimally required to set up a ray tracing context.

pub mod app_info;
pub mod context;
pub mod device;
pub mod error;
pub mod handle;
