//! Exposes all relevant abstractions for raytracing resources

pub use acceleration_structure::*;
pub use as_type::*;
pub use build_info::*;
pub use build_size::*;
pub use geometry::*;

pub mod acceleration_structure;
pub mod as_type;
pub mod build_info;
pub mod build_size;
pub mod geometry;
