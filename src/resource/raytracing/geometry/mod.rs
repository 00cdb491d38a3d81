//! Exposes the acceleration structure geometry types

pub use instances::*;
pub use triangles::*;

pub mod instances;
pub mod triangles;
