//! The allocator module exposes the interface used to create GPU memory resources.
//! <br>
//! <br>
//! # Allocator traits
//! These are defined in [`traits`], and can be implemented to supply a custom allocator type to all deimos functions.
//! The [`headless`](crate::headless) module implements them on host memory.
//! # Memory types
//! [`memory_type::MemoryType`] describes where an allocation should live.

pub mod memory_type;
pub mod traits;
