//! The sync module provides CPU-GPU synchronization.
//!
//! - The [`fence`] module provides a monotonic fence, used to wait for submitted work on the host.
//!
//! GPU-side ordering between acceleration structure builds, updates and ray dispatches is done
//! exclusively with [`ResourceBarrier`](crate::core::device::ResourceBarrier)s recorded into the command list.

pub mod fence;
