//! Opaque handles to device objects.
//!
//! Handles are plain non-owning identifiers. The object that created a handle owns the underlying
//! device object and destroys it when dropped.

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw backend handle value
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw backend handle value
            pub const fn as_raw(&self) -> u64 {
                self.0
            }

            /// The null handle
            pub const fn null() -> Self {
                Self(0)
            }

            /// Whether this is the null handle
            pub const fn is_null(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

define_handle!(
    /// A buffer or image allocated through an [`Allocator`](crate::Allocator).
    ResourceHandle
);
define_handle!(
    /// A compiled root signature.
    RootSignatureHandle
);
define_handle!(
    /// A ray tracing pipeline state object.
    PipelineHandle
);
define_handle!(
    /// A monotonic fence.
    FenceHandle
);
define_handle!(
    /// A shader visible descriptor heap.
    DescriptorHeapHandle
);

/// GPU handle to a descriptor inside a shader visible descriptor heap. Written into shader records
/// as a descriptor table root argument.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorHandle {
    /// GPU pointer of the descriptor
    pub ptr: u64,
}

impl DescriptorHandle {
    /// Get the handle `index` descriptors after this one.
    pub fn offset(&self, index: u32, increment: u32) -> Self {
        Self {
            ptr: self.ptr + index as u64 * increment as u64,
        }
    }
}
