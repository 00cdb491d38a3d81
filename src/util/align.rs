//! Utilities for aligning memory

use std::ops::{Add, Rem, Sub};

/// Align a size up to a required alignment. Values that are already aligned are returned unchanged.
/// Does not align the base address. `alignment` must be non-zero.
pub fn align<T>(value: T, alignment: T) -> T
where
    T: Add<T, Output = T> + Sub<T, Output = T> + Rem<T, Output = T> + Copy + Default + PartialEq, {
    debug_assert!(alignment != T::default(), "alignment must be non-zero");
    let unaligned_size = value % alignment;
    if unaligned_size == T::default() {
        value
    } else {
        value + (alignment - unaligned_size)
    }
}

/// Returns true if `value` is a multiple of `alignment`.
pub fn is_aligned<T>(value: T, alignment: T) -> bool
where
    T: Rem<T, Output = T> + Copy + Default + PartialEq, {
    value % alignment == T::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up() {
        assert_eq!(align(40u64, 32), 64);
        assert_eq!(align(33u32, 32), 64);
        assert_eq!(align(1u64, 8), 8);
    }

    #[test]
    fn align_keeps_aligned_values() {
        assert_eq!(align(64u64, 32), 64);
        assert_eq!(align(0u64, 32), 0);
        assert_eq!(align(32u32, 32), 32);
    }

    #[test]
    fn aligned_check() {
        assert!(is_aligned(32u64, 8));
        assert!(!is_aligned(36u64, 8));
    }
}
