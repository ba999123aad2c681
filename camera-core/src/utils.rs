use cfg_if::cfg_if;
use num_traits::PrimInt;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Row alignment of encoder-side planes.
        pub const DEFAULT_ALIGNMENT: usize = 32;
    } else {
        pub const DEFAULT_ALIGNMENT: usize = 16;
    }
}

/// Rounds `value` up to a multiple of `alignment`, which must be a power of two.
pub fn align_to<T: PrimInt>(value: T, alignment: T) -> T {
    debug_assert_eq!(alignment.count_ones(), 1);
    let mask = alignment - T::one();
    (value + mask) & !mask
}

/// Subsampled extent: `value >> shift`, rounded up so odd sizes keep their
/// last chroma row or column.
pub fn ceil_rshift<T: PrimInt>(value: T, shift: usize) -> T {
    (value + (T::one() << shift) - T::one()) >> shift
}

#[inline]
pub(crate) fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
