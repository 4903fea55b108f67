//! Math utilites.

use glam::UVec2;
use num_traits::PrimInt;

/// Performs integer division between a and b rounding up, instead of down
pub fn round_up_div<T: PrimInt>(a: T, b: T) -> T {
    (a + (b - T::one())) / b
}

/// Index of the highest set bit. `value` must be non zero.
pub fn highest_bit<T: PrimInt>(value: T) -> u32 {
    debug_assert!(value != T::zero());
    (T::zero().count_zeros() - 1) - value.leading_zeros()
}

/// Component wise [`u32::next_power_of_two`].
pub fn next_power_of_two(value: UVec2) -> UVec2 {
    UVec2::new(value.x.next_power_of_two(), value.y.next_power_of_two())
}

/// Component wise [`round_up_div`].
pub fn round_up_div_uvec2(a: UVec2, b: UVec2) -> UVec2 {
    UVec2::new(round_up_div(a.x, b.x), round_up_div(a.y, b.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_up_div(13_u32, 4), 4);
        assert_eq!(round_up_div(12_u32, 4), 3);
    }

    #[test]
    fn highest_bits() {
        assert_eq!(highest_bit(1_u32), 0);
        assert_eq!(highest_bit(13_u32), 3);
        assert_eq!(highest_bit(u32::MAX), 31);
        assert_eq!(highest_bit(1_u64 << 40), 40);
    }

    #[test]
    fn pow2_vectors() {
        assert_eq!(next_power_of_two(UVec2::new(640, 360)), UVec2::new(1024, 512));
        assert_eq!(next_power_of_two(UVec2::new(1, 32)), UVec2::new(1, 32));
        assert_eq!(round_up_div_uvec2(UVec2::new(65, 64), UVec2::splat(64)), UVec2::new(2, 1));
    }
}
