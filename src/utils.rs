//! Small numeric helpers.

/// `x` if it is smaller than `y`, otherwise `y`.
///
/// Unlike `f32::min` this is a single comparison: if either argument is NaN, `y` is returned.
/// Works for the `u16` lanes of quantized bounds as well as for floats.
#[inline(always)]
pub fn fast_min<T: Copy + PartialOrd>(x: T, y: T) -> T {
    if x < y {
        x
    } else {
        y
    }
}

/// `x` if it is larger than `y`, otherwise `y`. See [`fast_min`].
#[inline(always)]
pub fn fast_max<T: Copy + PartialOrd>(x: T, y: T) -> T {
    if x > y {
        x
    } else {
        y
    }
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use crate::utils::{align_up, fast_max, fast_min};
    use crate::Real;

    #[test]
    fn test_fast_min_max() {
        assert_eq!(fast_min(1.0, 2.0), 1.0);
        assert_eq!(fast_max(1.0, 2.0), 2.0);
        assert_eq!(fast_min(3u16, 2u16), 2);
        assert!(fast_min(Real::NAN, 1.0).is_nan() || fast_min(1.0, Real::NAN).is_nan());
        assert_eq!(fast_max(Real::NAN, 1.0), 1.0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(52, 16), 64);
        assert_eq!(align_up(64, 16), 64);
    }
}
