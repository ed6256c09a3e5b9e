//! Fixed-point arithmetic used by the wire format and the software rasteriser.
//!
//! Wire coordinates are 8.8, the rasteriser works in 16.16. Multiplication
//! widens to 64 bits before shifting back so intermediate products never lose
//! the high half.

pub type Fixed16 = i32;

pub const FIXED16_BASE: i32 = 16;
pub const FIXED16_ONE: Fixed16 = 1 << FIXED16_BASE;
pub const FIXED16_HALF: Fixed16 = 1 << (FIXED16_BASE - 1);

#[inline]
pub fn fixed_one(base: i32) -> i32 {
    1 << base
}

#[inline]
pub fn fixed_mul(x: i32, y: i32, base: i32) -> i32 {
    ((x as i64 * y as i64) >> base) as i32
}

#[inline]
pub fn fixed_div(x: i32, y: i32, base: i32) -> i32 {
    debug_assert!(y != 0);
    (((x as i64) << base) / y as i64) as i32
}

#[inline]
pub fn fixed_invert(x: i32, base: i32) -> i32 {
    debug_assert!(x != 0);
    ((1i64 << (2 * base as i64)) / x as i64) as i32
}

#[inline]
pub fn fixed_round_to_int(x: i32, base: i32) -> i32 {
    (x + (1 << (base - 1))) >> base
}

#[inline]
pub fn fixed16_mul(x: Fixed16, y: Fixed16) -> Fixed16 {
    fixed_mul(x, y, FIXED16_BASE)
}

#[inline]
pub fn fixed16_square(x: Fixed16) -> Fixed16 {
    fixed_mul(x, x, FIXED16_BASE)
}

#[inline]
pub fn fixed16_div(x: Fixed16, y: Fixed16) -> Fixed16 {
    fixed_div(x, y, FIXED16_BASE)
}

#[inline]
pub fn fixed16_invert(x: Fixed16) -> Fixed16 {
    fixed_invert(x, FIXED16_BASE)
}

#[inline]
pub fn fixed16_round_to_int(x: Fixed16) -> i32 {
    fixed_round_to_int(x, FIXED16_BASE)
}

/// Product of two 16.16 values taken straight to integer (shifts out both
/// fractional parts).
#[inline]
pub fn fixed16_mul_result_to_int(x: Fixed16, y: Fixed16) -> i32 {
    ((x as i64 * y as i64) >> (2 * FIXED16_BASE as i64)) as i32
}

#[inline]
pub fn fixed16_from_float(x: f32) -> Fixed16 {
    (x * FIXED16_ONE as f32) as Fixed16
}

#[inline]
pub fn fixed16_to_float(x: Fixed16) -> f32 {
    x as f32 / FIXED16_ONE as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_uses_wide_intermediate() {
        // The raw product of these overflows 32 bits; the widened
        // intermediate keeps the result exact.
        let x = 100 * FIXED16_ONE;
        let y = 150 * FIXED16_ONE;
        assert_eq!(fixed16_mul(x, y), 15_000 * FIXED16_ONE);
    }

    #[test]
    fn div_and_invert_agree() {
        let x = fixed16_from_float(2.5);
        let inv = fixed16_invert(x);
        let div = fixed16_div(FIXED16_ONE, x);
        assert_eq!(inv, div);
        assert!((fixed16_to_float(inv) - 0.4).abs() < 1e-4);
    }

    #[test]
    fn round_to_int_rounds_half_up() {
        assert_eq!(fixed16_round_to_int(fixed16_from_float(1.4)), 1);
        assert_eq!(fixed16_round_to_int(fixed16_from_float(1.5)), 2);
        assert_eq!(fixed16_round_to_int(fixed16_from_float(-0.4)), 0);
    }

    #[test]
    fn mul_result_to_int_drops_both_fractions() {
        let a = fixed16_from_float(3.0);
        let b = fixed16_from_float(4.0);
        assert_eq!(fixed16_mul_result_to_int(a, b), 12);
    }

    #[test]
    fn parametric_base_eight() {
        // 8.8 as used on the wire.
        let one = fixed_one(8);
        assert_eq!(fixed_mul(3 * one, 2 * one, 8), 6 * one);
        assert_eq!(fixed_round_to_int(one + one / 2, 8), 2);
    }
}
