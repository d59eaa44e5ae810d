//! Fixed-point math for the CDP core.
//!
//! All amounts are `U256` with 18 decimals. Every operation truncates toward
//! zero so the protocol never credits a user more than it holds:
//! - `mul(a, b)     = a * b / 1e18`
//! - `div(a, b)     = a * 1e18 / b`
//! - `mul_div(a, b, c) = a * b / c` with a 512-bit intermediate

use odra::casper_types::{U256, U512};
use crate::errors::{CdpError, CdpResult};

/// Internal precision scale (1e18)
pub const DECIMAL_PRECISION: u64 = 1_000_000_000_000_000_000;

/// Precision of nominal collateral ratios (1e20)
pub const NICR_PRECISION: u128 = 100_000_000_000_000_000_000;

/// Basis points scale (100% = 10000 bps)
pub const BPS_SCALE: u64 = 10_000;

/// `1e18` as `U256`
pub fn precision() -> U256 {
    U256::from(DECIMAL_PRECISION)
}

/// Whole token units to an 18-decimal amount
pub fn to_fixed(units: u64) -> U256 {
    U256::from(units) * precision()
}

/// Fixed-point product, rounded down
pub fn mul(a: U256, b: U256) -> CdpResult<U256> {
    mul_div(a, b, precision())
}

/// Fixed-point quotient, rounded down
pub fn div(a: U256, b: U256) -> CdpResult<U256> {
    mul_div(a, precision(), b)
}

/// `a * b / c` without intermediate overflow, rounded down
pub fn mul_div(a: U256, b: U256, c: U256) -> CdpResult<U256> {
    if c.is_zero() {
        return Err(CdpError::DivisionByZero);
    }
    let wide = u256_to_u512(a) * u256_to_u512(b) / u256_to_u512(c);
    u512_to_u256(wide)
}

/// `a * b / c` rounded up; used where rounding must favour the protocol
pub fn mul_div_up(a: U256, b: U256, c: U256) -> CdpResult<U256> {
    if c.is_zero() {
        return Err(CdpError::DivisionByZero);
    }
    let c_wide = u256_to_u512(c);
    let product = u256_to_u512(a) * u256_to_u512(b);
    let quotient = product / c_wide;
    let rounded = if (product % c_wide).is_zero() {
        quotient
    } else {
        quotient + U512::one()
    };
    u512_to_u256(rounded)
}

pub fn checked_add(a: U256, b: U256) -> CdpResult<U256> {
    a.checked_add(b).ok_or(CdpError::Overflow)
}

pub fn checked_sub(a: U256, b: U256) -> CdpResult<U256> {
    a.checked_sub(b).ok_or(CdpError::Underflow)
}

pub fn min(a: U256, b: U256) -> U256 {
    if a < b {
        a
    } else {
        b
    }
}

pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

/// Nominal collateral ratio (collateral units per debt unit, 1e20 scale).
///
/// Price-independent, so it is usable as a ranking key. A trove with no
/// debt ranks as `U256::MAX`.
pub fn compute_nominal_cr(coll: U256, debt: U256) -> CdpResult<U256> {
    if debt.is_zero() {
        return Ok(U256::max_value());
    }
    mul_div(coll, U256::from(NICR_PRECISION), debt)
}

/// Collateral ratio at `price` (1e18 scale, 1.1e18 = 110%)
pub fn compute_cr(coll: U256, debt: U256, price: U256) -> CdpResult<U256> {
    if debt.is_zero() {
        return Ok(U256::max_value());
    }
    mul_div(coll, price, debt)
}

/// `base^exponent` for an 18-decimal `base`, by repeated squaring
pub fn dec_pow(base: U256, exponent: u64) -> CdpResult<U256> {
    if exponent == 0 {
        return Ok(precision());
    }
    let mut x = base;
    let mut y = precision();
    let mut n = exponent;
    while n > 1 {
        if n % 2 == 1 {
            y = mul(x, y)?;
        }
        x = mul(x, x)?;
        n /= 2;
    }
    mul(x, y)
}

/// Convert basis points to an 18-decimal fraction
pub fn bps_to_fraction(bps: u32) -> U256 {
    U256::from(bps) * precision() / U256::from(BPS_SCALE)
}

/// `amount * bps / 10000`, rounded down
pub fn apply_bps(amount: U256, bps: u32) -> CdpResult<U256> {
    mul_div(amount, U256::from(bps), U256::from(BPS_SCALE))
}

/// Convert U256 to U512
pub fn u256_to_u512(value: U256) -> U512 {
    let mut bytes = [0u8; 32];
    value.to_little_endian(&mut bytes);
    U512::from_little_endian(&bytes)
}

/// Convert U512 back to U256, failing if the high half is set
pub fn u512_to_u256(value: U512) -> CdpResult<U256> {
    let mut bytes = [0u8; 64];
    value.to_little_endian(&mut bytes);
    if bytes[32..].iter().any(|b| *b != 0) {
        return Err(CdpError::Overflow);
    }
    Ok(U256::from_little_endian(&bytes[..32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mul_rounds_down() {
        // 1.5 * 1.5 = 2.25
        let a = precision() * U256::from(3u64) / U256::from(2u64);
        assert_eq!(mul(a, a).unwrap(), precision() * U256::from(225u64) / U256::from(100u64));

        // 1 wei * 0.5 = 0.5 wei -> 0
        let half = precision() / U256::from(2u64);
        assert_eq!(mul(U256::one(), half).unwrap(), U256::zero());
    }

    #[test]
    fn test_div_rounds_down() {
        // 1 / 3 = 0.333...333
        let third = div(precision(), to_fixed(3)).unwrap();
        assert_eq!(third, U256::from(333_333_333_333_333_333u64));
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(div(precision(), U256::zero()), Err(CdpError::DivisionByZero));
        assert_eq!(
            mul_div(U256::one(), U256::one(), U256::zero()),
            Err(CdpError::DivisionByZero)
        );
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // MAX * 2 / 4 overflows in 256 bits but not in 512
        let max = U256::max_value();
        let result = mul_div(max, U256::from(2u64), U256::from(4u64)).unwrap();
        assert_eq!(result, max / U256::from(2u64));
    }

    #[test]
    fn test_mul_div_overflow() {
        let max = U256::max_value();
        assert_eq!(mul_div(max, max, U256::one()), Err(CdpError::Overflow));
    }

    #[test]
    fn test_mul_div_up() {
        assert_eq!(mul_div_up(U256::from(10u64), U256::one(), U256::from(3u64)).unwrap(), U256::from(4u64));
        assert_eq!(mul_div_up(U256::from(9u64), U256::one(), U256::from(3u64)).unwrap(), U256::from(3u64));
    }

    #[test]
    fn test_nominal_cr() {
        // 10 coll / 1000 debt = 0.01 * 1e20 = 1e18
        let nicr = compute_nominal_cr(to_fixed(10), to_fixed(1000)).unwrap();
        assert_eq!(nicr, precision());
        assert_eq!(compute_nominal_cr(to_fixed(1), U256::zero()).unwrap(), U256::max_value());
    }

    #[test]
    fn test_collateral_ratio() {
        // 10 coll at $200 against 1000 debt = 200%
        let cr = compute_cr(to_fixed(10), to_fixed(1000), to_fixed(200)).unwrap();
        assert_eq!(cr, to_fixed(2));
    }

    #[test]
    fn test_bps_helpers() {
        // 5% = 500 bps = 0.05 * 1e18
        assert_eq!(bps_to_fraction(500), U256::from(50_000_000_000_000_000u64));
        assert_eq!(apply_bps(to_fixed(1000), 50).unwrap(), to_fixed(5));
    }

    #[test]
    fn test_dec_pow() {
        let half = precision() / U256::from(2u64);
        assert_eq!(dec_pow(half, 0).unwrap(), precision());
        assert_eq!(dec_pow(half, 1).unwrap(), half);
        assert_eq!(dec_pow(half, 3).unwrap(), precision() / U256::from(8u64));
        assert_eq!(dec_pow(precision(), 1_000_000).unwrap(), precision());
    }

    #[test]
    fn test_checked_sub_underflow() {
        assert_eq!(checked_sub(U256::one(), U256::from(2u64)), Err(CdpError::Underflow));
    }

    #[test]
    fn test_u512_round_trip_overflow() {
        let wide = u256_to_u512(U256::max_value()) + U512::one();
        assert_eq!(u512_to_u256(wide), Err(CdpError::Overflow));
    }
}
