// src/normalization.rs
//
// Decimal normalization utilities for converting raw token amounts (base units)
// into human-scale floating point values used by pricing and TVL math.

use ethers::types::U256;

/// Helper: 10^n as f64. Token decimals are bounded by uint8 on-chain, and every
/// value we normalize against fits comfortably in f64 exponent range.
#[inline]
pub fn pow10_f64(n: u8) -> f64 {
    10f64.powi(n as i32)
}

/// U256 -> f64 conversion via decimal string. U256 renders as plain digits, so
/// the parse cannot fail; precision loss beyond 2^53 is acceptable for
/// valuation purposes (raw amounts cross the store boundary as strings, never
/// as floats).
#[inline]
pub fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

/// Normalize a raw base-unit amount at the given token decimals.
///
/// Example: 1000 * 10^6 raw units of a 6-decimals token -> 1000.0
#[inline]
pub fn to_float(amount: U256, decimals: u8) -> f64 {
    if amount.is_zero() {
        return 0.0;
    }
    u256_to_f64(amount) / pow10_f64(decimals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_float_six_decimals() {
        let raw = U256::from(1000u64) * U256::exp10(6);
        assert_eq!(to_float(raw, 6), 1000.0);
    }

    #[test]
    fn test_to_float_eighteen_decimals() {
        let raw = U256::from(500u64) * U256::exp10(18);
        assert_eq!(to_float(raw, 18), 500.0);
    }

    #[test]
    fn test_to_float_zero() {
        assert_eq!(to_float(U256::zero(), 18), 0.0);
    }

    #[test]
    fn test_u256_to_f64_max_does_not_panic() {
        let v = u256_to_f64(U256::MAX);
        assert!(v.is_finite());
    }
}
