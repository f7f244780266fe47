use crate::config::decimal_separator;
use crate::error::{MarshalError, Result};
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint, Sign};

/// Largest precision a 16-byte unscaled magnitude can carry.
pub const MAX_NUMERIC_PRECISION: u8 = 38;
pub const NUMERIC_MAGNITUDE_LEN: usize = 16;

/// `SQL_NUMERIC_STRUCT`: unscaled magnitude little-endian in `val`, `sign` 1 for
/// positive and 0 for negative.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NumericStruct {
    pub precision: u8,
    pub scale: i8,
    pub sign: u8,
    pub val: [u8; NUMERIC_MAGNITUDE_LEN],
}

impl NumericStruct {
    /// Packs a host decimal the way parameters are described to the driver:
    /// precision counts significant digits, scale counts digits after the point.
    pub fn from_decimal(value: &BigDecimal) -> Result<Self> {
        let (unscaled, exponent) = value.as_bigint_and_exponent();
        let (sign, magnitude) = split_sign(&unscaled);
        let digits = digit_count(&magnitude);

        let (precision, scale, magnitude) = if exponent <= 0 {
            // 314E2 -> 31400
            let shift = exponent.unsigned_abs();
            let widened = magnitude * BigUint::from(10u32).pow(shift as u32);
            (digits as u64 + shift, 0u64, widened)
        } else if exponent as u64 <= digits as u64 {
            (digits as u64, exponent as u64, magnitude)
        } else {
            // 0.03140 has more scale than digits
            (exponent as u64, exponent as u64, magnitude)
        };

        if precision > MAX_NUMERIC_PRECISION as u64 {
            return Err(MarshalError::Range(format!(
                "Precision of the numeric value is too high - {}. Should be less than or equal to {}",
                value, MAX_NUMERIC_PRECISION
            )));
        }

        let bytes = magnitude.to_bytes_le();
        if bytes.len() > NUMERIC_MAGNITUDE_LEN {
            return Err(MarshalError::Range(format!(
                "Numeric magnitude of {} does not fit in {} bytes",
                value, NUMERIC_MAGNITUDE_LEN
            )));
        }
        let mut val = [0u8; NUMERIC_MAGNITUDE_LEN];
        val[..bytes.len()].copy_from_slice(&bytes);

        Ok(NumericStruct {
            precision: precision as u8,
            scale: scale as i8,
            sign: if sign == Sign::Minus { 0 } else { 1 },
            val,
        })
    }

    pub fn to_decimal(&self) -> BigDecimal {
        let sign = if self.sign == 0 { Sign::Minus } else { Sign::Plus };
        let unscaled = BigInt::from_bytes_le(sign, &self.val);
        BigDecimal::new(unscaled, self.scale as i64)
    }

    /// Text form using the process-wide decimal separator.
    pub fn render(&self) -> String {
        render_decimal(&self.to_decimal())
    }
}

fn split_sign(value: &BigInt) -> (Sign, BigUint) {
    let (sign, bytes) = value.to_bytes_le();
    (sign, BigUint::from_bytes_le(&bytes))
}

fn digit_count(magnitude: &BigUint) -> usize {
    magnitude.to_str_radix(10).len()
}

/// Positional (never scientific) rendering of `value` with the current separator.
pub fn render_decimal(value: &BigDecimal) -> String {
    render_with_separator(value, decimal_separator())
}

pub fn render_with_separator(value: &BigDecimal, separator: char) -> String {
    let (unscaled, scale) = value.as_bigint_and_exponent();
    let (sign, magnitude) = split_sign(&unscaled);
    let mut digits = magnitude.to_str_radix(10);

    let mut out = String::with_capacity(digits.len() + 3);
    if sign == Sign::Minus {
        out.push('-');
    }

    if scale <= 0 {
        out.push_str(&digits);
        if magnitude != BigUint::from(0u32) {
            out.extend(std::iter::repeat('0').take(scale.unsigned_abs() as usize));
        }
        return out;
    }

    let scale = scale as usize;
    if digits.len() <= scale {
        let pad = scale + 1 - digits.len();
        digits.insert_str(0, &"0".repeat(pad));
    }
    let split = digits.len() - scale;
    out.push_str(&digits[..split]);
    out.push(separator);
    out.push_str(&digits[split..]);
    out
}
