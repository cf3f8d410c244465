//! # Numeric Decoder
//!
//! PostgreSQL `numeric` stores a sequence of base-10000 digits plus a weight
//! (position of the first digit), a sign and a display scale. Two header
//! layouts exist on disk:
//!
//! ```text
//! Short (header bit 15 set):
//!   [header: u16][digit: u16 x n]
//!     bit 13   sign
//!     bit 6    weight sign (set => weight = -(bits 0-5) - 1)
//!     bits 0-5 weight magnitude
//!
//! Long:
//!   [ndigits: u16][weight: i16][sign: u16][dscale: u16][digit: u16 x ndigits]
//!     sign == 0x4000 => negative
//! ```
//!
//! Values are decoded to `f64`, which is exact for the catalog and row data
//! this tool surfaces and within one base-10000 ulp otherwise.

use crate::binary::{i16_at, u16_at};
use crate::types::Value;

const NUMERIC_SHORT: u16 = 0x8000;
const NUMERIC_SHORT_SIGN: u16 = 0x2000;
const NUMERIC_SHORT_WEIGHT_SIGN: u16 = 0x0040;
const NUMERIC_SHORT_WEIGHT_MASK: u16 = 0x003F;
const NUMERIC_NEG: u16 = 0x4000;
const NBASE: f64 = 10000.0;

/// Decodes a `numeric` payload (varlena header already stripped).
pub fn decode_numeric(raw: &[u8]) -> Value {
    if raw.len() < 2 {
        return Value::Null;
    }
    let header = u16_at(raw, 0);
    if header & NUMERIC_SHORT != 0 {
        decode_short(raw, header)
    } else {
        decode_long(raw)
    }
}

fn decode_short(raw: &[u8], header: u16) -> Value {
    let sign = if header & NUMERIC_SHORT_SIGN != 0 { -1.0 } else { 1.0 };
    let mut weight = i32::from(header & NUMERIC_SHORT_WEIGHT_MASK);
    if header & NUMERIC_SHORT_WEIGHT_SIGN != 0 {
        weight = -weight - 1;
    }

    let ndigits = (raw.len() - 2) / 2;
    if ndigits == 0 {
        return Value::Float(0.0);
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| u16_at(raw, 2 + i * 2)).collect();
    Value::Float(compose(&digits, weight, sign))
}

fn decode_long(raw: &[u8]) -> Value {
    if raw.len() < 8 {
        return Value::Null;
    }
    let ndigits = u16_at(raw, 0) as usize;
    let weight = i32::from(i16_at(raw, 2));
    let sign = if u16_at(raw, 4) == NUMERIC_NEG { -1.0 } else { 1.0 };
    if ndigits == 0 {
        return Value::Float(0.0);
    }
    if raw.len() < 8 + ndigits * 2 {
        return Value::Null;
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| u16_at(raw, 8 + i * 2)).collect();
    Value::Float(compose(&digits, weight, sign))
}

fn compose(digits: &[u16], weight: i32, sign: f64) -> f64 {
    let mut result = 0.0;
    for &d in digits {
        result = result * NBASE + f64::from(d);
    }
    let exp = weight - digits.len() as i32 + 1;
    if exp >= 0 {
        result *= NBASE.powi(exp);
    } else {
        result /= NBASE.powi(-exp);
    }
    sign * result
}
