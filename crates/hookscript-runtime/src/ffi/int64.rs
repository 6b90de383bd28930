//! 64-bit integer wrappers exposed to scripts
//!
//! Script numbers are doubles, so 64-bit native values travel as `Int64` /
//! `UInt64`. Arithmetic wraps like the native types do; string conversion
//! supports radix 10 and 16 only.

use crate::value::{ScriptError, Value};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not, Shl, Shr};

/// Signed 64-bit integer wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Int64(pub i64);

/// Unsigned 64-bit integer wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UInt64(pub u64);

/// Parse a `[-]<decimal>` or `[-]0x<hex>` literal into sign and magnitude
pub(crate) fn parse_integer_literal(text: &str) -> Option<(bool, u64)> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    Some((negative, magnitude))
}

fn compare_result(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

impl Int64 {
    /// Coerce a script value the way the `Int64` constructor does
    pub fn parse(value: &Value) -> Result<Self, ScriptError> {
        match value {
            Value::Number(n) if n.is_finite() => Ok(Int64(*n as i64)),
            Value::Int64(v) => Ok(*v),
            Value::UInt64(v) => Ok(Int64(v.0 as i64)),
            Value::Pointer(p) => Ok(Int64(p.as_usize() as i64)),
            Value::String(s) => match parse_integer_literal(s) {
                Some((true, magnitude)) => Ok(Int64((magnitude as i64).wrapping_neg())),
                Some((false, magnitude)) => Ok(Int64(magnitude as i64)),
                None => Err(ScriptError::Expected("an integer")),
            },
            _ => Err(ScriptError::Expected("an integer")),
        }
    }

    pub fn wrapping_add(self, rhs: Self) -> Self {
        Int64(self.0.wrapping_add(rhs.0))
    }

    pub fn wrapping_sub(self, rhs: Self) -> Self {
        Int64(self.0.wrapping_sub(rhs.0))
    }

    /// -1, 0 or 1
    pub fn compare(self, other: Self) -> i32 {
        compare_result(self.0.cmp(&other.0))
    }

    pub fn to_number(self) -> f64 {
        self.0 as f64
    }

    pub fn value_of(self) -> f64 {
        self.to_number()
    }

    /// Render in radix 10 (default) or 16
    ///
    /// Negative values in hex render as `-` followed by the magnitude.
    pub fn to_radix_string(self, radix: Option<u32>) -> Result<String, ScriptError> {
        match radix.unwrap_or(10) {
            10 => Ok(self.0.to_string()),
            16 if self.0 < 0 => Ok(format!("-{:x}", self.0.unsigned_abs())),
            16 => Ok(format!("{:x}", self.0)),
            _ => Err(ScriptError::UnsupportedRadix),
        }
    }

    pub fn to_json(self) -> String {
        self.0.to_string()
    }
}

impl UInt64 {
    /// Coerce a script value the way the `UInt64` constructor does
    pub fn parse(value: &Value) -> Result<Self, ScriptError> {
        match value {
            Value::Number(n) if n.is_finite() && *n >= 0.0 => Ok(UInt64(*n as u64)),
            Value::UInt64(v) => Ok(*v),
            Value::Int64(v) => Ok(UInt64(v.0 as u64)),
            Value::Pointer(p) => Ok(UInt64(p.as_usize() as u64)),
            Value::String(s) => match parse_integer_literal(s) {
                Some((false, magnitude)) => Ok(UInt64(magnitude)),
                _ => Err(ScriptError::Expected("an unsigned integer")),
            },
            _ => Err(ScriptError::Expected("an unsigned integer")),
        }
    }

    pub fn wrapping_add(self, rhs: Self) -> Self {
        UInt64(self.0.wrapping_add(rhs.0))
    }

    pub fn wrapping_sub(self, rhs: Self) -> Self {
        UInt64(self.0.wrapping_sub(rhs.0))
    }

    pub fn compare(self, other: Self) -> i32 {
        compare_result(self.0.cmp(&other.0))
    }

    pub fn to_number(self) -> f64 {
        self.0 as f64
    }

    pub fn value_of(self) -> f64 {
        self.to_number()
    }

    pub fn to_radix_string(self, radix: Option<u32>) -> Result<String, ScriptError> {
        match radix.unwrap_or(10) {
            10 => Ok(self.0.to_string()),
            16 => Ok(format!("{:x}", self.0)),
            _ => Err(ScriptError::UnsupportedRadix),
        }
    }

    pub fn to_json(self) -> String {
        self.0.to_string()
    }
}

macro_rules! bit_ops {
    ($ty:ident) => {
        impl BitAnd for $ty {
            type Output = $ty;
            fn bitand(self, rhs: $ty) -> $ty {
                $ty(self.0 & rhs.0)
            }
        }

        impl BitOr for $ty {
            type Output = $ty;
            fn bitor(self, rhs: $ty) -> $ty {
                $ty(self.0 | rhs.0)
            }
        }

        impl BitXor for $ty {
            type Output = $ty;
            fn bitxor(self, rhs: $ty) -> $ty {
                $ty(self.0 ^ rhs.0)
            }
        }

        impl Not for $ty {
            type Output = $ty;
            fn not(self) -> $ty {
                $ty(!self.0)
            }
        }

        impl Shl<u32> for $ty {
            type Output = $ty;
            fn shl(self, bits: u32) -> $ty {
                $ty(self.0.checked_shl(bits).unwrap_or(0))
            }
        }
    };
}

bit_ops!(Int64);
bit_ops!(UInt64);

impl Shr<u32> for Int64 {
    type Output = Int64;
    fn shr(self, bits: u32) -> Int64 {
        // Arithmetic shift; oversized shifts saturate to the sign.
        Int64(self.0.checked_shr(bits).unwrap_or(if self.0 < 0 { -1 } else { 0 }))
    }
}

impl Shr<u32> for UInt64 {
    type Output = UInt64;
    fn shr(self, bits: u32) -> UInt64 {
        UInt64(self.0.checked_shr(bits).unwrap_or(0))
    }
}

impl fmt::Display for Int64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UInt64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
