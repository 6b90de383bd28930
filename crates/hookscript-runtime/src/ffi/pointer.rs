//! Native pointer wrapper exposed to scripts

use crate::ffi::int64::parse_integer_literal;
use crate::value::{ScriptError, Value};
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Not, Shl, Shr, Sub};

/// A raw machine address
///
/// Arithmetic wraps at pointer width. Pointer-authentication operations are
/// accepted everywhere but only validate their key here, leaving the address
/// untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativePointer(usize);

/// Keys accepted by `sign` and `strip`
const PTRAUTH_KEYS: [&str; 4] = ["ia", "ib", "da", "db"];

impl NativePointer {
    pub const NULL: NativePointer = NativePointer(0);

    pub const fn new(address: usize) -> Self {
        NativePointer(address)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        NativePointer(ptr as usize)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Coerce a script value the way the `NativePointer` constructor does
    ///
    /// Accepts anything pointer-like, numbers, `0x` hex or decimal strings and
    /// 64-bit wrappers.
    pub fn parse(value: &Value) -> Result<Self, ScriptError> {
        if let Some(ptr) = value.as_native_pointer() {
            return Ok(ptr);
        }
        match value {
            Value::Number(n) if n.is_finite() => Ok(NativePointer(*n as i64 as usize)),
            Value::Int64(v) => Ok(NativePointer(v.0 as usize)),
            Value::UInt64(v) => Ok(NativePointer(v.0 as usize)),
            Value::String(s) => match parse_integer_literal(s) {
                Some((negative, magnitude)) => {
                    let address = magnitude as usize;
                    Ok(NativePointer(if negative {
                        address.wrapping_neg()
                    } else {
                        address
                    }))
                }
                None => Err(ScriptError::Expected("a pointer")),
            },
            _ => Err(ScriptError::Expected("a pointer")),
        }
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Sign with a pointer-authentication key
    pub fn sign(self, key: Option<&str>, _data: Option<NativePointer>) -> Result<Self, ScriptError> {
        validate_key(key)?;
        Ok(self)
    }

    /// Strip a pointer-authentication code
    pub fn strip(self, key: Option<&str>) -> Result<Self, ScriptError> {
        validate_key(key)?;
        Ok(self)
    }

    /// Blend a small integer discriminator into the address
    pub fn blend(self, _small_integer: u16) -> Self {
        self
    }

    /// -1, 0 or 1
    pub fn compare(self, other: Self) -> i32 {
        match self.0.cmp(&other.0) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }
    }

    pub fn to_int32(self) -> i32 {
        self.0 as i32
    }

    pub fn to_uint32(self) -> u32 {
        self.0 as u32
    }

    /// Default rendering is `0x`-prefixed hex; an explicit radix 16 drops the prefix
    pub fn to_radix_string(self, radix: Option<u32>) -> Result<String, ScriptError> {
        match radix {
            None => Ok(format!("{:#x}", self.0)),
            Some(16) => Ok(format!("{:x}", self.0)),
            Some(10) => Ok(self.0.to_string()),
            Some(_) => Err(ScriptError::UnsupportedRadix),
        }
    }

    pub fn to_json(self) -> String {
        format!("{:#x}", self.0)
    }

    /// The address bytes in memory order, as a byte-pattern string
    ///
    /// `0x1234` on a little-endian 64-bit target renders as
    /// `34 12 00 00 00 00 00 00`.
    pub fn to_match_pattern(self) -> String {
        self.0
            .to_ne_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn validate_key(key: Option<&str>) -> Result<(), ScriptError> {
    match key {
        None => Ok(()),
        Some(k) if PTRAUTH_KEYS.contains(&k) => Ok(()),
        Some(_) => Err(ScriptError::InvalidKey),
    }
}

impl Add for NativePointer {
    type Output = NativePointer;
    fn add(self, rhs: NativePointer) -> NativePointer {
        NativePointer(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for NativePointer {
    type Output = NativePointer;
    fn sub(self, rhs: NativePointer) -> NativePointer {
        NativePointer(self.0.wrapping_sub(rhs.0))
    }
}

impl BitAnd for NativePointer {
    type Output = NativePointer;
    fn bitand(self, rhs: NativePointer) -> NativePointer {
        NativePointer(self.0 & rhs.0)
    }
}

impl BitOr for NativePointer {
    type Output = NativePointer;
    fn bitor(self, rhs: NativePointer) -> NativePointer {
        NativePointer(self.0 | rhs.0)
    }
}

impl BitXor for NativePointer {
    type Output = NativePointer;
    fn bitxor(self, rhs: NativePointer) -> NativePointer {
        NativePointer(self.0 ^ rhs.0)
    }
}

impl Not for NativePointer {
    type Output = NativePointer;
    fn not(self) -> NativePointer {
        NativePointer(!self.0)
    }
}

impl Shr<u32> for NativePointer {
    type Output = NativePointer;
    fn shr(self, bits: u32) -> NativePointer {
        NativePointer(self.0.checked_shr(bits).unwrap_or(0))
    }
}

impl Shl<u32> for NativePointer {
    type Output = NativePointer;
    fn shl(self, bits: u32) -> NativePointer {
        NativePointer(self.0.checked_shl(bits).unwrap_or(0))
    }
}

impl fmt::Display for NativePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for NativePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePointer({:#x})", self.0)
    }
}

impl From<usize> for NativePointer {
    fn from(address: usize) -> Self {
        NativePointer(address)
    }
}
