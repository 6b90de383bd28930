//! Value marshaling: script values ↔ native memory
//!
//! Type-directed conversions in both directions:
//! - `write_value()` / `read_value()`: argument slots and struct fields
//! - `write_return()` / `read_return()`: return slots, where integers
//!   narrower than a machine word occupy a full `ffi_arg`
//!
//! # Conversion rules
//!
//! - Integers accept numbers and 64-bit wrappers; unsigned kinds reject
//!   negative numbers. 64-bit integers read back as `Int64` / `UInt64`,
//!   narrower ones as numbers.
//! - Floats accept numbers only.
//! - Pointers accept anything pointer-like plus byte buffers (their base).
//! - Structs accept an array with exactly one entry per field and read
//!   back as an array.

use crate::ffi::int64::{Int64, UInt64};
use crate::ffi::pointer::NativePointer;
use crate::ffi::types::{PrimitiveKind, TypeArena, TypeId, TypeNode};
use crate::value::{ScriptError, Value};
use libffi::raw::{ffi_arg, ffi_sarg};
use std::mem::size_of;

fn to_signed(value: &Value) -> Result<i64, ScriptError> {
    match value {
        Value::Number(n) if n.is_finite() => Ok(*n as i64),
        Value::Int64(v) => Ok(v.0),
        Value::UInt64(v) => Ok(v.0 as i64),
        _ => Err(ScriptError::Expected("an integer")),
    }
}

fn to_unsigned(value: &Value) -> Result<u64, ScriptError> {
    match value {
        Value::Number(n) if n.is_finite() && *n >= 0.0 => Ok(*n as u64),
        Value::UInt64(v) => Ok(v.0),
        Value::Int64(v) => Ok(v.0 as u64),
        _ => Err(ScriptError::Expected("an unsigned integer")),
    }
}

fn to_float(value: &Value) -> Result<f64, ScriptError> {
    value.as_number().ok_or(ScriptError::Expected("a number"))
}

fn to_pointer(value: &Value) -> Result<NativePointer, ScriptError> {
    match value {
        Value::Bytes(buffer) => Ok(buffer.as_ptr()),
        other => other
            .as_native_pointer()
            .ok_or(ScriptError::Expected("a pointer")),
    }
}

/// Store `value` as native type `ty` at `dest`
///
/// # Safety
///
/// `dest` must be valid for writes of `arena.size_of(ty)` bytes.
pub unsafe fn write_value(
    arena: &TypeArena,
    ty: TypeId,
    value: &Value,
    dest: *mut u8,
) -> Result<(), ScriptError> {
    match arena.node(ty) {
        TypeNode::Primitive(kind) => write_primitive(*kind, value, dest),
        TypeNode::Struct(layout) => {
            let fields = match value {
                Value::Array(items) if items.len() == layout.fields.len() => items,
                _ => return Err(ScriptError::ExpectedFields(layout.fields.len())),
            };
            for ((&field, &offset), item) in layout
                .fields
                .iter()
                .zip(&layout.offsets)
                .zip(fields.as_slice())
            {
                write_value(arena, field, item, dest.add(offset))?;
            }
            Ok(())
        }
    }
}

unsafe fn write_primitive(kind: PrimitiveKind, value: &Value, dest: *mut u8) -> Result<(), ScriptError> {
    match kind {
        PrimitiveKind::Void => {}
        PrimitiveKind::Pointer => {
            (dest as *mut usize).write_unaligned(to_pointer(value)?.as_usize());
        }
        PrimitiveKind::SInt8 => (dest as *mut i8).write_unaligned(to_signed(value)? as i8),
        PrimitiveKind::UInt8 => (dest as *mut u8).write_unaligned(to_unsigned(value)? as u8),
        PrimitiveKind::SInt16 => (dest as *mut i16).write_unaligned(to_signed(value)? as i16),
        PrimitiveKind::UInt16 => (dest as *mut u16).write_unaligned(to_unsigned(value)? as u16),
        PrimitiveKind::SInt32 => (dest as *mut i32).write_unaligned(to_signed(value)? as i32),
        PrimitiveKind::UInt32 => (dest as *mut u32).write_unaligned(to_unsigned(value)? as u32),
        PrimitiveKind::SInt64 => (dest as *mut i64).write_unaligned(to_signed(value)?),
        PrimitiveKind::UInt64 => (dest as *mut u64).write_unaligned(to_unsigned(value)?),
        PrimitiveKind::Float => (dest as *mut f32).write_unaligned(to_float(value)? as f32),
        PrimitiveKind::Double => (dest as *mut f64).write_unaligned(to_float(value)?),
    }
    Ok(())
}

/// Load a native value of type `ty` from `src`
///
/// # Safety
///
/// `src` must be valid for reads of `arena.size_of(ty)` bytes.
pub unsafe fn read_value(arena: &TypeArena, ty: TypeId, src: *const u8) -> Value {
    match arena.node(ty) {
        TypeNode::Primitive(kind) => read_primitive(*kind, src),
        TypeNode::Struct(layout) => Value::array(
            layout
                .fields
                .iter()
                .zip(&layout.offsets)
                .map(|(&field, &offset)| read_value(arena, field, src.add(offset)))
                .collect(),
        ),
    }
}

unsafe fn read_primitive(kind: PrimitiveKind, src: *const u8) -> Value {
    match kind {
        PrimitiveKind::Void => Value::Undefined,
        PrimitiveKind::Pointer => Value::pointer((src as *const usize).read_unaligned()),
        PrimitiveKind::SInt8 => Value::Number((src as *const i8).read_unaligned() as f64),
        PrimitiveKind::UInt8 => Value::Number(src.read_unaligned() as f64),
        PrimitiveKind::SInt16 => Value::Number((src as *const i16).read_unaligned() as f64),
        PrimitiveKind::UInt16 => Value::Number((src as *const u16).read_unaligned() as f64),
        PrimitiveKind::SInt32 => Value::Number((src as *const i32).read_unaligned() as f64),
        PrimitiveKind::UInt32 => Value::Number((src as *const u32).read_unaligned() as f64),
        PrimitiveKind::SInt64 => Value::Int64(Int64((src as *const i64).read_unaligned())),
        PrimitiveKind::UInt64 => Value::UInt64(UInt64((src as *const u64).read_unaligned())),
        PrimitiveKind::Float => Value::Number((src as *const f32).read_unaligned() as f64),
        PrimitiveKind::Double => Value::Number((src as *const f64).read_unaligned()),
    }
}

fn is_widened(arena: &TypeArena, ty: TypeId) -> Option<PrimitiveKind> {
    match arena.node(ty) {
        TypeNode::Primitive(kind)
            if (kind.is_signed_integer() || kind.is_unsigned_integer())
                && kind.size() < size_of::<ffi_arg>() =>
        {
            Some(*kind)
        }
        _ => None,
    }
}

/// Bytes a return slot for `ty` needs
pub fn return_slot_size(arena: &TypeArena, ty: TypeId) -> usize {
    arena.size_of(ty).max(size_of::<ffi_arg>())
}

/// Store a callback result into a return slot
///
/// # Safety
///
/// `dest` must be valid for writes of `return_slot_size(arena, ty)` bytes.
pub unsafe fn write_return(
    arena: &TypeArena,
    ty: TypeId,
    value: &Value,
    dest: *mut u8,
) -> Result<(), ScriptError> {
    match is_widened(arena, ty) {
        Some(kind) if kind.is_signed_integer() => {
            (dest as *mut ffi_sarg).write_unaligned(to_signed(value)? as ffi_sarg);
            Ok(())
        }
        Some(_) => {
            (dest as *mut ffi_arg).write_unaligned(to_unsigned(value)? as ffi_arg);
            Ok(())
        }
        None => write_value(arena, ty, value, dest),
    }
}

/// Load a call result from a return slot
///
/// # Safety
///
/// `src` must be valid for reads of `return_slot_size(arena, ty)` bytes.
pub unsafe fn read_return(arena: &TypeArena, ty: TypeId, src: *const u8) -> Value {
    match is_widened(arena, ty) {
        Some(kind) => {
            let word = (src as *const ffi_arg).read_unaligned();
            let narrowed = match kind {
                PrimitiveKind::SInt8 => word as i8 as f64,
                PrimitiveKind::UInt8 => word as u8 as f64,
                PrimitiveKind::SInt16 => word as i16 as f64,
                PrimitiveKind::UInt16 => word as u16 as f64,
                PrimitiveKind::SInt32 => word as i32 as f64,
                _ => word as u32 as f64,
            };
            Value::Number(narrowed)
        }
        None => read_value(arena, ty, src),
    }
}
