//! Value Bridge Tests
//!
//! Type resolution, struct layout and value conversion, checked against
//! the compiler's own C layout and libffi's view of the same types.

mod common;

use common::names;
use pretty_assertions::assert_eq;
use hookscript_runtime::ffi::layout::ArgBlock;
use hookscript_runtime::ffi::marshal::{read_return, read_value, return_slot_size, write_return, write_value};
use hookscript_runtime::ffi::{TypeArena, TypeNode};
use hookscript_runtime::{Int64, UInt64, Value};
use libffi::raw;
use proptest::prelude::*;
use rstest::rstest;
use std::mem::{align_of, size_of};

fn resolve(descriptor: Value) -> (TypeArena, hookscript_runtime::ffi::TypeId) {
    let mut arena = TypeArena::new();
    let id = arena.resolve(&descriptor).unwrap();
    (arena, id)
}

fn round_trip(name: &str, value: &Value) -> Value {
    let (arena, id) = resolve(Value::string(name));
    let mut block = ArgBlock::zeroed(arena.size_of(id));
    // SAFETY: the block is sized for the type.
    unsafe {
        write_value(&arena, id, value, block.as_mut_ptr()).unwrap();
        read_value(&arena, id, block.as_mut_ptr())
    }
}

#[allow(dead_code)]
#[repr(C)]
struct Mixed {
    a: u8,
    b: i16,
    c: f64,
    d: u8,
}

#[allow(dead_code)]
#[repr(C)]
struct Nested {
    head: u8,
    inner: Mixed,
    tail: u32,
}

fn mixed_descriptor() -> Value {
    Value::array(names(&["uint8", "int16", "double", "uint8"]))
}

#[test]
fn test_struct_layout_matches_repr_c() {
    let (arena, id) = resolve(mixed_descriptor());
    let TypeNode::Struct(layout) = arena.node(id) else {
        panic!("expected a struct node");
    };
    assert_eq!(layout.offsets, vec![0, 2, 8, 16]);
    assert_eq!(layout.size, size_of::<Mixed>());
    assert_eq!(layout.align, align_of::<Mixed>());
}

#[test]
fn test_nested_struct_layout_matches_repr_c() {
    let descriptor = Value::array(vec![Value::string("uint8"), mixed_descriptor(), Value::string("uint32")]);
    let (arena, id) = resolve(descriptor);
    assert_eq!(arena.size_of(id), size_of::<Nested>());
    assert_eq!(arena.align_of(id), align_of::<Nested>());

    let TypeNode::Struct(layout) = arena.node(id) else {
        panic!("expected a struct node");
    };
    assert_eq!(layout.offsets[1], std::mem::offset_of!(Nested, inner));
    assert_eq!(layout.offsets[2], std::mem::offset_of!(Nested, tail));
}

#[test]
fn test_struct_offsets_agree_with_libffi() {
    let (arena, id) = resolve(mixed_descriptor());
    let TypeNode::Struct(layout) = arena.node(id) else {
        panic!("expected a struct node");
    };

    let mut offsets = vec![0usize; layout.fields.len()];
    // SAFETY: the arena owns the struct type; offsets has one slot per field.
    let status = unsafe { raw::ffi_get_struct_offsets(raw::ffi_abi_FFI_DEFAULT_ABI, arena.raw(id), offsets.as_mut_ptr()) };
    assert_eq!(status, raw::ffi_status_FFI_OK);
    assert_eq!(offsets, layout.offsets);

    // SAFETY: ffi_get_struct_offsets initialized size and alignment.
    let (size, alignment) = unsafe { ((*arena.raw(id)).size, (*arena.raw(id)).alignment) };
    assert_eq!(size, layout.size);
    assert_eq!(usize::from(alignment), layout.align);
}

#[rstest]
#[case("char", Value::Number(200.0), Value::Number(-56.0))]
#[case("uint8", Value::Number(511.0), Value::Number(255.0))]
#[case("int16", Value::Number(40000.0), Value::Number(-25536.0))]
#[case("uint32", Value::Int64(Int64(-1)), Value::Number(4294967295.0))]
#[case("float", Value::Number(0.1), Value::Number(f64::from(0.1f32)))]
fn test_narrowing_conversions(#[case] name: &str, #[case] input: Value, #[case] expected: Value) {
    assert_eq!(round_trip(name, &input), expected);
}

#[test]
fn test_unsigned_rejects_negative_number() {
    let (arena, id) = resolve(Value::string("uint8"));
    let mut block = ArgBlock::zeroed(arena.size_of(id));
    // SAFETY: the block is sized for the type.
    let result = unsafe { write_value(&arena, id, &Value::Number(-1.0), block.as_mut_ptr()) };
    assert_eq!(result.unwrap_err().to_string(), "expected an unsigned integer");
}

#[test]
fn test_buffers_pass_their_base_address() {
    let buffer = hookscript_runtime::ByteBuffer::from_vec(vec![1, 2, 3]);
    let base = buffer.as_ptr();
    assert_eq!(round_trip("pointer", &Value::Bytes(buffer)), Value::Pointer(base));
}

#[test]
fn test_struct_value_round_trip() {
    let (arena, id) = resolve(mixed_descriptor());
    let value = Value::array(vec![
        Value::Number(1.0),
        Value::Number(-2.0),
        Value::Number(3.5),
        Value::Number(4.0),
    ]);
    let mut block = ArgBlock::zeroed(arena.size_of(id));
    // SAFETY: the block is sized for the struct.
    let back = unsafe {
        write_value(&arena, id, &value, block.as_mut_ptr()).unwrap();
        read_value(&arena, id, block.as_mut_ptr())
    };
    assert_eq!(back, value);
}

#[test]
fn test_small_returns_fill_a_word() {
    let (arena, id) = resolve(Value::string("int8"));
    assert_eq!(return_slot_size(&arena, id), size_of::<raw::ffi_arg>());

    let mut block = ArgBlock::zeroed(return_slot_size(&arena, id));
    // SAFETY: the block is a full return slot.
    let back = unsafe {
        write_return(&arena, id, &Value::Number(-3.0), block.as_mut_ptr()).unwrap();
        read_return(&arena, id, block.as_mut_ptr())
    };
    assert_eq!(back, Value::Number(-3.0));
}

#[rstest]
#[case(Value::Number(1.0))]
#[case(Value::Null)]
#[case(Value::array(vec![Value::string("int"), Value::Number(2.0)]))]
fn test_invalid_descriptors(#[case] descriptor: Value) {
    let mut arena = TypeArena::new();
    let err = arena.resolve(&descriptor).unwrap_err();
    assert_eq!(err.to_string(), "invalid type specified");
}

fn number_bits(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.to_bits(),
        other => panic!("expected a number, got {:?}", other),
    }
}

#[rstest]
#[case::float("float")]
#[case::double("double")]
fn test_signed_zero_survives(#[case] name: &str) {
    for zero in [0.0f64, -0.0] {
        assert_eq!(number_bits(&round_trip(name, &Value::Number(zero))), zero.to_bits());
    }
}

proptest! {
    #[test]
    fn prop_small_integers_round_trip(a: i8, b: u8, c: u16, d: i32) {
        prop_assert_eq!(round_trip("int8", &Value::Number(f64::from(a))), Value::Number(f64::from(a)));
        prop_assert_eq!(round_trip("uint8", &Value::Number(f64::from(b))), Value::Number(f64::from(b)));
        prop_assert_eq!(round_trip("uint16", &Value::Number(f64::from(c))), Value::Number(f64::from(c)));
        prop_assert_eq!(round_trip("int32", &Value::Number(f64::from(d))), Value::Number(f64::from(d)));
    }

    #[test]
    fn prop_float_keeps_single_precision_bits(v in any::<f32>().prop_filter("finite", |v| v.is_finite())) {
        let value = Value::Number(f64::from(v));
        prop_assert_eq!(number_bits(&round_trip("float", &value)), f64::from(v).to_bits());
    }

    #[test]
    fn prop_double_keeps_every_bit(v in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        prop_assert_eq!(number_bits(&round_trip("double", &Value::Number(v))), v.to_bits());
    }

    #[test]
    fn prop_pointer_round_trips(v: usize) {
        prop_assert_eq!(round_trip("pointer", &Value::pointer(v)), Value::pointer(v));
    }

    #[test]
    fn prop_int16_truncates_like_c(v: i64) {
        prop_assert_eq!(
            round_trip("int16", &Value::Int64(Int64(v))),
            Value::Number(f64::from(v as i16))
        );
    }

    #[test]
    fn prop_uint32_truncates_like_c(v: u64) {
        prop_assert_eq!(
            round_trip("uint32", &Value::UInt64(UInt64(v))),
            Value::Number(f64::from(v as u32))
        );
    }

    #[test]
    fn prop_wide_integers_keep_every_bit(v: i64) {
        prop_assert_eq!(round_trip("int64", &Value::Int64(Int64(v))), Value::Int64(Int64(v)));
        prop_assert_eq!(
            round_trip("uint64", &Value::Int64(Int64(v))),
            Value::UInt64(UInt64(v as u64))
        );
    }
}

#[cfg(all(target_pointer_width = "64", not(windows)))]
proptest! {
    #[test]
    fn prop_word_sized_names_round_trip(v: i64) {
        let unsigned = UInt64(v as u64);
        prop_assert_eq!(round_trip("size_t", &Value::UInt64(unsigned)), Value::UInt64(unsigned));
        prop_assert_eq!(round_trip("ulong", &Value::UInt64(unsigned)), Value::UInt64(unsigned));
        prop_assert_eq!(round_trip("ssize_t", &Value::Int64(Int64(v))), Value::Int64(Int64(v)));
        prop_assert_eq!(round_trip("long", &Value::Int64(Int64(v))), Value::Int64(Int64(v)));
    }
}
