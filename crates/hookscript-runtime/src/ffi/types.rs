//! Native type descriptors
//!
//! Script-side type descriptors are either a primitive name (`"int32"`,
//! `"pointer"`, ...) or an array of field descriptors describing a struct.
//! They resolve into a [`TypeArena`]: a flat list of [`TypeNode`]s that
//! reference each other by [`TypeId`], alongside the libffi type objects the
//! call interface compiler consumes.
//!
//! Type mapping:
//! - `int`, `int32` → SInt32; `uint`, `uint32` → UInt32
//! - `long` / `ulong` → platform C `long` width
//! - `size_t` / `ssize_t` → pointer width
//! - `char`, `bool`, `int8` → SInt8; `uchar`, `uint8` → UInt8
//! - `float` → Float; `double` → Double; `pointer` → Pointer; `void` → Void

use crate::ffi::layout::{align_up, BumpCursor};
use crate::value::{ScriptError, Value};
use libffi::raw::{self, ffi_abi, ffi_type};
use std::ptr::{addr_of_mut, null_mut};

/// Leaf native value shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Void,
    Pointer,
    SInt8,
    UInt8,
    SInt16,
    UInt16,
    SInt32,
    UInt32,
    SInt64,
    UInt64,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        use PrimitiveKind::*;
        let kind = match name {
            "void" => Void,
            "pointer" => Pointer,
            "int" | "int32" => SInt32,
            "uint" | "uint32" => UInt32,
            "long" => Self::c_long(),
            "ulong" => Self::c_ulong(),
            "char" | "bool" | "int8" => SInt8,
            "uchar" | "uint8" => UInt8,
            "int16" => SInt16,
            "uint16" => UInt16,
            "int64" => SInt64,
            "uint64" => UInt64,
            "size_t" => Self::usize(),
            "ssize_t" => Self::isize(),
            "float" => Float,
            "double" => Double,
            _ => return None,
        };
        Some(kind)
    }

    fn c_long() -> Self {
        if std::mem::size_of::<libc::c_long>() == 8 {
            PrimitiveKind::SInt64
        } else {
            PrimitiveKind::SInt32
        }
    }

    fn c_ulong() -> Self {
        if std::mem::size_of::<libc::c_ulong>() == 8 {
            PrimitiveKind::UInt64
        } else {
            PrimitiveKind::UInt32
        }
    }

    fn usize() -> Self {
        if std::mem::size_of::<usize>() == 8 {
            PrimitiveKind::UInt64
        } else {
            PrimitiveKind::UInt32
        }
    }

    fn isize() -> Self {
        if std::mem::size_of::<isize>() == 8 {
            PrimitiveKind::SInt64
        } else {
            PrimitiveKind::SInt32
        }
    }

    pub fn size(self) -> usize {
        use std::mem::size_of;
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Pointer => size_of::<usize>(),
            PrimitiveKind::SInt8 | PrimitiveKind::UInt8 => 1,
            PrimitiveKind::SInt16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::SInt32 | PrimitiveKind::UInt32 | PrimitiveKind::Float => 4,
            PrimitiveKind::SInt64 | PrimitiveKind::UInt64 | PrimitiveKind::Double => 8,
        }
    }

    pub fn align(self) -> usize {
        use std::mem::align_of;
        match self {
            PrimitiveKind::Void => 1,
            PrimitiveKind::Pointer => align_of::<usize>(),
            PrimitiveKind::SInt8 | PrimitiveKind::UInt8 => 1,
            PrimitiveKind::SInt16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::SInt32 | PrimitiveKind::UInt32 => 4,
            PrimitiveKind::Float => align_of::<f32>(),
            PrimitiveKind::SInt64 => align_of::<i64>(),
            PrimitiveKind::UInt64 => align_of::<u64>(),
            PrimitiveKind::Double => align_of::<f64>(),
        }
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            PrimitiveKind::SInt8 | PrimitiveKind::SInt16 | PrimitiveKind::SInt32 | PrimitiveKind::SInt64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            PrimitiveKind::UInt8 | PrimitiveKind::UInt16 | PrimitiveKind::UInt32 | PrimitiveKind::UInt64
        )
    }

    /// Default argument promotion applied to variadic tail entries
    pub fn promoted(self) -> Self {
        match self {
            PrimitiveKind::SInt8 | PrimitiveKind::SInt16 => PrimitiveKind::SInt32,
            PrimitiveKind::UInt8 | PrimitiveKind::UInt16 => PrimitiveKind::UInt32,
            PrimitiveKind::Float => PrimitiveKind::Double,
            other => other,
        }
    }

    fn raw(self) -> *mut ffi_type {
        // SAFETY: libffi's builtin type objects are process-wide statics that
        // libffi itself never mutates.
        unsafe {
            match self {
                PrimitiveKind::Void => addr_of_mut!(raw::ffi_type_void),
                PrimitiveKind::Pointer => addr_of_mut!(raw::ffi_type_pointer),
                PrimitiveKind::SInt8 => addr_of_mut!(raw::ffi_type_sint8),
                PrimitiveKind::UInt8 => addr_of_mut!(raw::ffi_type_uint8),
                PrimitiveKind::SInt16 => addr_of_mut!(raw::ffi_type_sint16),
                PrimitiveKind::UInt16 => addr_of_mut!(raw::ffi_type_uint16),
                PrimitiveKind::SInt32 => addr_of_mut!(raw::ffi_type_sint32),
                PrimitiveKind::UInt32 => addr_of_mut!(raw::ffi_type_uint32),
                PrimitiveKind::SInt64 => addr_of_mut!(raw::ffi_type_sint64),
                PrimitiveKind::UInt64 => addr_of_mut!(raw::ffi_type_uint64),
                PrimitiveKind::Float => addr_of_mut!(raw::ffi_type_float),
                PrimitiveKind::Double => addr_of_mut!(raw::ffi_type_double),
            }
        }
    }
}

/// Index of a node inside its [`TypeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(usize);

/// Computed C layout of a struct node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub fields: Vec<TypeId>,
    pub offsets: Vec<usize>,
    pub size: usize,
    pub align: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeNode {
    Primitive(PrimitiveKind),
    Struct(StructLayout),
}

/// Owner of every type node a call descriptor references
///
/// Struct nodes allocate a libffi `ffi_type` and a null-terminated element
/// array; both live until the arena drops, whatever the nesting depth.
pub struct TypeArena {
    nodes: Vec<TypeNode>,
    raw: Vec<*mut ffi_type>,
    owned_types: Vec<*mut ffi_type>,
    owned_elements: Vec<*mut [*mut ffi_type]>,
}

// SAFETY: the raw pointers refer either to immutable libffi statics or to
// allocations owned exclusively by this arena.
unsafe impl Send for TypeArena {}
unsafe impl Sync for TypeArena {}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeArena {
    pub fn new() -> Self {
        TypeArena {
            nodes: Vec::new(),
            raw: Vec::new(),
            owned_types: Vec::new(),
            owned_elements: Vec::new(),
        }
    }

    /// Resolve a script type descriptor
    ///
    /// Fails with "invalid type specified" for unknown names, non-string
    /// non-array descriptors and `void` struct fields. Nodes allocated before
    /// a failure stay owned by the arena.
    pub fn resolve(&mut self, descriptor: &Value) -> Result<TypeId, ScriptError> {
        match descriptor {
            Value::String(name) => PrimitiveKind::from_name(name)
                .map(|kind| self.primitive(kind))
                .ok_or(ScriptError::InvalidType),
            Value::Array(fields) => {
                let mut ids = Vec::with_capacity(fields.len());
                for field in fields.as_slice() {
                    let id = self.resolve(field)?;
                    if self.is_void(id) {
                        return Err(ScriptError::InvalidType);
                    }
                    ids.push(id);
                }
                Ok(self.structure(ids))
            }
            _ => Err(ScriptError::InvalidType),
        }
    }

    pub fn primitive(&mut self, kind: PrimitiveKind) -> TypeId {
        self.push(TypeNode::Primitive(kind), kind.raw())
    }

    /// Allocate a struct node over already-resolved fields
    pub fn structure(&mut self, fields: Vec<TypeId>) -> TypeId {
        let mut cursor = BumpCursor::new();
        let offsets = fields
            .iter()
            .map(|&f| cursor.place(self.size_of(f), self.align_of(f)))
            .collect();
        let align = cursor.max_align();
        let size = align_up(cursor.offset(), align);

        let elements: Box<[*mut ffi_type]> = fields
            .iter()
            .map(|&f| self.raw[f.0])
            .chain(std::iter::once(null_mut()))
            .collect();
        let elements = Box::into_raw(elements);
        let node = Box::into_raw(Box::new(ffi_type {
            size: 0,
            alignment: 0,
            type_: raw::FFI_TYPE_STRUCT as u16,
            elements: elements as *mut *mut ffi_type,
        }));
        self.owned_elements.push(elements);
        self.owned_types.push(node);

        self.push(
            TypeNode::Struct(StructLayout {
                fields,
                offsets,
                size,
                align,
            }),
            node,
        )
    }

    fn push(&mut self, node: TypeNode, raw: *mut ffi_type) -> TypeId {
        self.nodes.push(node);
        self.raw.push(raw);
        TypeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.0]
    }

    /// libffi view of a node, valid for the arena's lifetime
    pub fn raw(&self, id: TypeId) -> *mut ffi_type {
        self.raw[id.0]
    }

    pub fn size_of(&self, id: TypeId) -> usize {
        match self.node(id) {
            TypeNode::Primitive(kind) => kind.size(),
            TypeNode::Struct(layout) => layout.size,
        }
    }

    pub fn align_of(&self, id: TypeId) -> usize {
        match self.node(id) {
            TypeNode::Primitive(kind) => kind.align(),
            TypeNode::Struct(layout) => layout.align,
        }
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.node(id), TypeNode::Primitive(PrimitiveKind::Void))
    }

    /// Apply variadic promotion; structs pass through unchanged
    pub fn promote(&mut self, id: TypeId) -> TypeId {
        match *self.node(id) {
            TypeNode::Primitive(kind) if kind.promoted() != kind => self.primitive(kind.promoted()),
            _ => id,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Drop for TypeArena {
    fn drop(&mut self) {
        // SAFETY: each pointer came from Box::into_raw in `structure` and is
        // freed exactly once here.
        unsafe {
            for node in self.owned_types.drain(..) {
                drop(Box::from_raw(node));
            }
            for elements in self.owned_elements.drain(..) {
                drop(Box::from_raw(elements));
            }
        }
    }
}

/// Map a calling convention name to a libffi ABI
pub fn resolve_abi(name: Option<&str>) -> Result<ffi_abi, ScriptError> {
    let Some(name) = name else {
        return Ok(raw::ffi_abi_FFI_DEFAULT_ABI);
    };
    abi_by_name(name).ok_or(ScriptError::InvalidAbi)
}

fn abi_by_name(name: &str) -> Option<ffi_abi> {
    if name == "default" {
        return Some(raw::ffi_abi_FFI_DEFAULT_ABI);
    }

    #[cfg(target_arch = "x86_64")]
    {
        match name {
            #[cfg(not(windows))]
            "sysv" => return Some(raw::ffi_abi_FFI_UNIX64),
            "unix64" => return Some(raw::ffi_abi_FFI_UNIX64),
            "win64" => return Some(raw::ffi_abi_FFI_WIN64),
            _ => {}
        }
    }

    #[cfg(target_arch = "x86")]
    {
        match name {
            "sysv" => return Some(raw::ffi_abi_FFI_SYSV),
            "stdcall" => return Some(raw::ffi_abi_FFI_STDCALL),
            "thiscall" => return Some(raw::ffi_abi_FFI_THISCALL),
            "fastcall" => return Some(raw::ffi_abi_FFI_FASTCALL),
            "mscdecl" => return Some(raw::ffi_abi_FFI_MS_CDECL),
            _ => {}
        }
    }

    #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
    {
        if name == "sysv" {
            return Some(raw::ffi_abi_FFI_SYSV);
        }
    }

    None
}
