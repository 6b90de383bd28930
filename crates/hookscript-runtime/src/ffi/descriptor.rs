//! Call descriptors: compiled native signatures
//!
//! A [`CallDescriptor`] owns every type node it references (through its
//! [`TypeArena`]) and the libffi call interface compiled from them. It is
//! built once per native function or callback object and never mutated;
//! variadic calls that supply more arguments than declared get a transient
//! [`CallPlan`] with its own extended interface.

use crate::ffi::layout::ArgLayout;
use crate::ffi::types::{resolve_abi, TypeArena, TypeId};
use crate::value::{ScriptError, Value};
use libffi::raw::{self, ffi_abi, ffi_cif, ffi_type};
use std::borrow::Cow;
use std::mem::MaybeUninit;
use std::os::raw::c_uint;
use std::ptr::null_mut;

/// Argument-list entry separating fixed arguments from the repeating tail
pub const VARIADIC_MARKER: &str = "...";

/// A prepared `ffi_cif` plus the argument-type array it points into
struct CompiledSignature {
    cif: Box<ffi_cif>,
    _atypes: Box<[*mut ffi_type]>,
}

impl CompiledSignature {
    fn compile(
        arena: &TypeArena,
        return_type: TypeId,
        arg_types: &[TypeId],
        abi: ffi_abi,
        nargs_fixed: Option<usize>,
    ) -> Result<Self, ScriptError> {
        let mut atypes: Box<[*mut ffi_type]> = arg_types.iter().map(|&t| arena.raw(t)).collect();
        // SAFETY: ffi_cif is plain data; ffi_prep_cif initializes it.
        let mut cif: Box<ffi_cif> = Box::new(unsafe { MaybeUninit::zeroed().assume_init() });
        let atypes_ptr = if atypes.is_empty() {
            null_mut()
        } else {
            atypes.as_mut_ptr()
        };

        // SAFETY: every type pointer is owned by `arena` or static, and the
        // array outlives the cif because both move together.
        let status = unsafe {
            match nargs_fixed {
                Some(fixed) => raw::ffi_prep_cif_var(
                    &mut *cif,
                    abi,
                    fixed as c_uint,
                    arg_types.len() as c_uint,
                    arena.raw(return_type),
                    atypes_ptr,
                ),
                None => raw::ffi_prep_cif(
                    &mut *cif,
                    abi,
                    arg_types.len() as c_uint,
                    arena.raw(return_type),
                    atypes_ptr,
                ),
            }
        };

        if status != raw::ffi_status_FFI_OK {
            return Err(ScriptError::CompileFailed);
        }

        Ok(CompiledSignature {
            cif,
            _atypes: atypes,
        })
    }

    fn as_ptr(&self) -> *mut ffi_cif {
        &*self.cif as *const ffi_cif as *mut ffi_cif
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerPolicy {
    Allow,
    Reject,
}

/// Compiled native signature with its owned type graph
pub struct CallDescriptor {
    arena: TypeArena,
    return_type: TypeId,
    arg_types: Vec<TypeId>,
    abi: ffi_abi,
    nargs_fixed: usize,
    has_marker: bool,
    layout: ArgLayout,
    signature: CompiledSignature,
}

// SAFETY: the arena and compiled cif are immutable after construction.
unsafe impl Send for CallDescriptor {}
unsafe impl Sync for CallDescriptor {}

impl CallDescriptor {
    /// Descriptor for an outbound native call; accepts a variadic marker
    pub fn for_function(
        return_type: &Value,
        argument_types: &[Value],
        abi: Option<&str>,
    ) -> Result<Self, ScriptError> {
        Self::build(return_type, argument_types, abi, MarkerPolicy::Allow)
    }

    /// Descriptor for an inbound callback; a marker is an invalid type here
    pub fn for_callback(
        return_type: &Value,
        argument_types: &[Value],
        abi: Option<&str>,
    ) -> Result<Self, ScriptError> {
        Self::build(return_type, argument_types, abi, MarkerPolicy::Reject)
    }

    fn build(
        return_type: &Value,
        argument_types: &[Value],
        abi: Option<&str>,
        markers: MarkerPolicy,
    ) -> Result<Self, ScriptError> {
        let mut arena = TypeArena::new();
        let return_type = arena.resolve(return_type)?;

        let mut arg_types = Vec::with_capacity(argument_types.len());
        let mut nargs_fixed = argument_types.len();
        let mut has_marker = false;

        for (index, descriptor) in argument_types.iter().enumerate() {
            if descriptor.as_str() == Some(VARIADIC_MARKER) {
                if markers == MarkerPolicy::Reject {
                    return Err(ScriptError::InvalidType);
                }
                if index == 0 || has_marker {
                    return Err(ScriptError::UnexpectedMarker);
                }
                nargs_fixed = index;
                has_marker = true;
                continue;
            }

            let id = arena.resolve(descriptor)?;
            if arena.is_void(id) {
                return Err(ScriptError::InvalidType);
            }
            arg_types.push(if has_marker { arena.promote(id) } else { id });
        }

        let abi = resolve_abi(abi)?;
        let signature = CompiledSignature::compile(
            &arena,
            return_type,
            &arg_types,
            abi,
            has_marker.then_some(nargs_fixed),
        )?;
        let layout = ArgLayout::compute(&arena, &arg_types);

        Ok(CallDescriptor {
            arena,
            return_type,
            arg_types,
            abi,
            nargs_fixed,
            has_marker,
            layout,
            signature,
        })
    }

    pub fn arena(&self) -> &TypeArena {
        &self.arena
    }

    pub fn return_type(&self) -> TypeId {
        self.return_type
    }

    pub fn arg_types(&self) -> &[TypeId] {
        &self.arg_types
    }

    pub fn nargs(&self) -> usize {
        self.arg_types.len()
    }

    pub fn nargs_fixed(&self) -> usize {
        self.nargs_fixed
    }

    /// True when a repeating tail follows the marker
    pub fn is_variadic(&self) -> bool {
        self.has_marker && self.nargs_fixed < self.arg_types.len()
    }

    pub fn layout(&self) -> &ArgLayout {
        &self.layout
    }

    pub fn abi(&self) -> ffi_abi {
        self.abi
    }

    pub(crate) fn cif(&self) -> *mut ffi_cif {
        self.signature.as_ptr()
    }

    /// Check `argc` against the signature and pick the interface for this call
    ///
    /// Fails with "bad argument count" when a fixed-arity call gets a
    /// different count, or a variadic call gets fewer than the fixed prefix.
    pub fn plan(&self, argc: usize) -> Result<CallPlan<'_>, ScriptError> {
        let nargs = self.nargs();
        let count_ok = if self.is_variadic() {
            argc >= self.nargs_fixed
        } else {
            argc == nargs
        };
        if !count_ok {
            return Err(ScriptError::BadArgumentCount);
        }

        if argc <= nargs {
            return Ok(CallPlan {
                types: Cow::Borrowed(&self.arg_types),
                layout: Cow::Borrowed(&self.layout),
                extended: None,
                descriptor: self,
            });
        }

        let mut types = self.arg_types.clone();
        let mut tail = self.nargs_fixed;
        while types.len() < argc {
            types.push(self.arg_types[tail]);
            tail += 1;
            if tail >= nargs {
                tail = self.nargs_fixed;
            }
        }

        let extended = CompiledSignature::compile(
            &self.arena,
            self.return_type,
            &types,
            self.abi,
            Some(self.nargs_fixed),
        )?;
        let layout = ArgLayout::compute(&self.arena, &types);

        Ok(CallPlan {
            types: Cow::Owned(types),
            layout: Cow::Owned(layout),
            extended: Some(extended),
            descriptor: self,
        })
    }
}

/// Per-call view of a descriptor: slot types, layout and interface
pub struct CallPlan<'a> {
    descriptor: &'a CallDescriptor,
    types: Cow<'a, [TypeId]>,
    layout: Cow<'a, ArgLayout>,
    extended: Option<CompiledSignature>,
}

impl<'a> CallPlan<'a> {
    pub fn descriptor(&self) -> &'a CallDescriptor {
        self.descriptor
    }

    /// Type of every slot passed to the callee
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    pub fn layout(&self) -> &ArgLayout {
        &self.layout
    }

    /// True when a transient interface was compiled for this call
    pub fn is_extended(&self) -> bool {
        self.extended.is_some()
    }

    pub(crate) fn cif(&self) -> *mut ffi_cif {
        match &self.extended {
            Some(signature) => signature.as_ptr(),
            None => self.descriptor.cif(),
        }
    }
}
