//! Native callbacks: script functions callable from native code
//!
//! Each [`NativeCallback`] owns a libffi closure whose trampoline enters the
//! engine, converts the native arguments, calls the script function and
//! writes the result back. The closure and its descriptor are freed together
//! when the callback is dropped; native code must not call the address after
//! that.

use crate::eventlog::BridgeEvent;
use crate::ffi::descriptor::CallDescriptor;
use crate::ffi::layout::ArgBlock;
use crate::ffi::marshal::{read_value, return_slot_size, write_return};
use crate::ffi::pointer::NativePointer;
use crate::script::Core;
use crate::value::{Function, ScriptError, Value};
use libffi::raw::{self, ffi_cif, ffi_closure};
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::{self, null_mut};
use std::sync::Weak;

struct CallbackBinding {
    func: Function,
    descriptor: CallDescriptor,
    core: Weak<Core>,
}

pub struct NativeCallback {
    binding: Box<CallbackBinding>,
    closure: *mut ffi_closure,
    code: NativePointer,
}

// SAFETY: the closure is written once during construction and only freed on
// drop; the binding it points at is immutable.
unsafe impl Send for NativeCallback {}
unsafe impl Sync for NativeCallback {}

impl NativeCallback {
    pub fn new(
        core: &Core,
        func: Function,
        return_type: &Value,
        argument_types: &[Value],
        abi: Option<&str>,
    ) -> Result<Self, ScriptError> {
        let descriptor = CallDescriptor::for_callback(return_type, argument_types, abi)?;
        let binding = Box::new(CallbackBinding {
            func,
            descriptor,
            core: core.downgrade(),
        });

        let mut code: *mut c_void = null_mut();
        // SAFETY: plain allocation; checked for null below.
        let closure = unsafe { raw::ffi_closure_alloc(size_of::<ffi_closure>(), &mut code) } as *mut ffi_closure;
        if closure.is_null() {
            return Err(ScriptError::ClosureAllocFailed);
        }

        let user_data = &*binding as *const CallbackBinding as *mut c_void;
        // SAFETY: the cif and user data live in `binding`, which is boxed and
        // outlives the closure.
        let status = unsafe {
            raw::ffi_prep_closure_loc(
                closure,
                binding.descriptor.cif(),
                Some(trampoline),
                user_data,
                code,
            )
        };
        if status != raw::ffi_status_FFI_OK {
            // SAFETY: allocated above and never handed out.
            unsafe { raw::ffi_closure_free(closure as *mut c_void) };
            return Err(ScriptError::ClosurePrepareFailed);
        }

        let code = NativePointer::from_ptr(code as *const u8);
        core.logger().log(BridgeEvent::CallbackCreated {
            address: code.as_usize(),
        });

        Ok(NativeCallback { binding, closure, code })
    }

    /// Entry point native code calls
    pub fn address(&self) -> NativePointer {
        self.code
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.binding.descriptor
    }

    pub fn function(&self) -> &Function {
        &self.binding.func
    }
}

impl Drop for NativeCallback {
    fn drop(&mut self) {
        // SAFETY: allocated by ffi_closure_alloc in `new`.
        unsafe { raw::ffi_closure_free(self.closure as *mut c_void) };
        if let Some(core) = self.binding.core.upgrade() {
            core.logger().log(BridgeEvent::CallbackDestroyed {
                address: self.code.as_usize(),
            });
        }
    }
}

unsafe extern "C" fn trampoline(_cif: *mut ffi_cif, result: *mut c_void, args: *mut *mut c_void, user_data: *mut c_void) {
    let binding = &*(user_data as *const CallbackBinding);
    let descriptor = &binding.descriptor;
    let arena = descriptor.arena();
    let return_type = descriptor.return_type();
    let returns_value = !arena.is_void(return_type);

    if returns_value {
        ptr::write_bytes(result as *mut u8, 0, return_slot_size(arena, return_type));
    }

    let Some(core) = binding.core.upgrade() else {
        return;
    };
    let scope = core.enter();
    let interceptor = core.interceptor();

    let context = interceptor.obtain_invocation_context();
    let this = context.clone().unwrap_or_default();

    let argv: Vec<Value> = descriptor
        .arg_types()
        .iter()
        .enumerate()
        .map(|(index, &ty)| read_value(arena, ty, *args.add(index) as *const u8))
        .collect();

    let outcome = scope.call(&binding.func, &this, &argv);

    if let Some(context) = context {
        interceptor.release_invocation_context(context);
    }

    if let Ok(value) = outcome {
        if returns_value {
            // A struct that fails midway must not leave a partial value behind.
            let size = return_slot_size(arena, return_type);
            let mut scratch = ArgBlock::zeroed(size);
            match write_return(arena, return_type, &value, scratch.as_mut_ptr()) {
                Ok(()) => ptr::copy_nonoverlapping(scratch.as_mut_ptr(), result as *mut u8, size),
                Err(error) => core.report_unhandled(&error),
            }
        }
    }

    drop(scope);
}
