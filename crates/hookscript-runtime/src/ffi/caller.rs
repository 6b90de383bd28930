//! Native function objects
//!
//! A [`NativeFunction`] pairs a target address with a compiled
//! [`CallDescriptor`] and the per-function call options. Invoking it
//! marshals script values into a zeroed argument block, optionally releases
//! the engine lock for the duration of the call, and runs the call under the
//! instance's exceptor when faults are to be stolen.

use crate::eventlog::BridgeEvent;
use crate::exceptor::NativeException;
use crate::ffi::descriptor::CallDescriptor;
use crate::ffi::layout::ArgBlock;
use crate::ffi::marshal::{read_return, return_slot_size, write_value};
use crate::ffi::pointer::NativePointer;
use crate::script::{Scope, SuspendedScope};
use crate::value::{ScriptError, Value};
use libffi::raw;
use std::ffi::c_void;
use std::io;
use std::ptr::null_mut;

/// Whether the engine lock is released while native code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduling {
    #[default]
    Cooperative,
    Exclusive,
}

impl Scheduling {
    pub fn parse(name: &str) -> Result<Self, ScriptError> {
        match name {
            "cooperative" => Ok(Scheduling::Cooperative),
            "exclusive" => Ok(Scheduling::Exclusive),
            _ => Err(ScriptError::InvalidOption("invalid scheduling behavior value")),
        }
    }
}

/// What happens to a hardware fault raised by the callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionBehavior {
    /// Convert the fault into a thrown script error
    #[default]
    Steal,
    /// Let the fault take its normal, usually fatal, course
    Propagate,
}

impl ExceptionBehavior {
    pub fn parse(name: &str) -> Result<Self, ScriptError> {
        match name {
            "steal" => Ok(ExceptionBehavior::Steal),
            "propagate" => Ok(ExceptionBehavior::Propagate),
            _ => Err(ScriptError::InvalidOption("invalid exceptions behavior value")),
        }
    }
}

/// Whether the code tracer follows the callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeTraps {
    #[default]
    Default,
    All,
}

impl CodeTraps {
    pub fn parse(name: &str) -> Result<Self, ScriptError> {
        match name {
            "default" => Ok(CodeTraps::Default),
            "all" => Ok(CodeTraps::All),
            _ => Err(ScriptError::InvalidOption("invalid code traps value")),
        }
    }
}

/// Plain results, or `{ value, errno }` records for system functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnShape {
    #[default]
    Plain,
    Detailed,
}

/// Name of the error-code field on detailed results
#[cfg(windows)]
pub const SYSTEM_ERROR_FIELD: &str = "lastError";
#[cfg(not(windows))]
pub const SYSTEM_ERROR_FIELD: &str = "errno";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallOptions {
    pub abi: Option<String>,
    pub scheduling: Scheduling,
    pub exceptions: ExceptionBehavior,
    pub traps: CodeTraps,
}

impl CallOptions {
    /// Parse the trailing constructor argument
    ///
    /// `undefined` keeps `defaults`, a string names the ABI, and an object may
    /// set any of `abi`, `scheduling`, `exceptions` and `traps`.
    pub fn parse(value: &Value, defaults: &CallOptions) -> Result<Self, ScriptError> {
        let mut options = defaults.clone();
        match value {
            Value::Undefined => {}
            Value::String(abi) => options.abi = Some(abi.to_string()),
            Value::Object(object) => {
                if let Some(abi) = defined(object.get("abi")) {
                    options.abi = Some(abi.to_string());
                }
                if let Some(scheduling) = defined(object.get("scheduling")) {
                    options.scheduling = Scheduling::parse(&scheduling.to_string())?;
                }
                if let Some(exceptions) = defined(object.get("exceptions")) {
                    options.exceptions = ExceptionBehavior::parse(&exceptions.to_string())?;
                }
                if let Some(traps) = defined(object.get("traps")) {
                    options.traps = CodeTraps::parse(&traps.to_string())?;
                }
            }
            _ => return Err(ScriptError::ExpectedOptions),
        }
        Ok(options)
    }
}

fn defined(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::Undefined))
}

/// Callable wrapper around a native function address
pub struct NativeFunction {
    address: NativePointer,
    descriptor: CallDescriptor,
    options: CallOptions,
    shape: ReturnShape,
}

impl NativeFunction {
    pub fn new(
        address: NativePointer,
        return_type: &Value,
        argument_types: &[Value],
        options: CallOptions,
    ) -> Result<Self, ScriptError> {
        Self::with_shape(address, return_type, argument_types, options, ReturnShape::Plain)
    }

    /// System-function form: results carry the thread's error code
    pub fn system(
        address: NativePointer,
        return_type: &Value,
        argument_types: &[Value],
        options: CallOptions,
    ) -> Result<Self, ScriptError> {
        Self::with_shape(address, return_type, argument_types, options, ReturnShape::Detailed)
    }

    fn with_shape(
        address: NativePointer,
        return_type: &Value,
        argument_types: &[Value],
        options: CallOptions,
        shape: ReturnShape,
    ) -> Result<Self, ScriptError> {
        let descriptor = CallDescriptor::for_function(return_type, argument_types, options.abi.as_deref())?;
        Ok(NativeFunction {
            address,
            descriptor,
            options,
            shape,
        })
    }

    pub fn address(&self) -> NativePointer {
        self.address
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    /// Call the bound address with `args`
    pub fn invoke(&self, scope: &Scope<'_>, args: &[Value]) -> Result<Value, ScriptError> {
        self.invoke_at(scope, self.address, args)
    }

    /// `fn.call(receiver, ...args)`
    ///
    /// A nullish receiver uses the bound address; a pointer-like receiver
    /// replaces it for this call.
    pub fn call(&self, scope: &Scope<'_>, receiver: &Value, args: &[Value]) -> Result<Value, ScriptError> {
        let target = self.receiver_target(receiver)?;
        self.invoke_at(scope, target, args)
    }

    /// `fn.apply(receiver, argsArrayOrNull)`
    pub fn apply(&self, scope: &Scope<'_>, receiver: &Value, args: &Value) -> Result<Value, ScriptError> {
        let target = self.receiver_target(receiver)?;
        match args {
            Value::Undefined | Value::Null => self.invoke_at(scope, target, &[]),
            Value::Array(items) => self.invoke_at(scope, target, items.as_slice()),
            _ => Err(ScriptError::Expected("an array")),
        }
    }

    fn receiver_target(&self, receiver: &Value) -> Result<NativePointer, ScriptError> {
        if receiver.is_nullish() {
            return Ok(self.address);
        }
        receiver.as_native_pointer().ok_or(ScriptError::InvalidReceiver)
    }

    fn invoke_at(&self, scope: &Scope<'_>, target: NativePointer, args: &[Value]) -> Result<Value, ScriptError> {
        let core = scope.core();
        let plan = self.descriptor.plan(args.len())?;
        if plan.is_extended() {
            core.logger().log(BridgeEvent::DescriptorExtended {
                declared: self.descriptor.nargs(),
                supplied: args.len(),
            });
        }

        let arena = self.descriptor.arena();
        let return_type = self.descriptor.return_type();

        // Slots past the supplied arguments stay zeroed.
        let mut block = ArgBlock::zeroed(plan.layout().size);
        let mut avalues: Vec<*mut c_void> = Vec::with_capacity(plan.types().len());
        for (index, (&ty, &offset)) in plan.types().iter().zip(&plan.layout().offsets).enumerate() {
            let slot = block.slot(offset);
            if let Some(value) = args.get(index) {
                // SAFETY: the block covers every slot of the layout.
                unsafe { write_value(arena, ty, value, slot)? };
            }
            avalues.push(slot as *mut c_void);
        }
        let avalue_ptr = if avalues.is_empty() {
            null_mut()
        } else {
            avalues.as_mut_ptr()
        };

        let mut rvalue = ArgBlock::zeroed(return_slot_size(arena, return_type));
        let rvalue_ptr = rvalue.as_mut_ptr() as *mut c_void;

        // SAFETY: `target` is trusted to be a function of this signature.
        let entry = unsafe { std::mem::transmute::<usize, Option<unsafe extern "C" fn()>>(target.as_usize()) };
        let cif = plan.cif();

        let options = &self.options;
        let steal = options.exceptions == ExceptionBehavior::Steal;
        let cooperative = options.scheduling == Scheduling::Cooperative;
        let detailed = self.shape == ReturnShape::Detailed;
        let interceptor = core.interceptor();
        let tracer = core.tracer();

        let saved_state = steal.then(|| interceptor.save_state());

        // Kept outside the body: a stolen fault abandons the body's frame.
        let mut suspended: Option<SuspendedScope<'_>> = None;
        let mut tracing = false;
        let mut system_error: i32 = -1;

        let mut body = || {
            if cooperative {
                suspended = Some(scope.suspend());
                interceptor.unignore_current_thread();
            }

            if options.traps == CodeTraps::All {
                tracer.process_pending();
                tracer.activate(target);
                tracing = true;
            }

            // SAFETY: cif, argument and return storage all outlive the call.
            unsafe { raw::ffi_call(cif, entry, rvalue_ptr, avalue_ptr) };

            if tracing {
                tracer.deactivate();
                tracing = false;
            }

            if detailed {
                system_error = io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            }
        };

        let outcome: Result<(), NativeException> = if steal {
            core.exceptor().try_call(&mut body)
        } else {
            body();
            Ok(())
        };

        if tracing {
            tracer.deactivate();
        }
        if let Some(suspended) = suspended.take() {
            interceptor.ignore_current_thread();
            suspended.resume();
        }

        if let Err(exception) = outcome {
            if let Some(state) = saved_state {
                interceptor.restore_state(state);
            }
            core.logger().log(BridgeEvent::NativeExceptionStolen {
                target: target.as_usize(),
                description: exception.to_string(),
            });
            return Err(exception.into());
        }

        // SAFETY: the slot was sized by return_slot_size for this type.
        let result = unsafe { read_return(arena, return_type, rvalue.as_mut_ptr()) };

        match self.shape {
            ReturnShape::Plain => Ok(result),
            ReturnShape::Detailed => Ok(Value::object([
                ("value", result),
                (SYSTEM_ERROR_FIELD, Value::Number(f64::from(system_error))),
            ])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Core;

    extern "C" fn add_i32(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    extern "C" fn negate_i8(v: i8) -> i8 {
        v.wrapping_neg()
    }

    fn names(list: &[&str]) -> Vec<Value> {
        list.iter().map(|n| Value::string(n)).collect()
    }

    #[test]
    fn test_options_from_string_is_abi() {
        let options = CallOptions::parse(&Value::string("default"), &CallOptions::default()).unwrap();
        assert_eq!(options.abi.as_deref(), Some("default"));
        assert_eq!(options.scheduling, Scheduling::Cooperative);
    }

    #[test]
    fn test_options_object_keys() {
        let value = Value::object([
            ("scheduling", Value::string("exclusive")),
            ("exceptions", Value::string("propagate")),
            ("traps", Value::string("all")),
        ]);
        let options = CallOptions::parse(&value, &CallOptions::default()).unwrap();
        assert_eq!(options.scheduling, Scheduling::Exclusive);
        assert_eq!(options.exceptions, ExceptionBehavior::Propagate);
        assert_eq!(options.traps, CodeTraps::All);
    }

    #[test]
    fn test_options_errors() {
        let bad = Value::object([("scheduling", Value::string("eager"))]);
        let err = CallOptions::parse(&bad, &CallOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "invalid scheduling behavior value");

        let err = CallOptions::parse(&Value::Number(1.0), &CallOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "expected string or object containing options");
    }

    #[test]
    fn test_invoke_adds() {
        let core = Core::new().unwrap();
        let scope = core.enter();
        let add = NativeFunction::new(
            NativePointer::new(add_i32 as usize),
            &Value::string("int"),
            &names(&["int", "int"]),
            CallOptions::default(),
        )
        .unwrap();
        let result = add.invoke(&scope, &[Value::Number(40.0), Value::Number(2.0)]).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn test_narrow_return_is_sign_extended() {
        let core = Core::new().unwrap();
        let scope = core.enter();
        let negate = NativeFunction::new(
            NativePointer::new(negate_i8 as usize),
            &Value::string("int8"),
            &names(&["int8"]),
            CallOptions::default(),
        )
        .unwrap();
        assert_eq!(negate.invoke(&scope, &[Value::Number(5.0)]).unwrap(), Value::Number(-5.0));
    }

    #[test]
    fn test_wrong_argument_count() {
        let core = Core::new().unwrap();
        let scope = core.enter();
        let add = NativeFunction::new(
            NativePointer::new(add_i32 as usize),
            &Value::string("int"),
            &names(&["int", "int"]),
            CallOptions::default(),
        )
        .unwrap();
        let err = add.invoke(&scope, &[Value::Number(1.0)]).unwrap_err();
        assert!(matches!(err, ScriptError::BadArgumentCount));
    }

    #[test]
    fn test_receiver_must_be_pointer_like() {
        let core = Core::new().unwrap();
        let scope = core.enter();
        let add = NativeFunction::new(
            NativePointer::new(add_i32 as usize),
            &Value::string("int"),
            &names(&["int", "int"]),
            CallOptions::default(),
        )
        .unwrap();
        let err = add
            .call(&scope, &Value::Number(3.0), &[Value::Number(1.0), Value::Number(2.0)])
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidReceiver));
    }
}
