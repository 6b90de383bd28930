//! Script-visible builtins
//!
//! A scripting front end resolves global names through [`is_binding`] and
//! dispatches calls through [`call_binding`]. Every binding runs inside an
//! engine scope; argument errors come back as `ScriptError`s for the front
//! end to throw.

use crate::eventlog::BridgeEvent;
use crate::ffi::callbacks::NativeCallback;
use crate::ffi::caller::{CallOptions, NativeFunction};
use crate::ffi::int64::{Int64, UInt64};
use crate::ffi::pointer::NativePointer;
use crate::script::Core;
use crate::value::{Function, ScriptError, Value};
use std::sync::Arc;

static UNDEFINED: Value = Value::Undefined;

/// Check if a name is a bridge builtin
pub fn is_binding(name: &str) -> bool {
    matches!(
        name,
        // Timers
        "setTimeout" | "setInterval" | "clearTimeout" | "clearInterval"
            // Messaging and events
            | "_waitForEvent" | "_send"
            | "_setUnhandledExceptionCallback" | "_setIncomingMessageCallback"
            // Script lifecycle
            | "Script.nextTick" | "Script.pin" | "Script.unpin"
            | "WeakRef.bind" | "WeakRef.unbind"
            // Native calls
            | "NativeFunction" | "SystemFunction" | "NativeCallback"
            | "NativeFunction.invoke" | "NativeFunction.call" | "NativeFunction.apply"
            // Wrappers
            | "NativePointer" | "Int64" | "UInt64"
    )
}

/// Call a bridge builtin by name
pub fn call_binding(core: &Core, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let scope = core.enter();

    match name {
        "setTimeout" => {
            let func = function_arg(args, 0)?;
            let delay = match arg(args, 1) {
                Value::Undefined => 0,
                value => delay_arg(value)?,
            };
            let id = core.set_timeout(&scope, func, delay, rest(args, 2));
            Ok(Value::Number(f64::from(id)))
        }
        "setInterval" => {
            let func = function_arg(args, 0)?;
            let delay = delay_arg(arg(args, 1))?;
            let id = core.set_interval(&scope, func, delay, rest(args, 2));
            Ok(Value::Number(f64::from(id)))
        }
        "clearTimeout" | "clearInterval" => Ok(Value::Bool(core.clear_timer(arg(args, 0)))),

        "_waitForEvent" => {
            core.wait_for_event(&scope)?;
            Ok(Value::Undefined)
        }
        "_send" => {
            let message = arg(args, 0).as_str().ok_or(ScriptError::Expected("a string"))?;
            match arg(args, 1) {
                Value::Undefined | Value::Null => core.send(message, None),
                Value::Bytes(data) => core.send(message, Some(data.as_slice())),
                _ => return Err(ScriptError::Expected("an ArrayBuffer")),
            }
            Ok(Value::Undefined)
        }
        "_setUnhandledExceptionCallback" => {
            core.set_unhandled_exception_callback(optional_function_arg(args, 0)?);
            Ok(Value::Undefined)
        }
        "_setIncomingMessageCallback" => {
            core.set_incoming_message_callback(optional_function_arg(args, 0)?);
            Ok(Value::Undefined)
        }

        "Script.nextTick" => {
            scope.next_tick(function_arg(args, 0)?);
            Ok(Value::Undefined)
        }
        "Script.pin" => {
            core.pin();
            Ok(Value::Undefined)
        }
        "Script.unpin" => {
            core.unpin();
            Ok(Value::Undefined)
        }
        "WeakRef.bind" => {
            let id = core.weak_ref_bind(arg(args, 0), function_arg(args, 1)?)?;
            Ok(Value::Number(f64::from(id)))
        }
        "WeakRef.unbind" => {
            let id = delay_arg(arg(args, 0))?;
            let id = u32::try_from(id).map_err(|_| ScriptError::Expected("an unsigned integer"))?;
            Ok(Value::Bool(core.weak_ref_unbind(id)))
        }

        "NativeFunction" | "SystemFunction" => {
            let address = pointer_arg(args, 0)?;
            let argument_types = array_arg(args, 2)?;
            let options = CallOptions::parse(arg(args, 3), core.call_defaults())?;
            let function = if name == "SystemFunction" {
                NativeFunction::system(address, arg(args, 1), argument_types, options)?
            } else {
                NativeFunction::new(address, arg(args, 1), argument_types, options)?
            };
            core.logger().log(BridgeEvent::DescriptorBuilt {
                arguments: function.descriptor().nargs(),
                variadic: function.descriptor().is_variadic(),
            });
            Ok(Value::NativeFunction(Arc::new(function)))
        }
        "NativeCallback" => {
            let func = function_arg(args, 0)?;
            let argument_types = array_arg(args, 2)?;
            let abi = match arg(args, 3) {
                Value::Undefined => None,
                value => Some(value.as_str().ok_or(ScriptError::Expected("a string"))?),
            };
            let callback = NativeCallback::new(core, func, arg(args, 1), argument_types, abi)?;
            Ok(Value::NativeCallback(Arc::new(callback)))
        }
        "NativeFunction.invoke" => native_function_arg(args)?.invoke(&scope, rest_slice(args, 1)),
        "NativeFunction.call" => native_function_arg(args)?.call(&scope, arg(args, 1), rest_slice(args, 2)),
        "NativeFunction.apply" => native_function_arg(args)?.apply(&scope, arg(args, 1), arg(args, 2)),

        "NativePointer" => Ok(Value::Pointer(NativePointer::parse(arg(args, 0))?)),
        "Int64" => Ok(Value::Int64(Int64::parse(arg(args, 0))?)),
        "UInt64" => Ok(Value::UInt64(UInt64::parse(arg(args, 0))?)),

        _ => Err(ScriptError::Thrown(Value::error(format!("{} is not a bridge builtin", name)))),
    }
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&UNDEFINED)
}

fn rest_slice(args: &[Value], from: usize) -> &[Value] {
    args.get(from..).unwrap_or(&[])
}

fn rest(args: &[Value], from: usize) -> Vec<Value> {
    rest_slice(args, from).to_vec()
}

fn function_arg(args: &[Value], index: usize) -> Result<Function, ScriptError> {
    arg(args, index)
        .as_function()
        .cloned()
        .ok_or(ScriptError::Expected("a function"))
}

/// A function, or null to clear
fn optional_function_arg(args: &[Value], index: usize) -> Result<Option<Function>, ScriptError> {
    match arg(args, index) {
        Value::Null => Ok(None),
        _ => function_arg(args, index).map(Some),
    }
}

fn pointer_arg(args: &[Value], index: usize) -> Result<NativePointer, ScriptError> {
    arg(args, index)
        .as_native_pointer()
        .ok_or(ScriptError::Expected("a pointer"))
}

fn array_arg(args: &[Value], index: usize) -> Result<&[Value], ScriptError> {
    arg(args, index).as_array().ok_or(ScriptError::Expected("an array"))
}

fn native_function_arg(args: &[Value]) -> Result<&NativeFunction, ScriptError> {
    match arg(args, 0) {
        Value::NativeFunction(function) => Ok(function),
        _ => Err(ScriptError::Expected("a native function")),
    }
}

fn delay_arg(value: &Value) -> Result<u64, ScriptError> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64 => Ok(*n as u64),
        _ => Err(ScriptError::Expected("an unsigned integer")),
    }
}
