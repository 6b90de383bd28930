//! Native Exception Tests
//!
//! Faults raised by native callees: stolen into script errors, or left to
//! take the process down.

mod common;

use common::{address_of, harness, names, read_byte};
use pretty_assertions::assert_eq;
use hookscript_runtime::{CallOptions, ExceptionKind, NativeFunction, NativePointer, ScriptError, Value};

fn reader(exceptions: &str) -> NativeFunction {
    let options = CallOptions::parse(
        &Value::object([("exceptions", Value::string(exceptions))]),
        &CallOptions::default(),
    )
    .unwrap();
    NativeFunction::new(
        address_of(read_byte as usize),
        &Value::string("uint8"),
        &names(&["pointer"]),
        options,
    )
    .unwrap()
}

#[test]
fn test_readable_address_is_unaffected() {
    let h = harness();
    let scope = h.core.enter();
    let byte = [0xabu8];
    let result = reader("steal")
        .invoke(&scope, &[Value::Pointer(NativePointer::from_ptr(byte.as_ptr()))])
        .unwrap();
    assert_eq!(result, Value::Number(171.0));
    assert_eq!(h.interceptor.count("restore_state"), 0);
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
mod guarded {
    use super::*;
    use pretty_assertions::assert_eq;
    use hookscript_runtime::{BridgeEvent, MemoryOperation};
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    const CHILD_ENV: &str = "HOOKSCRIPT_FAULT_CHILD";

    #[test]
    fn test_stolen_fault_becomes_script_error() {
        let h = harness();
        let scope = h.core.enter();
        let err = reader("steal").invoke(&scope, &[Value::pointer(0x10)]).unwrap_err();

        let ScriptError::NativeException(exception) = &err else {
            panic!("expected a native exception, got {:?}", err);
        };
        assert_eq!(exception.kind, ExceptionKind::AccessViolation);
        assert_eq!(exception.address, NativePointer::new(0x10));
        assert_eq!(exception.memory_operation, Some(MemoryOperation::Read));
        assert_eq!(err.to_string(), "access violation accessing 0x10");

        let value = err.to_value();
        let object = value.as_object().unwrap();
        assert_eq!(object.get("type"), Some(Value::string("access-violation")));
        assert_eq!(object.get("address"), Some(Value::pointer(0x10)));
    }

    #[test]
    fn test_stolen_fault_restores_engine_state() {
        let h = harness();
        let scope = h.core.enter();
        let _ = reader("steal").invoke(&scope, &[Value::pointer(0x10)]);

        assert_eq!(h.core.depth(), 1);
        assert_eq!(h.interceptor.count("save_state"), 1);
        assert_eq!(h.interceptor.count("restore_state"), 1);
        // Suspended for the call and resumed after the fault.
        assert_eq!(h.interceptor.count("ignore_current_thread"), 1);

        // The thread keeps working afterwards.
        let byte = [7u8];
        let ok = reader("steal")
            .invoke(&scope, &[Value::Pointer(NativePointer::from_ptr(byte.as_ptr()))])
            .unwrap();
        assert_eq!(ok, Value::Number(7.0));
        drop(scope);

        let stolen = h
            .logger
            .matching(|e| matches!(e, BridgeEvent::NativeExceptionStolen { target, .. } if *target == read_byte as usize));
        assert_eq!(stolen.len(), 1);
    }

    #[test]
    fn test_exclusive_fault_keeps_lock() {
        let h = harness();
        let scope = h.core.enter();
        let options = CallOptions::parse(
            &Value::object([("scheduling", Value::string("exclusive"))]),
            &CallOptions::default(),
        )
        .unwrap();
        let exclusive = NativeFunction::new(
            address_of(read_byte as usize),
            &Value::string("uint8"),
            &names(&["pointer"]),
            options,
        )
        .unwrap();

        assert!(exclusive.invoke(&scope, &[Value::pointer(0x10)]).is_err());
        assert_eq!(h.core.depth(), 1);
        assert_eq!(h.interceptor.count("unignore_current_thread"), 0);
    }

    #[test]
    fn test_traps_are_deactivated_after_fault() {
        let h = harness();
        let scope = h.core.enter();
        let options = CallOptions::parse(&Value::object([("traps", Value::string("all"))]), &CallOptions::default())
            .unwrap();
        let traced = NativeFunction::new(
            address_of(read_byte as usize),
            &Value::string("uint8"),
            &names(&["pointer"]),
            options,
        )
        .unwrap();

        assert!(traced.invoke(&scope, &[Value::pointer(0x10)]).is_err());
        let events = h.tracer.events();
        assert_eq!(events.last().map(String::as_str), Some("deactivate"));
    }

    /// Body of the propagate check; only faults when run as the child
    #[test]
    fn test_propagate_child() {
        if std::env::var_os(CHILD_ENV).is_none() {
            return;
        }
        let h = harness();
        let scope = h.core.enter();
        let _ = reader("propagate").invoke(&scope, &[Value::pointer(0x10)]);
    }

    #[test]
    fn test_propagated_fault_kills_process() {
        let exe = std::env::current_exe().unwrap();
        let status = Command::new(exe)
            .args(["--exact", "guarded::test_propagate_child", "--test-threads", "1"])
            .env(CHILD_ENV, "1")
            .output()
            .unwrap()
            .status;

        assert!(!status.success());
        assert!(status.signal().is_some());
    }
}
