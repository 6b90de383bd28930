//! Builtin Dispatch Tests
//!
//! The script-visible surface, driven by name the way a front end would.

mod common;

use common::{address_of, add_i32, harness, harness_with, names};
use pretty_assertions::assert_eq;
use hookscript_runtime::{call_binding, is_binding, BridgeEvent, ByteBuffer, Core, CoreOptions, ScriptError, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn native_add(core: &Core) -> Value {
    call_binding(
        core,
        "NativeFunction",
        &[
            Value::pointer(add_i32 as usize),
            Value::string("int"),
            Value::array(names(&["int", "int"])),
        ],
    )
    .unwrap()
}

#[test]
fn test_names_are_recognized() {
    for name in [
        "setTimeout",
        "clearInterval",
        "_send",
        "_waitForEvent",
        "Script.nextTick",
        "WeakRef.unbind",
        "SystemFunction",
        "NativeFunction.apply",
        "UInt64",
    ] {
        assert!(is_binding(name), "{} should be a builtin", name);
    }
    assert!(!is_binding("eval"));
}

#[test]
fn test_unknown_name_is_thrown() {
    let h = harness();
    let err = call_binding(&h.core, "eval", &[]).unwrap_err();
    assert_eq!(err.to_string(), "Error: eval is not a bridge builtin");
}

#[test]
fn test_native_function_methods() {
    let h = harness();
    let add = native_add(&h.core);
    let two = [Value::Number(2.0), Value::Number(3.0)];

    let invoke_args = [vec![add.clone()], two.to_vec()].concat();
    assert_eq!(call_binding(&h.core, "NativeFunction.invoke", &invoke_args).unwrap(), Value::Number(5.0));

    let call_args = [vec![add.clone(), Value::Null], two.to_vec()].concat();
    assert_eq!(call_binding(&h.core, "NativeFunction.call", &call_args).unwrap(), Value::Number(5.0));

    let apply_args = [add.clone(), Value::Undefined, Value::array(two.to_vec())];
    assert_eq!(call_binding(&h.core, "NativeFunction.apply", &apply_args).unwrap(), Value::Number(5.0));

    // A native function is itself pointer-like.
    assert_eq!(add.as_native_pointer(), Some(address_of(add_i32 as usize)));
}

#[test]
fn test_native_function_method_needs_native_function() {
    let h = harness();
    let err = call_binding(&h.core, "NativeFunction.invoke", &[Value::Number(1.0)]).unwrap_err();
    assert_eq!(err.to_string(), "expected a native function");
}

#[test]
fn test_native_function_constructor_errors() {
    let h = harness();
    let err = call_binding(
        &h.core,
        "NativeFunction",
        &[Value::pointer(1), Value::string("int"), Value::string("int")],
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "expected an array");

    let err = call_binding(
        &h.core,
        "NativeFunction",
        &[
            Value::pointer(1),
            Value::string("int"),
            Value::array(names(&["int"])),
            Value::object([("exceptions", Value::string("swallow"))]),
        ],
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "invalid exceptions behavior value");

    let err = call_binding(
        &h.core,
        "NativeFunction",
        &[Value::pointer(1), Value::string("int"), Value::array(names(&["...", "int"]))],
    )
    .unwrap_err();
    assert!(matches!(err, ScriptError::UnexpectedMarker));
}

#[test]
fn test_instance_defaults_apply_to_new_functions() {
    let mut options = CoreOptions::default();
    options.call_defaults.scheduling = hookscript_runtime::Scheduling::Exclusive;
    let h = harness_with(options);

    let add = native_add(&h.core);
    let Value::NativeFunction(function) = &add else {
        panic!("expected a native function");
    };
    assert_eq!(function.options().scheduling, hookscript_runtime::Scheduling::Exclusive);

    let args = [add.clone(), Value::Number(1.0), Value::Number(1.0)];
    call_binding(&h.core, "NativeFunction.invoke", &args).unwrap();
    assert_eq!(h.interceptor.count("unignore_current_thread"), 0);
}

#[test]
fn test_send_reaches_emitter() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    let core = Core::builder(CoreOptions::default())
        .emitter(Arc::new(move |message: &str, data: Option<&[u8]>| {
            sink.lock().push((message.to_string(), data.map(<[u8]>::to_vec)));
        }))
        .build()
        .unwrap();

    call_binding(&core, "_send", &[Value::string("{\"type\":\"ping\"}")]).unwrap();
    call_binding(
        &core,
        "_send",
        &[Value::string("blob"), Value::Bytes(ByteBuffer::from_vec(vec![1, 2]))],
    )
    .unwrap();

    assert_eq!(
        sent.lock().clone(),
        vec![
            ("{\"type\":\"ping\"}".to_string(), None),
            ("blob".to_string(), Some(vec![1, 2]))
        ]
    );

    let err = call_binding(&core, "_send", &[Value::string("x"), Value::Number(1.0)]).unwrap_err();
    assert_eq!(err.to_string(), "expected an ArrayBuffer");
}

#[test]
fn test_send_commits_pending_interception() {
    let h = harness();
    call_binding(&h.core, "_send", &[Value::string("hello")]).unwrap();
    // One pair for the scope, one pair for the commit.
    assert_eq!(h.interceptor.count("end_transaction"), 2);
    assert_eq!(h.interceptor.count("begin_transaction"), 2);
    let sent = h
        .logger
        .matching(|e| matches!(e, BridgeEvent::MessageSent { length: 5, has_data: false }));
    assert_eq!(sent.len(), 1);
}

#[test]
fn test_incoming_messages_and_wait() {
    let h = harness();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let on_message = Value::function("onMessage", move |_, args| {
        sink.lock().push(args[0].to_string());
        Ok(Value::Undefined)
    });
    call_binding(&h.core, "_setIncomingMessageCallback", &[on_message]).unwrap();

    let poster = h.core.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        poster.post("{\"type\":\"go\"}", None);
    });

    call_binding(&h.core, "_waitForEvent", &[]).unwrap();
    handle.join().unwrap();

    assert_eq!(received.lock().clone(), vec!["{\"type\":\"go\"}".to_string()]);
    assert_eq!(h.core.event_count(), 1);

    call_binding(&h.core, "_setIncomingMessageCallback", &[Value::Null]).unwrap();
    h.core.post("ignored", None);
    assert_eq!(h.core.event_count(), 1);
}

#[test]
fn test_unhandled_exception_sink_binding() {
    let h = harness();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let sink = Value::function("sink", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Undefined)
    });
    call_binding(&h.core, "_setUnhandledExceptionCallback", &[sink]).unwrap();

    let failing = Value::function("failing", |_, _| Err(ScriptError::Thrown(Value::error("tick failed"))));
    call_binding(&h.core, "Script.nextTick", &[failing]).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let err = call_binding(&h.core, "_setUnhandledExceptionCallback", &[Value::Number(1.0)]).unwrap_err();
    assert_eq!(err.to_string(), "expected a function");
}

#[test]
fn test_pin_and_unpin() {
    let h = harness();
    call_binding(&h.core, "Script.pin", &[]).unwrap();
    assert_eq!(h.core.usage_count(), 1);
    call_binding(&h.core, "Script.unpin", &[]).unwrap();
    assert_eq!(h.core.usage_count(), 0);
}

#[test]
fn test_unbalanced_unpin_does_not_block_flush() {
    let h = harness();
    call_binding(&h.core, "Script.unpin", &[]).unwrap();
    call_binding(&h.core, "Script.unpin", &[]).unwrap();
    assert_eq!(h.core.usage_count(), 0);

    let scope = h.core.enter();
    assert!(h.core.flush(&scope, None));
}

#[test]
fn test_system_function_binding() {
    let h = harness();
    let getpid = call_binding(
        &h.core,
        "SystemFunction",
        &[Value::pointer(libc::getpid as usize), Value::string("int"), Value::array(Vec::new())],
    )
    .unwrap();
    let record = call_binding(&h.core, "NativeFunction.invoke", &[getpid]).unwrap();
    let record = record.as_object().unwrap();
    assert_eq!(record.get("value"), Some(Value::Number(f64::from(std::process::id()))));
    assert!(record.has(hookscript_runtime::ffi::caller::SYSTEM_ERROR_FIELD));
}
