//! Timer Tests
//!
//! Timeouts, intervals, cancellation and teardown through the script-facing
//! builtins.

mod common;

use common::harness;
use pretty_assertions::assert_eq;
use hookscript_runtime::{call_binding, BridgeEvent, Core, FlushNotify, Function, ScriptError, Value};
use parking_lot::Mutex;
use rstest::rstest;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn reporter(tx: mpsc::Sender<String>, label: &'static str) -> Value {
    let tx = Mutex::new(tx);
    Value::function(label, move |_, _| {
        let _ = tx.lock().send(label.to_string());
        Ok(Value::Undefined)
    })
}

fn wait_until(core: &Core, condition: impl Fn(&Core) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition(core) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_set_timeout_defaults_to_zero_delay() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    let id = call_binding(&h.core, "setTimeout", &[reporter(tx, "fired")]).unwrap();
    assert_eq!(id, Value::Number(1.0));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "fired");
}

#[test]
fn test_next_tick_runs_before_timers() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    {
        let scope = h.core.enter();
        call_binding(&h.core, "setTimeout", &[reporter(tx.clone(), "timer"), Value::Number(0.0)]).unwrap();
        let tick = reporter(tx, "tick");
        scope.next_tick(tick.as_function().unwrap().clone());
    }
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "tick");
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "timer");
}

#[test]
fn test_interval_repeats_until_cleared() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    let id = call_binding(&h.core, "setInterval", &[reporter(tx, "tick"), Value::Number(1.0)]).unwrap();

    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "tick");
    }
    assert_eq!(h.core.scheduled_count(), 1);

    assert_eq!(call_binding(&h.core, "clearInterval", &[id]).unwrap(), Value::Bool(true));
    assert_eq!(h.core.scheduled_count(), 0);
    assert!(wait_until(&h.core, |core| core.usage_count() == 0));
}

#[test]
fn test_timer_arguments_are_forwarded() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let func = Value::function("sum", move |_, args| {
        let total: f64 = args.iter().filter_map(Value::as_number).sum();
        let _ = tx.lock().send(total);
        Ok(Value::Undefined)
    });
    call_binding(
        &h.core,
        "setTimeout",
        &[func, Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)],
    )
    .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 6.0);
}

#[rstest]
#[case::negative(Value::Number(-5.0))]
#[case::fraction(Value::Number(1.5))]
#[case::string(Value::string("10"))]
fn test_invalid_delay_rejected(#[case] delay: Value) {
    let h = harness();
    let noop = Value::function("noop", |_, _| Ok(Value::Undefined));
    let err = call_binding(&h.core, "setTimeout", &[noop, delay]).unwrap_err();
    assert_eq!(err.to_string(), "expected an unsigned integer");
}

#[test]
fn test_clear_before_attach_releases_pin() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    {
        let scope = h.core.enter();
        let noop = reporter(tx, "never").as_function().unwrap().clone();
        let id = h.core.set_timeout(&scope, noop, 0, Vec::new());
        assert!(h.core.clear_timer(&Value::Number(f64::from(id))));
    }
    assert_eq!(h.core.usage_count(), 0);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    let cancelled = h.logger.matching(|e| matches!(e, BridgeEvent::TimerCancelled { id: 1 }));
    assert_eq!(cancelled.len(), 1);
}

#[test]
fn test_throwing_timer_reports() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    h.core.set_unhandled_exception_callback(Some(Function::new("sink", move |_, args| {
        let _ = tx.lock().send(args[0].to_string());
        Ok(Value::Undefined)
    })));

    let failing = Value::function("failing", |_, _| Err(ScriptError::Thrown(Value::error("late"))));
    call_binding(&h.core, "setTimeout", &[failing, Value::Number(1.0)]).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "Error: late");
}

#[test]
fn test_flush_waits_for_pending_timer() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    {
        let scope = h.core.enter();
        let noop = Function::new("noop", |_, _| Ok(Value::Undefined));
        h.core.set_timeout(&scope, noop, 60_000, Vec::new());
        let notify: FlushNotify = Box::new(move || {
            let _ = tx.send(());
        });
        assert!(!h.core.flush(&scope, Some(notify)));
        assert_eq!(h.core.scheduled_count(), 0);
    }
    assert!(rx.recv_timeout(WAIT).is_ok());
    assert_eq!(h.core.usage_count(), 0);
}

#[test]
fn test_flush_cancels_attached_interval() {
    let h = harness();
    let (fired_tx, fired_rx) = mpsc::channel();
    call_binding(&h.core, "setInterval", &[reporter(fired_tx, "tick"), Value::Number(1.0)]).unwrap();
    fired_rx.recv_timeout(WAIT).unwrap();

    let (tx, rx) = mpsc::channel();
    let completed = {
        let scope = h.core.enter();
        let notify: FlushNotify = Box::new(move || {
            let _ = tx.send(());
        });
        h.core.flush(&scope, Some(notify))
    };
    assert!(!completed);
    assert!(rx.recv_timeout(WAIT).is_ok());

    std::thread::sleep(Duration::from_millis(20));
    while fired_rx.try_recv().is_ok() {}
    assert!(fired_rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_second_flush_completes() {
    let h = harness();
    {
        let scope = h.core.enter();
        let noop = Function::new("noop", |_, _| Ok(Value::Undefined));
        h.core.set_timeout(&scope, noop, 60_000, Vec::new());
        assert!(!h.core.flush(&scope, None));
    }
    {
        let scope = h.core.enter();
        assert!(h.core.flush(&scope, None));
    }
    let completions = h.logger.matching(|e| matches!(e, BridgeEvent::FlushCompleted));
    assert_eq!(completions.len(), 1);
}
