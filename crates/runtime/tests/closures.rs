mod common;

use common::{ENV_A, ENV_B, ENV_C, RET};
use runtime::UNDEFINED;

#[test]
fn test_closure_call_and_drop() {
    let mut instance = common::instantiate(common::headless());
    let closure: i32 = instance.call("make_closure", (ENV_A, 0)).unwrap();
    let arg: i32 = instance.call("number_new", 5.0f64).unwrap();

    instance
        .call::<(i32, i32, i32), ()>("closure_call", (closure, arg, RET))
        .unwrap();
    assert!(!instance.read_result_slot(RET as u32).unwrap().is_err);
    assert_eq!(common::counter(&mut instance, "calls"), 1);
    assert_eq!(common::last_arg(&mut instance).as_number(), Some(5.0));

    // Idle closure: the guest frees its own environment
    let free_now: i32 = instance.call("closure_drop", closure).unwrap();
    assert_eq!(free_now, 1);
    assert_eq!(common::counter(&mut instance, "dtors"), 0);
}

#[test]
fn test_reentrant_call_is_rejected() {
    let mut instance = common::instantiate(common::headless());
    let closure: i32 = instance.call("make_closure", (ENV_A, 1)).unwrap();

    instance
        .call::<(i32, i32, i32), ()>("closure_call", (closure, UNDEFINED.to_abi(), RET))
        .unwrap();

    // The outer call succeeds, the nested one reports through its slot
    assert!(!instance.read_result_slot(RET as u32).unwrap().is_err);
    assert_eq!(common::counter(&mut instance, "calls"), 1);
    assert_eq!(common::counter(&mut instance, "nested_err"), 1);

    let nested = instance.read_result_slot(512).unwrap();
    let error = instance.value(nested.value).unwrap().as_error().unwrap();
    assert_eq!(error.message, "closure invoked recursively");

    // The guard is lifted once the outer call returns
    instance
        .call::<(i32, i32, i32), ()>("closure_call", (closure, UNDEFINED.to_abi(), RET))
        .unwrap();
    assert_eq!(common::counter(&mut instance, "calls"), 2);
}

#[test]
fn test_drop_during_invocation_defers_destructor() {
    let mut instance = common::instantiate(common::headless());
    let closure: i32 = instance.call("make_closure", (ENV_A, 2)).unwrap();

    instance
        .call::<(i32, i32, i32), ()>("closure_call", (closure, UNDEFINED.to_abi(), RET))
        .unwrap();

    // closure_drop ran inside the call and left cleanup to the host
    assert_eq!(common::counter(&mut instance, "drop_result"), 0);
    assert_eq!(common::counter(&mut instance, "dtors"), 1);
}

#[test]
fn test_dropped_callback_is_skipped() {
    let mut instance = common::instantiate(common::headless());
    let closure: i32 = instance.call("make_closure", (ENV_A, 0)).unwrap();

    instance
        .call::<i32, ()>("queue_microtask", closure)
        .unwrap();
    instance.call::<i32, i32>("closure_drop", closure).unwrap();

    assert_eq!(instance.run_microtasks().unwrap(), 0);
    assert_eq!(common::counter(&mut instance, "calls"), 0);
}

#[test]
fn test_closure_drop_twice_traps() {
    let mut instance = common::instantiate(common::headless());
    let closure: i32 = instance.call("make_closure", (ENV_A, 0)).unwrap();

    instance.call::<i32, i32>("closure_drop", closure).unwrap();
    assert!(instance.call::<i32, i32>("closure_drop", closure).is_err());
}

#[test]
fn test_shutdown_runs_outstanding_destructors() {
    let mut instance = common::instantiate(common::headless());
    let kept_a: i32 = instance.call("make_closure", (ENV_A, 0)).unwrap();
    let _kept_b: i32 = instance.call("make_closure", (ENV_B, 0)).unwrap();
    let dropped: i32 = instance.call("make_closure", (ENV_C, 0)).unwrap();
    instance.call::<i32, i32>("closure_drop", dropped).unwrap();
    assert_ne!(kept_a, dropped);

    assert_eq!(instance.shutdown().unwrap(), 2);
}
