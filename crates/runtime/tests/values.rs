mod common;

use boundary::Handle;
use common::OUT;
use runtime::{HostValue, UNDEFINED};

/// Scratch buffer between the fixed slots and the guest heap.
const SCRATCH: i32 = 700;

fn debug_string(instance: &mut runtime::Instance, handle: i32) -> String {
    instance
        .call::<(i32, i32), ()>("debug_string", (handle, OUT))
        .unwrap();
    common::read_out_string(instance, OUT)
}

fn set(instance: &mut runtime::Instance, object: i32, key: &str, value: i32) {
    let key = instance.pass_string(key).unwrap();
    instance
        .call::<(i32, i32, i32, i32), ()>(
            "object_set",
            (object, key.ptr as i32, key.len as i32, value),
        )
        .unwrap();
}

#[test]
fn test_self_containing_array_renders_as_circular() {
    let mut instance = common::instantiate(common::headless());
    let array: i32 = instance.call("array_new", ()).unwrap();
    let one: i32 = instance.call("number_new", 1.0f64).unwrap();
    instance
        .call::<(i32, i32), ()>("array_push", (array, one))
        .unwrap();
    instance
        .call::<(i32, i32), ()>("array_push", (array, array))
        .unwrap();

    assert_eq!(debug_string(&mut instance, array), "[1, [Circular]]");
    let len: i32 = instance.call("array_len", array).unwrap();
    assert_eq!(len, 2);
}

#[test]
fn test_self_containing_object_renders_opaquely() {
    let mut instance = common::instantiate(common::headless());
    let object: i32 = instance.call("object_new", ()).unwrap();
    set(&mut instance, object, "self", object);

    assert_eq!(debug_string(&mut instance, object), "Object");
    // Still usable after rendering
    let number: i32 = instance.call("number_new", 2.0f64).unwrap();
    assert_eq!(debug_string(&mut instance, number), "2");
}

#[test]
fn test_object_get_and_has() {
    let mut instance = common::instantiate(common::headless());
    let object: i32 = instance.call("object_new", ()).unwrap();
    let width: i32 = instance.call("number_new", 640.0f64).unwrap();
    set(&mut instance, object, "width", width);

    let lookup = |instance: &mut runtime::Instance, import: &str, key: &str| -> i32 {
        let key = instance.pass_string(key).unwrap();
        instance
            .call::<(i32, i32, i32), i32>(import, (object, key.ptr as i32, key.len as i32))
            .unwrap()
    };

    assert_eq!(lookup(&mut instance, "object_has", "width"), 1);
    assert_eq!(lookup(&mut instance, "object_has", "height"), 0);

    let found = lookup(&mut instance, "object_get", "width");
    assert_eq!(
        instance.value(Handle::from_abi(found)).unwrap().as_number(),
        Some(640.0)
    );
    let missing = lookup(&mut instance, "object_get", "height");
    assert_eq!(Handle::from_abi(missing), UNDEFINED);

    assert_eq!(
        debug_string(&mut instance, object),
        r#"Object({"width":640.0})"#
    );
}

#[test]
fn test_bytes_copy_to_truncates_to_buffer() {
    let mut instance = common::instantiate(common::headless());

    // The guest's data segment holds 0xff 0xfe 0xfd at 128
    let bytes: i32 = instance.call("bytes_new", (128, 3)).unwrap();
    let len: i32 = instance.call("bytes_len", bytes).unwrap();
    assert_eq!(len, 3);

    let copied: i32 = instance.call("bytes_copy_to", (bytes, SCRATCH, 2)).unwrap();
    assert_eq!(copied, 2);
    assert_eq!(
        instance.read_bytes(SCRATCH as u32, 3).unwrap(),
        vec![0xff, 0xfe, 0]
    );

    let copied: i32 = instance.call("bytes_copy_to", (bytes, SCRATCH, 64)).unwrap();
    assert_eq!(copied, 3);
    assert_eq!(
        instance.read_bytes(SCRATCH as u32, 3).unwrap(),
        vec![0xff, 0xfe, 0xfd]
    );

    let copied: i32 = instance.call("bytes_copy_to", (bytes, SCRATCH, -1)).unwrap();
    assert_eq!(copied, 0);
}

#[test]
fn test_array_get_out_of_range_is_undefined() {
    let mut instance = common::instantiate(common::headless());
    let array: i32 = instance.call("array_new", ()).unwrap();
    let text = common::host_string(&mut instance, "first");
    instance
        .call::<(i32, i32), ()>("array_push", (array, text))
        .unwrap();

    let first: i32 = instance.call("array_get", (array, 0)).unwrap();
    assert!(matches!(
        instance.value(Handle::from_abi(first)),
        Ok(HostValue::String(text)) if &**text == "first"
    ));
    let past_end: i32 = instance.call("array_get", (array, 5)).unwrap();
    assert_eq!(Handle::from_abi(past_end), UNDEFINED);
}
