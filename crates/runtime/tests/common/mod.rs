#![allow(dead_code)]

use boundary::Handle;
use platform_headless::HeadlessPlatform;
use runtime::{BridgeConfig, HostValue, Instance, Loader};
use std::sync::Arc;
use wasmtime::Module;

/// Result slot used by tests that call fallible imports directly.
pub const RET: i32 = 64;
/// `(ptr, len)` out slot.
pub const OUT: i32 = 96;
/// Closure environments; each holds the closure's own handle.
pub const ENV_A: i32 = 256;
pub const ENV_B: i32 = 264;
pub const ENV_C: i32 = 272;

/// Guest with a bump allocator, two closure table entries and a few
/// counters. Imports the tests drive directly are re-exported as is.
///
/// The invoke trampoline records its `b` and argument. With `b == 1` it
/// calls itself through `closure_call`; with `b == 2` it drops itself.
pub const GUEST: &str = r#"(module
    (import "bridge" "string_new" (func $string_new (param i32 i32) (result i32)))
    (import "bridge" "string_get" (func $string_get (param i32 i32) (result i32)))
    (import "bridge" "number_new" (func $number_new (param f64) (result i32)))
    (import "bridge" "object_drop_ref" (func $object_drop_ref (param i32)))
    (import "bridge" "debug_string" (func $debug_string (param i32 i32)))
    (import "bridge" "storage_get" (func $storage_get (param i32 i32 i32)))
    (import "bridge" "storage_set" (func $storage_set (param i32 i32 i32 i32 i32)))
    (import "bridge" "closure_new" (func $closure_new (param i32 i32 i32 i32) (result i32)))
    (import "bridge" "closure_drop" (func $closure_drop (param i32) (result i32)))
    (import "bridge" "closure_call" (func $closure_call (param i32 i32 i32)))
    (import "bridge" "fetch" (func $fetch (param i32) (result i32)))
    (import "bridge" "promise_then" (func $promise_then (param i32 i32 i32)))
    (import "bridge" "request_animation_frame" (func $request_animation_frame (param i32) (result i32)))
    (import "bridge" "cancel_animation_frame" (func $cancel_animation_frame (param i32)))
    (import "bridge" "queue_microtask" (func $queue_microtask (param i32)))
    (import "bridge" "document_body" (func $document_body (result i32)))
    (import "bridge" "resize_observer_new" (func $resize_observer_new (param i32) (result i32)))
    (import "bridge" "resize_observer_observe" (func $resize_observer_observe (param i32 i32)))
    (import "bridge" "canvas_resize" (func $canvas_resize (param i32 i32 i32)))
    (import "bridge" "array_new" (func $array_new (result i32)))
    (import "bridge" "array_push" (func $array_push (param i32 i32)))
    (import "bridge" "array_len" (func $array_len (param i32) (result i32)))
    (import "bridge" "array_get" (func $array_get (param i32 i32) (result i32)))
    (import "bridge" "object_new" (func $object_new (result i32)))
    (import "bridge" "object_set" (func $object_set (param i32 i32 i32 i32)))
    (import "bridge" "object_get" (func $object_get (param i32 i32 i32) (result i32)))
    (import "bridge" "object_has" (func $object_has (param i32 i32 i32) (result i32)))
    (import "bridge" "bytes_new" (func $bytes_new (param i32 i32) (result i32)))
    (import "bridge" "bytes_len" (func $bytes_len (param i32) (result i32)))
    (import "bridge" "bytes_copy_to" (func $bytes_copy_to (param i32 i32 i32) (result i32)))
    (import "bridge" "request_new" (func $request_new (param i32 i32 i32 i32 i32)))
    (import "bridge" "request_set_header" (func $request_set_header (param i32 i32 i32 i32 i32)))
    (import "bridge" "request_set_body" (func $request_set_body (param i32 i32)))
    (import "bridge" "response_status" (func $response_status (param i32) (result i32)))
    (import "bridge" "response_header" (func $response_header (param i32 i32 i32 i32) (result i32)))
    (import "bridge" "response_bytes" (func $response_bytes (param i32) (result i32)))
    (import "bridge" "file_list" (func $file_list (result i32)))
    (import "bridge" "file_name" (func $file_name (param i32 i32)))
    (import "bridge" "file_read" (func $file_read (param i32) (result i32)))
    (import "bridge" "clipboard_read" (func $clipboard_read (param i32)))
    (import "bridge" "clipboard_write" (func $clipboard_write (param i32 i32 i32)))
    (import "bridge" "canvas_read_pixels" (func $canvas_read_pixels (param i32 i32 i32 i32 i32)))
    (import "bridge" "create_element" (func $create_element (param i32 i32 i32)))
    (import "bridge" "set_attribute" (func $set_attribute (param i32 i32 i32 i32 i32 i32)))
    (import "bridge" "get_attribute" (func $get_attribute (param i32 i32 i32 i32)))
    (import "bridge" "set_inner_text" (func $set_inner_text (param i32 i32 i32 i32)))
    (import "bridge" "element_width" (func $element_width (param i32 i32)))
    (import "bridge" "element_height" (func $element_height (param i32 i32)))
    (import "bridge" "resize_observer_disconnect" (func $resize_observer_disconnect (param i32)))

    (export "string_new" (func $string_new))
    (export "string_get" (func $string_get))
    (export "number_new" (func $number_new))
    (export "object_drop_ref" (func $object_drop_ref))
    (export "debug_string" (func $debug_string))
    (export "storage_get" (func $storage_get))
    (export "storage_set" (func $storage_set))
    (export "closure_drop" (func $closure_drop))
    (export "closure_call" (func $closure_call))
    (export "fetch" (func $fetch))
    (export "promise_then" (func $promise_then))
    (export "request_animation_frame" (func $request_animation_frame))
    (export "cancel_animation_frame" (func $cancel_animation_frame))
    (export "queue_microtask" (func $queue_microtask))
    (export "document_body" (func $document_body))
    (export "resize_observer_new" (func $resize_observer_new))
    (export "resize_observer_observe" (func $resize_observer_observe))
    (export "canvas_resize" (func $canvas_resize))
    (export "array_new" (func $array_new))
    (export "array_push" (func $array_push))
    (export "array_len" (func $array_len))
    (export "array_get" (func $array_get))
    (export "object_new" (func $object_new))
    (export "object_set" (func $object_set))
    (export "object_get" (func $object_get))
    (export "object_has" (func $object_has))
    (export "bytes_new" (func $bytes_new))
    (export "bytes_len" (func $bytes_len))
    (export "bytes_copy_to" (func $bytes_copy_to))
    (export "request_new" (func $request_new))
    (export "request_set_header" (func $request_set_header))
    (export "request_set_body" (func $request_set_body))
    (export "response_status" (func $response_status))
    (export "response_header" (func $response_header))
    (export "response_bytes" (func $response_bytes))
    (export "file_list" (func $file_list))
    (export "file_name" (func $file_name))
    (export "file_read" (func $file_read))
    (export "clipboard_read" (func $clipboard_read))
    (export "clipboard_write" (func $clipboard_write))
    (export "canvas_read_pixels" (func $canvas_read_pixels))
    (export "create_element" (func $create_element))
    (export "set_attribute" (func $set_attribute))
    (export "get_attribute" (func $get_attribute))
    (export "set_inner_text" (func $set_inner_text))
    (export "element_width" (func $element_width))
    (export "element_height" (func $element_height))
    (export "resize_observer_disconnect" (func $resize_observer_disconnect))

    (memory (export "memory") 1)
    (table (export "__indirect_function_table") 3 funcref)
    (elem (i32.const 1) $invoke $dtor)
    (data (i32.const 128) "\ff\fe\fd")

    (global $heap (mut i32) (i32.const 1024))
    (global $started (mut i32) (i32.const 0))
    (global $calls (mut i32) (i32.const 0))
    (global $last_arg (mut i32) (i32.const 0))
    (global $last_b (mut i32) (i32.const 0))
    (global $dtors (mut i32) (i32.const 0))
    (global $frees (mut i32) (i32.const 0))
    (global $nested_err (mut i32) (i32.const -1))
    (global $drop_result (mut i32) (i32.const -1))

    (func $malloc (export "bridge_malloc") (param $size i32) (param $align i32) (result i32)
        (local $ptr i32)
        (local.set $ptr
            (i32.and
                (i32.sub (i32.add (global.get $heap) (local.get $align)) (i32.const 1))
                (i32.sub (i32.const 0) (local.get $align))))
        (global.set $heap (i32.add (local.get $ptr) (local.get $size)))
        (local.get $ptr))

    (func (export "bridge_realloc") (param $ptr i32) (param $old i32) (param $new i32) (param $align i32) (result i32)
        (local $dst i32)
        (local.set $dst (call $malloc (local.get $new) (local.get $align)))
        (memory.copy
            (local.get $dst)
            (local.get $ptr)
            (select (local.get $old) (local.get $new) (i32.lt_u (local.get $old) (local.get $new))))
        (local.get $dst))

    (func (export "bridge_free") (param i32 i32 i32)
        (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

    (func (export "bridge_start")
        (global.set $started (i32.add (global.get $started) (i32.const 1))))

    (func $invoke (param $a i32) (param $b i32) (param $arg i32)
        (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
        (global.set $last_arg (local.get $arg))
        (global.set $last_b (local.get $b))
        (if (i32.eq (local.get $b) (i32.const 1))
            (then
                (call $closure_call (i32.load (local.get $a)) (local.get $arg) (i32.const 512))
                (global.set $nested_err (i32.load (i32.const 516)))))
        (if (i32.eq (local.get $b) (i32.const 2))
            (then
                (global.set $drop_result (call $closure_drop (i32.load (local.get $a)))))))

    (func $dtor (param $a i32) (param $b i32)
        (global.set $dtors (i32.add (global.get $dtors) (i32.const 1))))

    (func (export "make_closure") (param $env i32) (param $b i32) (result i32)
        (local $handle i32)
        (local.set $handle
            (call $closure_new (local.get $env) (local.get $b) (i32.const 1) (i32.const 2)))
        (i32.store (local.get $env) (local.get $handle))
        (local.get $handle))

    (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0)))
    (func (export "started") (result i32) (global.get $started))
    (func (export "calls") (result i32) (global.get $calls))
    (func (export "last_arg") (result i32) (global.get $last_arg))
    (func (export "last_b") (result i32) (global.get $last_b))
    (func (export "dtors") (result i32) (global.get $dtors))
    (func (export "frees") (result i32) (global.get $frees))
    (func (export "nested_err") (result i32) (global.get $nested_err))
    (func (export "drop_result") (result i32) (global.get $drop_result)))"#;

pub fn guest_wasm() -> Vec<u8> {
    wat::parse_str(GUEST).unwrap()
}

pub fn headless() -> Arc<HeadlessPlatform> {
    Arc::new(HeadlessPlatform::new())
}

pub fn instantiate(platform: Arc<HeadlessPlatform>) -> Instance {
    instantiate_with(platform, BridgeConfig::default())
}

pub fn instantiate_with(platform: Arc<HeadlessPlatform>, config: BridgeConfig) -> Instance {
    let mut loader = Loader::new(config, platform);
    let module = Module::new(loader.engine(), guest_wasm()).unwrap();
    loader.init_sync(&module).unwrap()
}

pub fn counter(instance: &mut Instance, name: &str) -> i32 {
    instance.call::<(), i32>(name, ()).unwrap()
}

/// The value the last closure invocation received.
pub fn last_arg(instance: &mut Instance) -> HostValue {
    let handle = counter(instance, "last_arg");
    instance.value(Handle::from_abi(handle)).unwrap().clone()
}

/// Box `text` as a host string through the guest.
pub fn host_string(instance: &mut Instance, text: &str) -> i32 {
    let slice = instance.pass_string(text).unwrap();
    instance
        .call("string_new", (slice.ptr as i32, slice.len as i32))
        .unwrap()
}

/// Read the `(ptr, len)` pair at `out` and decode the string it names.
pub fn read_out_string(instance: &mut Instance, out: i32) -> String {
    let pair = instance.read_bytes(out as u32, 8).unwrap();
    instance
        .read_string(
            u32::from_le_bytes(pair[..4].try_into().unwrap()),
            u32::from_le_bytes(pair[4..].try_into().unwrap()),
        )
        .unwrap()
}

/// The value in the result slot at `RET`, and whether it is an error.
pub fn result(instance: &mut Instance) -> (HostValue, bool) {
    let slot = instance.read_result_slot(RET as u32).unwrap();
    (instance.value(slot.value).unwrap().clone(), slot.is_err)
}

/// Name of the error in the result slot at `RET`.
pub fn error_name(instance: &mut Instance) -> String {
    let (value, is_err) = result(instance);
    assert!(is_err, "expected an error, got {value:?}");
    value.as_error().unwrap().name.clone()
}
