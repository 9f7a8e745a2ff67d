use anyhow::{Result, bail};
use boundary::Handle;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::{
    abi_len, read_bytes, read_str, write_bytes, write_f64, write_i32, write_i32_pair, write_str,
};
use crate::state::HostState;
use crate::value::{HostError, HostValue};

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "object_drop_ref", object_drop_ref)?;
    linker.func_wrap(MODULE, "object_clone_ref", object_clone_ref)?;
    linker.func_wrap(MODULE, "is_undefined", is_undefined)?;
    linker.func_wrap(MODULE, "is_null", is_null)?;
    linker.func_wrap(MODULE, "is_function", is_function)?;
    linker.func_wrap(MODULE, "is_object", is_object)?;
    linker.func_wrap(MODULE, "string_new", string_new)?;
    linker.func_wrap(MODULE, "string_get", string_get)?;
    linker.func_wrap(MODULE, "number_new", number_new)?;
    linker.func_wrap(MODULE, "number_get", number_get)?;
    linker.func_wrap(MODULE, "boolean_get", boolean_get)?;
    linker.func_wrap(MODULE, "bytes_new", bytes_new)?;
    linker.func_wrap(MODULE, "bytes_len", bytes_len)?;
    linker.func_wrap(MODULE, "bytes_copy_to", bytes_copy_to)?;
    linker.func_wrap(MODULE, "array_new", array_new)?;
    linker.func_wrap(MODULE, "array_push", array_push)?;
    linker.func_wrap(MODULE, "array_len", array_len)?;
    linker.func_wrap(MODULE, "array_get", array_get)?;
    linker.func_wrap(MODULE, "object_new", object_new)?;
    linker.func_wrap(MODULE, "object_set", object_set)?;
    linker.func_wrap(MODULE, "object_get", object_get)?;
    linker.func_wrap(MODULE, "object_has", object_has)?;
    linker.func_wrap(MODULE, "error_new", error_new)?;
    linker.func_wrap(MODULE, "debug_string", debug_string)?;
    linker.func_wrap(MODULE, "throw", throw)?;
    Ok(())
}

fn boxed(caller: &mut Caller<'_, HostState>, value: HostValue) -> i32 {
    caller.data_mut().box_value(value).to_abi()
}

fn object_drop_ref(mut caller: Caller<'_, HostState>, handle: i32) -> Result<()> {
    let state = caller.data_mut();
    let released = state.values.release(Handle::from_abi(handle))?;
    if let Some(HostValue::Observer(observer)) = released {
        drop(observer);
        state.prune_observers();
    }
    Ok(())
}

fn object_clone_ref(mut caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    let values = &mut caller.data_mut().values;
    let handle = Handle::from_abi(handle);
    if values.is_reserved(handle) {
        return Ok(handle.to_abi());
    }
    Ok(values.clone_ref(handle)?.to_abi())
}

fn is_undefined(caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    Ok(i32::from(matches!(
        caller.data().get(handle)?,
        HostValue::Undefined
    )))
}

fn is_null(caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    Ok(i32::from(matches!(caller.data().get(handle)?, HostValue::Null)))
}

fn is_function(caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    Ok(i32::from(caller.data().get(handle)?.is_function()))
}

fn is_object(caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    Ok(i32::from(caller.data().get(handle)?.is_object()))
}

fn string_new(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<i32> {
    let text = read_str(&mut caller, ptr, len)?;
    Ok(boxed(&mut caller, HostValue::string(text)))
}

/// Writes `(ptr, len)` and returns 1 for strings; writes `(0, 0)` and
/// returns 0 for anything else.
fn string_get(mut caller: Caller<'_, HostState>, handle: i32, out_ptr: i32) -> Result<i32> {
    let text = caller.data().get(handle)?.as_str().map(str::to_owned);
    match text {
        Some(text) => {
            write_str(&mut caller, out_ptr, &text)?;
            Ok(1)
        }
        None => {
            write_i32_pair(&mut caller, out_ptr, 0, 0)?;
            Ok(0)
        }
    }
}

fn number_new(mut caller: Caller<'_, HostState>, value: f64) -> i32 {
    boxed(&mut caller, HostValue::Number(value))
}

/// `Option<f64>` out slot: presence flag at `out_ptr`, value at `out_ptr + 8`.
fn number_get(mut caller: Caller<'_, HostState>, handle: i32, out_ptr: i32) -> Result<()> {
    let number = caller.data().get(handle)?.as_number();
    write_i32(&mut caller, out_ptr, i32::from(number.is_some()))?;
    write_f64(&mut caller, out_ptr.wrapping_add(8), number.unwrap_or(0.0))
}

/// 1 or 0 for booleans, 2 for anything else.
fn boolean_get(caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    Ok(match caller.data().get(handle)? {
        HostValue::Bool(value) => i32::from(*value),
        _ => 2,
    })
}

fn bytes_new(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<i32> {
    let bytes = read_bytes(&mut caller, ptr, len)?;
    Ok(boxed(&mut caller, HostValue::Bytes(bytes.into())))
}

fn bytes_len(caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    abi_len(caller.data().bytes(handle)?.len())
}

/// Copy up to `len` bytes into the guest buffer; returns the count copied.
fn bytes_copy_to(mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, len: i32) -> Result<i32> {
    let bytes = caller.data().bytes(handle)?;
    let count = usize::try_from(len).unwrap_or(0).min(bytes.len());
    write_bytes(&mut caller, ptr, &bytes[..count])?;
    abi_len(count)
}

fn array_new(mut caller: Caller<'_, HostState>) -> i32 {
    boxed(&mut caller, HostValue::array(Vec::new()))
}

fn array_push(caller: Caller<'_, HostState>, array: i32, value: i32) -> Result<()> {
    let state = caller.data();
    let items = state.array(array)?;
    let value = state.get(value)?.clone();
    items.borrow_mut().push(value);
    Ok(())
}

fn array_len(caller: Caller<'_, HostState>, array: i32) -> Result<i32> {
    abi_len(caller.data().array(array)?.borrow().len())
}

/// Out-of-range reads give `undefined`.
fn array_get(mut caller: Caller<'_, HostState>, array: i32, index: i32) -> Result<i32> {
    let items = caller.data().array(array)?;
    let value = usize::try_from(index)
        .ok()
        .and_then(|index| items.borrow().get(index).cloned())
        .unwrap_or(HostValue::Undefined);
    Ok(boxed(&mut caller, value))
}

fn object_new(mut caller: Caller<'_, HostState>) -> i32 {
    boxed(&mut caller, HostValue::object([]))
}

fn object_set(
    mut caller: Caller<'_, HostState>,
    object: i32,
    key_ptr: i32,
    key_len: i32,
    value: i32,
) -> Result<()> {
    let key = read_str(&mut caller, key_ptr, key_len)?;
    let state = caller.data();
    let value = state.get(value)?.clone();
    match state.get(object)? {
        HostValue::Object(entries) => {
            entries.borrow_mut().insert(key, value);
            Ok(())
        }
        _ => bail!("handle {} is not a plain object", Handle::from_abi(object)),
    }
}

fn object_get(mut caller: Caller<'_, HostState>, object: i32, key_ptr: i32, key_len: i32) -> Result<i32> {
    let key = read_str(&mut caller, key_ptr, key_len)?;
    let value = caller
        .data()
        .get(object)?
        .property(&key)
        .unwrap_or(HostValue::Undefined);
    Ok(boxed(&mut caller, value))
}

fn object_has(mut caller: Caller<'_, HostState>, object: i32, key_ptr: i32, key_len: i32) -> Result<i32> {
    let key = read_str(&mut caller, key_ptr, key_len)?;
    Ok(i32::from(caller.data().get(object)?.property(&key).is_some()))
}

fn error_new(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<i32> {
    let message = read_str(&mut caller, ptr, len)?;
    Ok(boxed(&mut caller, HostValue::error(HostError::new("Error", message))))
}

fn debug_string(mut caller: Caller<'_, HostState>, handle: i32, out_ptr: i32) -> Result<()> {
    let text = {
        let state = caller.data();
        state.get(handle)?.debug_string(state.platform().document())
    };
    write_str(&mut caller, out_ptr, &text)
}

/// Guest-requested abort; the message becomes the trap reason.
fn throw(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<()> {
    let message = read_str(&mut caller, ptr, len)?;
    bail!("{message}")
}
