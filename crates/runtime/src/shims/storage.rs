use anyhow::Result;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::{read_str, write_result};
use crate::state::HostState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "storage_get", storage_get)?;
    linker.func_wrap(MODULE, "storage_set", storage_set)?;
    linker.func_wrap(MODULE, "storage_remove", storage_remove)?;
    Ok(())
}

/// Missing keys resolve to `null`.
fn storage_get(mut caller: Caller<'_, HostState>, key_ptr: i32, key_len: i32, ret_ptr: i32) -> Result<()> {
    let key = read_str(&mut caller, key_ptr, key_len)?;
    let outcome = caller
        .data()
        .platform()
        .storage()
        .get_item(&key)
        .map(|value| value.map_or(HostValue::Null, |value| HostValue::string(value)));
    write_result(&mut caller, ret_ptr, outcome)
}

fn storage_set(
    mut caller: Caller<'_, HostState>,
    key_ptr: i32,
    key_len: i32,
    value_ptr: i32,
    value_len: i32,
    ret_ptr: i32,
) -> Result<()> {
    let key = read_str(&mut caller, key_ptr, key_len)?;
    let value = read_str(&mut caller, value_ptr, value_len)?;
    let outcome = caller
        .data()
        .platform()
        .storage()
        .set_item(&key, &value)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}

fn storage_remove(mut caller: Caller<'_, HostState>, key_ptr: i32, key_len: i32, ret_ptr: i32) -> Result<()> {
    let key = read_str(&mut caller, key_ptr, key_len)?;
    let outcome = caller
        .data()
        .platform()
        .storage()
        .remove_item(&key)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}
