use anyhow::Result;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::{read_str, write_result};
use crate::state::HostState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "clipboard_read", clipboard_read)?;
    linker.func_wrap(MODULE, "clipboard_write", clipboard_write)?;
    Ok(())
}

fn clipboard_read(mut caller: Caller<'_, HostState>, ret_ptr: i32) -> Result<()> {
    let outcome = caller
        .data()
        .platform()
        .clipboard()
        .read_text()
        .map(|text| HostValue::string(text));
    write_result(&mut caller, ret_ptr, outcome)
}

fn clipboard_write(mut caller: Caller<'_, HostState>, ptr: i32, len: i32, ret_ptr: i32) -> Result<()> {
    let text = read_str(&mut caller, ptr, len)?;
    let outcome = caller
        .data()
        .platform()
        .clipboard()
        .write_text(&text)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}
