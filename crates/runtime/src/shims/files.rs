use anyhow::Result;
use std::rc::Rc;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::write_str;
use crate::state::HostState;
use crate::value::{HostError, HostValue};

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "file_list", file_list)?;
    linker.func_wrap(MODULE, "file_name", file_name)?;
    linker.func_wrap(MODULE, "file_size", file_size)?;
    linker.func_wrap(MODULE, "file_read", file_read)?;
    Ok(())
}

fn file_list(mut caller: Caller<'_, HostState>) -> i32 {
    let state = caller.data_mut();
    let files = state
        .platform()
        .files()
        .list()
        .into_iter()
        .map(|file| HostValue::File(Rc::new(file)))
        .collect();
    state.box_value(HostValue::array(files)).to_abi()
}

fn file_name(mut caller: Caller<'_, HostState>, file: i32, out_ptr: i32) -> Result<()> {
    let file = caller.data().file(file)?;
    write_str(&mut caller, out_ptr, &file.name)
}

fn file_size(caller: Caller<'_, HostState>, file: i32) -> Result<f64> {
    Ok(caller.data().file(file)?.size as f64)
}

/// Promise for the file contents as bytes.
fn file_read(mut caller: Caller<'_, HostState>, file: i32) -> Result<i32> {
    let state = caller.data_mut();
    let file = state.file(file)?;
    let read = state.platform().files().read(&file.name);
    let promise = state.pending.spawn(async move {
        read.await
            .map(|bytes| HostValue::Bytes(bytes.into()))
            .map_err(|err| HostError::from_anyhow(&err))
    });
    Ok(state.box_value(HostValue::Promise(promise)).to_abi())
}
