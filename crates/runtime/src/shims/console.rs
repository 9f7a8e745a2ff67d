use anyhow::Result;
use platform::LogLevel;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::read_str;
use crate::state::HostState;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "console_log", console_log)?;
    Ok(())
}

fn console_log(mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32) -> Result<()> {
    let message = read_str(&mut caller, ptr, len)?;
    caller
        .data()
        .platform()
        .console()
        .log(LogLevel::from_abi(level), &message);
    Ok(())
}
