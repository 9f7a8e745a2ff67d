use anyhow::Result;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::state::HostState;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "performance_now", performance_now)?;
    linker.func_wrap(MODULE, "date_now", date_now)?;
    Ok(())
}

fn performance_now(caller: Caller<'_, HostState>) -> f64 {
    caller.data().platform().time().now_ms()
}

fn date_now(caller: Caller<'_, HostState>) -> f64 {
    caller.data().platform().time().unix_ms()
}
