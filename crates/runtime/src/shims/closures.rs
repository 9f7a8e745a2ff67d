use anyhow::{Result, bail};
use boundary::Handle;
use wasmtime::{Caller, Linker};

use crate::closure::{self, ClosureError, ClosureState};
use crate::imports::MODULE;
use crate::memory::write_result;
use crate::state::HostState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "closure_new", closure_new)?;
    linker.func_wrap(MODULE, "closure_drop", closure_drop)?;
    linker.func_wrap(MODULE, "closure_call", closure_call)?;
    Ok(())
}

fn closure_new(
    mut caller: Caller<'_, HostState>,
    a: i32,
    b: i32,
    invoke: i32,
    dtor: i32,
) -> Result<i32> {
    if a == 0 {
        bail!("closure environment pointer is null");
    }
    let closure = ClosureState::new(a as u32, b as u32, invoke as u32, dtor as u32);
    let state = caller.data_mut();
    state.register_closure(closure.clone());
    Ok(state.box_value(HostValue::Closure(closure)).to_abi())
}

/// Returns 1 when the guest should free the environment itself.
fn closure_drop(mut caller: Caller<'_, HostState>, handle: i32) -> Result<i32> {
    let state = caller.data_mut();
    let closure = state.closure(handle)?;
    state.values.release(Handle::from_abi(handle))?;
    Ok(i32::from(closure::release(&closure)?))
}

/// Call a function value from guest code. Recursion and calls after drop are
/// reported through the result slot; traps inside the callee propagate.
fn closure_call(mut caller: Caller<'_, HostState>, function: i32, arg: i32, ret_ptr: i32) -> Result<()> {
    let closure = caller.data().closure(function)?;
    let arg = caller.data().get(arg)?.clone();
    let outcome = match closure::invoke(&mut caller, &closure, arg) {
        Ok(()) => Ok(HostValue::Undefined),
        Err(err) => match err.downcast_ref::<ClosureError>() {
            Some(ClosureError::Reentrant | ClosureError::Dropped) => Err(err),
            _ => return Err(err),
        },
    };
    write_result(&mut caller, ret_ptr, outcome)
}
