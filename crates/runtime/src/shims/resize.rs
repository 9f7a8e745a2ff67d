use anyhow::Result;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::state::HostState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "resize_observer_new", resize_observer_new)?;
    linker.func_wrap(MODULE, "resize_observer_observe", resize_observer_observe)?;
    linker.func_wrap(MODULE, "resize_observer_disconnect", resize_observer_disconnect)?;
    Ok(())
}

fn resize_observer_new(mut caller: Caller<'_, HostState>, callback: i32) -> Result<i32> {
    let state = caller.data_mut();
    let callback = state.closure(callback)?;
    let observer = state.new_observer(callback);
    Ok(state.box_value(HostValue::Observer(observer)).to_abi())
}

/// Observing an element twice is a no-op. The first frame after observing
/// always reports the current size.
fn resize_observer_observe(mut caller: Caller<'_, HostState>, observer: i32, element: i32) -> Result<()> {
    let state = caller.data_mut();
    let observer = state.observer(observer)?;
    let element = state.element(element)?;
    {
        let mut targets = observer.targets.borrow_mut();
        if !targets.iter().any(|(target, _)| *target == element) {
            targets.push((element, None));
        }
    }
    state.connect_observer(&observer);
    Ok(())
}

fn resize_observer_disconnect(mut caller: Caller<'_, HostState>, observer: i32) -> Result<()> {
    let state = caller.data_mut();
    let observer = state.observer(observer)?;
    state.disconnect_observer(&observer);
    Ok(())
}
