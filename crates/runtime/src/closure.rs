//! Guest closures handed to the host as callbacks.
//!
//! The guest registers a closure as an environment pair `(a, b)` plus two
//! entries in its function table: an invoke trampoline `(a, b, arg)` and a
//! destructor `(a, b)`. The host keeps one shared [`ClosureState`] per
//! closure and counts the guest's reference plus every invocation in flight.

use anyhow::{Result, anyhow};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use wasmtime::{AsContextMut, Func, Ref};

use crate::state::HostState;
use crate::value::HostValue;

pub type ClosureRef = Rc<RefCell<ClosureState>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClosureError {
    #[error("closure invoked recursively")]
    Reentrant,
    #[error("closure invoked after being dropped")]
    Dropped,
    #[error("closure dropped twice")]
    AlreadyReleased,
    #[error("function table slot {0} is empty")]
    MissingEntry(u32),
}

#[derive(Debug)]
pub struct ClosureState {
    /// Environment pointer; zero while an invocation is running.
    a: u32,
    b: u32,
    invoke: u32,
    dtor: u32,
    refs: u32,
    released: bool,
    destroyed: bool,
}

impl ClosureState {
    pub(crate) fn new(a: u32, b: u32, invoke: u32, dtor: u32) -> ClosureRef {
        Rc::new(RefCell::new(Self {
            a,
            b,
            invoke,
            dtor,
            refs: 1,
            released: false,
            destroyed: false,
        }))
    }

    pub fn is_running(&self) -> bool {
        self.a == 0 && !self.destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }
}

/// A closure invocation waiting on the event loop.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub callback: ClosureRef,
    pub arg: HostValue,
}

/// Drop the guest's reference.
///
/// Returns `true` when that was the last reference: the guest frees its
/// environment itself. With an invocation still running the host runs the
/// destructor once that invocation returns.
pub(crate) fn release(closure: &ClosureRef) -> Result<bool, ClosureError> {
    let mut state = closure.borrow_mut();
    if state.released {
        return Err(ClosureError::AlreadyReleased);
    }
    state.released = true;
    state.refs -= 1;
    if state.refs == 0 {
        state.a = 0;
        state.destroyed = true;
        return Ok(true);
    }
    Ok(false)
}

/// Call the closure with `arg`, which the guest receives as a fresh handle.
pub(crate) fn invoke<S>(store: &mut S, closure: &ClosureRef, arg: HostValue) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    let (a, b, invoke_index) = {
        let mut state = closure.borrow_mut();
        if state.destroyed {
            return Err(ClosureError::Dropped.into());
        }
        if state.a == 0 {
            return Err(ClosureError::Reentrant.into());
        }
        state.refs += 1;
        let a = state.a;
        state.a = 0;
        (a, state.b, state.invoke)
    };

    let arg = store.as_context_mut().data_mut().box_value(arg);
    let outcome = table_func(store, invoke_index).and_then(|func| {
        let func = func.typed::<(i32, i32, i32), ()>(&*store)?;
        func.call(&mut *store, (a as i32, b as i32, arg.to_abi()))
    });

    let finished = {
        let mut state = closure.borrow_mut();
        state.refs -= 1;
        if state.refs == 0 {
            state.destroyed = true;
            Some(state.dtor)
        } else {
            state.a = a;
            None
        }
    };
    if let Some(dtor) = finished {
        tracing::debug!("closure released during its own invocation, running destructor");
        call_dtor(store, dtor, a, b)?;
    }
    outcome
}

/// Run the destructor of a closure the guest never dropped.
pub(crate) fn destroy<S>(store: &mut S, closure: &ClosureRef) -> Result<bool>
where
    S: AsContextMut<Data = HostState>,
{
    let (a, b, dtor) = {
        let mut state = closure.borrow_mut();
        if state.destroyed || state.a == 0 {
            return Ok(false);
        }
        state.destroyed = true;
        state.refs = 0;
        let a = state.a;
        state.a = 0;
        (a, state.b, state.dtor)
    };
    call_dtor(store, dtor, a, b)?;
    Ok(true)
}

fn call_dtor<S>(store: &mut S, dtor: u32, a: u32, b: u32) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    let func = table_func(store, dtor)?.typed::<(i32, i32), ()>(&*store)?;
    func.call(&mut *store, (a as i32, b as i32))
}

fn table_func<S>(store: &mut S, index: u32) -> Result<Func>
where
    S: AsContextMut<Data = HostState>,
{
    let table = store
        .as_context()
        .data()
        .exports()?
        .table
        .ok_or_else(|| anyhow!("guest does not export a function table"))?;
    match table.get(&mut *store, index.into()) {
        Some(Ref::Func(Some(func))) => Ok(func),
        _ => Err(ClosureError::MissingEntry(index).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_of_idle_closure_hands_env_back() {
        let closure = ClosureState::new(8, 0, 1, 2);
        assert_eq!(release(&closure), Ok(true));
        assert!(closure.borrow().is_destroyed());
        assert_eq!(release(&closure), Err(ClosureError::AlreadyReleased));
    }

    #[test]
    fn release_during_invocation_defers_destruction() {
        let closure = ClosureState::new(8, 0, 1, 2);
        {
            let mut state = closure.borrow_mut();
            state.refs += 1;
            state.a = 0;
        }
        assert!(closure.borrow().is_running());
        assert_eq!(release(&closure), Ok(false));
        assert!(!closure.borrow().is_destroyed());
        assert_eq!(closure.borrow().refs(), 1);
    }
}
