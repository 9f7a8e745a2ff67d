//! Call-forwarding shims, one module per host capability.
//!
//! A shim resolves its handle and string arguments, makes exactly one
//! platform call and boxes or writes back the result. Platform failures go
//! to the guest through a result slot; bad handles and bad pointers trap.

use anyhow::Result;
use wasmtime::Linker;

use crate::state::HostState;

mod canvas;
mod clipboard;
mod closures;
mod console;
mod dom;
mod fetch;
mod files;
mod intrinsics;
mod resize;
mod storage;
mod time;

pub(crate) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    intrinsics::register(linker)?;
    closures::register(linker)?;
    console::register(linker)?;
    time::register(linker)?;
    storage::register(linker)?;
    clipboard::register(linker)?;
    dom::register(linker)?;
    canvas::register(linker)?;
    fetch::register(linker)?;
    files::register(linker)?;
    resize::register(linker)?;
    Ok(())
}
