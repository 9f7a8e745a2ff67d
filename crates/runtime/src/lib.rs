//! Host side of the guest boundary: a wasmtime store holding the handle
//! table and platform capabilities, the `bridge.*` imports and the loader
//! that brings a guest module up.

mod closure;
pub mod config;
mod error;
pub mod imports;
mod instance;
mod loader;
mod memory;
mod pending;
mod shims;
mod state;
mod streaming;
mod value;

pub use closure::{ClosureError, ClosureState};
pub use config::BridgeConfig;
pub use error::LoadError;
pub use instance::Instance;
pub use loader::{
    CompilePath, FREE_EXPORT, Loader, LoaderState, MALLOC_EXPORT, MEMORY_EXPORT, ModuleSource,
    REALLOC_EXPORT, START_EXPORT, TABLE_EXPORT,
};
pub use memory::ResultSlot;
pub use pending::{PendingOps, Promise, PromiseId, PromiseRef, Settlement};
pub use state::{FALSE, HostState, NULL, ObserverRef, ResizeObserver, TRUE, UNDEFINED};
pub use streaming::StreamingCompiler;
pub use value::{HostError, HostValue, ObserverId};
