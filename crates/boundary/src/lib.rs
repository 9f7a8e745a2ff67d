//! Marshaling primitives for the host side of a wasm interop boundary.
//!
//! Nothing in here knows about a wasm engine. The runtime crate adapts its
//! store and exports to [`GuestHeap`] and drives these types from its shims.

mod codec;
mod error;
mod handle;
mod view;

pub use codec::{GuestHeap, GuestSlice, Utf8Decoder, encode_str};
pub use error::{BoundaryError, Result};
pub use handle::{Handle, HandleTable};
pub use view::{MemoryView, MemoryViews};
