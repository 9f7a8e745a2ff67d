use thiserror::Error;

use crate::handle::Handle;

/// Invariant violations at the boundary.
///
/// None of these are recoverable for the guest: the runtime turns them into
/// traps. Host capability failures are reported through result slots instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    #[error("handle {0} released twice")]
    DoubleRelease(Handle),
    #[error("guest range {ptr:#x}+{len} is outside linear memory of {memory_len} bytes")]
    OutOfBounds { ptr: u32, len: u32, memory_len: usize },
    #[error("guest bytes are not valid utf-8 (valid up to {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },
    #[error("memory view from generation {generation} used after the buffer changed")]
    StaleView { generation: u64 },
    #[error("value does not fit in wasm32: {0}")]
    Overflow(&'static str),
    #[error("guest call failed: {0}")]
    Guest(String),
}

pub type Result<T> = std::result::Result<T, BoundaryError>;
