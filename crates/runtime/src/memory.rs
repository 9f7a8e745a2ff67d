//! Guest memory access for shims and the instance.
//!
//! Every helper resolves the memory export from the store, refreshes the
//! view cache and goes through the checked [`MemoryView`] accessors, so a
//! stale pointer or a grown buffer turns into an error instead of a bad read.

use anyhow::Result;
use boundary::{BoundaryError, GuestHeap, GuestSlice, Handle, MemoryView, encode_str};
use wasmtime::AsContextMut;

use crate::state::{GuestExports, HostState};
use crate::value::{HostError, HostValue};

/// Two-word slot `{ value, is_err }` written by every fallible import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultSlot {
    pub value: Handle,
    pub is_err: bool,
}

impl ResultSlot {
    pub const SIZE: u32 = 8;

    pub fn read(view: MemoryView, memory: &[u8], ptr: u32) -> boundary::Result<Self> {
        let value = view.read_i32(memory, ptr)?;
        let is_err = view.read_i32(memory, ptr.wrapping_add(4))?;
        Ok(Self {
            value: Handle::from_abi(value),
            is_err: is_err != 0,
        })
    }

    fn write(self, view: MemoryView, memory: &mut [u8], ptr: u32) -> boundary::Result<()> {
        view.write_i32(memory, ptr, self.value.to_abi())?;
        view.write_i32(memory, ptr.wrapping_add(4), i32::from(self.is_err))
    }
}

/// [`GuestHeap`] over a store: allocation calls back into the guest.
pub(crate) struct StoreHeap<'a, S> {
    store: &'a mut S,
    exports: GuestExports,
}

impl<'a, S: AsContextMut<Data = HostState>> StoreHeap<'a, S> {
    pub fn new(store: &'a mut S) -> Result<Self> {
        let exports = store.as_context().data().exports()?.clone();
        Ok(Self { store, exports })
    }
}

impl<S: AsContextMut<Data = HostState>> GuestHeap for StoreHeap<'_, S> {
    fn malloc(&mut self, size: u32, align: u32) -> boundary::Result<u32> {
        self.exports
            .malloc
            .call(&mut *self.store, (size as i32, align as i32))
            .map(|ptr| ptr as u32)
            .map_err(|err| BoundaryError::Guest(format!("{err:#}")))
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> boundary::Result<u32> {
        self.exports
            .realloc
            .call(
                &mut *self.store,
                (ptr as i32, old_size as i32, new_size as i32, align as i32),
            )
            .map(|ptr| ptr as u32)
            .map_err(|err| BoundaryError::Guest(format!("{err:#}")))
    }

    fn memory(&mut self) -> &mut [u8] {
        self.exports.memory.data_mut(&mut *self.store)
    }
}

/// Run `f` against the current view of guest memory.
pub(crate) fn with_view<S, T>(
    store: &mut S,
    f: impl FnOnce(MemoryView, &mut [u8]) -> boundary::Result<T>,
) -> Result<T>
where
    S: AsContextMut<Data = HostState>,
{
    let memory = store.as_context().data().exports()?.memory;
    let (data, state) = memory.data_and_store_mut(&mut *store);
    let view = state.views.refresh(data.len());
    Ok(f(view, data)?)
}

/// Decode `len` bytes at `ptr` as strict UTF-8.
pub(crate) fn read_str<S>(store: &mut S, ptr: i32, len: i32) -> Result<String>
where
    S: AsContextMut<Data = HostState>,
{
    let memory = store.as_context().data().exports()?.memory;
    let (data, state) = memory.data_and_store_mut(&mut *store);
    let view = state.views.refresh(data.len());
    let text = state.decoder.decode(view.bytes(data)?, ptr as u32, len as u32)?;
    Ok(text.to_owned())
}

pub(crate) fn read_bytes<S>(store: &mut S, ptr: i32, len: i32) -> Result<Vec<u8>>
where
    S: AsContextMut<Data = HostState>,
{
    with_view(store, |view, data| {
        view.slice(data, ptr as u32, len as u32).map(<[u8]>::to_vec)
    })
}

pub(crate) fn write_bytes<S>(store: &mut S, ptr: i32, bytes: &[u8]) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    let len = u32::try_from(bytes.len()).map_err(|_| BoundaryError::Overflow("byte length"))?;
    with_view(store, |view, data| {
        view.slice_mut(data, ptr as u32, len)?.copy_from_slice(bytes);
        Ok(())
    })
}

pub(crate) fn write_i32<S>(store: &mut S, ptr: i32, value: i32) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    with_view(store, |view, data| view.write_i32(data, ptr as u32, value))
}

pub(crate) fn write_i32_pair<S>(store: &mut S, ptr: i32, first: i32, second: i32) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    with_view(store, |view, data| {
        view.write_i32(data, ptr as u32, first)?;
        view.write_i32(data, (ptr as u32).wrapping_add(4), second)
    })
}

pub(crate) fn write_f64<S>(store: &mut S, ptr: i32, value: f64) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    with_view(store, |view, data| view.write_f64(data, ptr as u32, value))
}

/// Lengths and counts as the guest sees them.
pub(crate) fn abi_len(len: usize) -> Result<i32> {
    Ok(i32::try_from(len).map_err(|_| BoundaryError::Overflow("length"))?)
}

/// Copy `text` into guest-allocated memory.
pub(crate) fn pass_str<S>(store: &mut S, text: &str) -> Result<GuestSlice>
where
    S: AsContextMut<Data = HostState>,
{
    let mut heap = StoreHeap::new(store)?;
    Ok(encode_str(&mut heap, text)?)
}

/// Copy `text` into the guest and write `(ptr, len)` at `out_ptr`.
pub(crate) fn write_str<S>(store: &mut S, out_ptr: i32, text: &str) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    let slice = pass_str(store, text)?;
    write_i32_pair(store, out_ptr, slice.ptr as i32, slice.len as i32)
}

/// Fill a result slot: the boxed value on success, the boxed error with
/// `is_err` set on failure.
pub(crate) fn write_result<S>(store: &mut S, ret_ptr: i32, outcome: Result<HostValue>) -> Result<()>
where
    S: AsContextMut<Data = HostState>,
{
    let (value, is_err) = match outcome {
        Ok(value) => (value, false),
        Err(err) => {
            tracing::debug!("host call failed: {err:#}");
            (HostValue::error(HostError::from_anyhow(&err)), true)
        }
    };
    let value = store.as_context_mut().data_mut().box_value(value);
    with_view(store, |view, data| {
        ResultSlot { value, is_err }.write(view, data, ret_ptr as u32)
    })
}
