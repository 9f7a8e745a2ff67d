use std::fmt;

use crate::error::{BoundaryError, Result};

/// Opaque reference the guest holds in place of a host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Guest ABI form. Handles travel as `i32` across the boundary.
    pub const fn to_abi(self) -> i32 {
        self.0 as i32
    }

    pub const fn from_abi(raw: i32) -> Self {
        Self(raw as u32)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

enum Slot<T> {
    Live(T),
    Free { next: Option<u32> },
}

/// Indexed table of host values with free-list reuse.
///
/// The first `reserved` slots hold permanent values; releasing one of them is
/// a no-op. Every other slot is either live or linked into the free list.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    reserved: u32,
    live: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            reserved: 0,
            live: 0,
        }
    }

    /// Build a table whose first slots are the given permanent values.
    pub fn with_reserved(values: impl IntoIterator<Item = T>) -> Self {
        let slots: Vec<Slot<T>> = values.into_iter().map(Slot::Live).collect();
        let reserved = slots.len() as u32;
        Self {
            slots,
            free_head: None,
            reserved,
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.live += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            if let Slot::Free { next } = slot {
                self.free_head = *next;
            }
            *slot = Slot::Live(value);
            return Handle(index);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Live(value));
        Handle(index)
    }

    pub fn get(&self, handle: Handle) -> Result<&T> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Live(value)) => Ok(value),
            _ => Err(BoundaryError::InvalidHandle(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        match self.slots.get_mut(handle.0 as usize) {
            Some(Slot::Live(value)) => Ok(value),
            _ => Err(BoundaryError::InvalidHandle(handle)),
        }
    }

    /// Release a handle and hand back its value.
    ///
    /// Reserved handles stay put and yield `None`.
    pub fn release(&mut self, handle: Handle) -> Result<Option<T>> {
        if self.is_reserved(handle) {
            return Ok(None);
        }
        let index = handle.0 as usize;
        let slot = match self.slots.get_mut(index) {
            Some(slot) => slot,
            None => return Err(BoundaryError::InvalidHandle(handle)),
        };
        if matches!(slot, Slot::Free { .. }) {
            return Err(BoundaryError::DoubleRelease(handle));
        }
        let previous = std::mem::replace(
            slot,
            Slot::Free {
                next: self.free_head,
            },
        );
        self.free_head = Some(handle.0);
        self.live -= 1;
        match previous {
            Slot::Live(value) => Ok(Some(value)),
            Slot::Free { .. } => Ok(None),
        }
    }

    pub fn is_reserved(&self, handle: Handle) -> bool {
        handle.0 < self.reserved
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    /// Live handles, not counting reserved slots.
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

impl<T: Clone> HandleTable<T> {
    /// Read a handle's value and release it in one step.
    pub fn take(&mut self, handle: Handle) -> Result<T> {
        let value = self.get(handle)?.clone();
        self.release(handle)?;
        Ok(value)
    }

    /// Box the value behind `handle` again under a fresh handle.
    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle> {
        let value = self.get(handle)?.clone();
        Ok(self.insert(value))
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
