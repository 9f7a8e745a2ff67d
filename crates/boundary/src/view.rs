use crate::error::{BoundaryError, Result};

/// Generation-stamped window over guest linear memory.
///
/// A view does not borrow the memory. Every access takes the current byte
/// slice and checks that it still has the length the view was made for;
/// anything else means the buffer grew or was detached since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryView {
    generation: u64,
    len: usize,
}

impl MemoryView {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes<'m>(&self, memory: &'m [u8]) -> Result<&'m [u8]> {
        self.check(memory.len())?;
        Ok(memory)
    }

    pub fn bytes_mut<'m>(&self, memory: &'m mut [u8]) -> Result<&'m mut [u8]> {
        self.check(memory.len())?;
        Ok(memory)
    }

    pub fn slice<'m>(&self, memory: &'m [u8], ptr: u32, len: u32) -> Result<&'m [u8]> {
        let memory = self.bytes(memory)?;
        let range = range(memory.len(), ptr, len)?;
        Ok(&memory[range])
    }

    pub fn slice_mut<'m>(&self, memory: &'m mut [u8], ptr: u32, len: u32) -> Result<&'m mut [u8]> {
        let memory = self.bytes_mut(memory)?;
        let range = range(memory.len(), ptr, len)?;
        Ok(&mut memory[range])
    }

    pub fn read_i32(&self, memory: &[u8], ptr: u32) -> Result<i32> {
        let bytes = self.slice(memory, ptr, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_i32(&self, memory: &mut [u8], ptr: u32, value: i32) -> Result<()> {
        self.slice_mut(memory, ptr, 4)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_f64(&self, memory: &[u8], ptr: u32) -> Result<f64> {
        let bytes = self.slice(memory, ptr, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn write_f64(&self, memory: &mut [u8], ptr: u32, value: f64) -> Result<()> {
        self.slice_mut(memory, ptr, 8)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn check(&self, current_len: usize) -> Result<()> {
        if current_len != self.len {
            return Err(BoundaryError::StaleView {
                generation: self.generation,
            });
        }
        Ok(())
    }
}

/// Cache of the current [`MemoryView`].
///
/// `refresh` hands out the cached view while the buffer length is unchanged
/// and mints a new generation as soon as it differs. A zero-length buffer is
/// treated as detached and never cached.
#[derive(Debug, Default)]
pub struct MemoryViews {
    current: Option<MemoryView>,
    generation: u64,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&mut self, memory_len: usize) -> MemoryView {
        match self.current {
            Some(view) if view.len == memory_len && memory_len != 0 => view,
            _ => {
                self.generation += 1;
                let view = MemoryView {
                    generation: self.generation,
                    len: memory_len,
                };
                if memory_len != 0 {
                    tracing::trace!(
                        generation = self.generation,
                        len = memory_len,
                        "memory view rebuilt"
                    );
                    self.current = Some(view);
                }
                view
            }
        }
    }

    /// Drop the cached view. Called after (re)instantiation.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Reject views minted before the latest refresh.
    pub fn validate(&self, view: MemoryView) -> Result<()> {
        if view.generation != self.generation {
            return Err(BoundaryError::StaleView {
                generation: view.generation,
            });
        }
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub(crate) fn range(memory_len: usize, ptr: u32, len: u32) -> Result<std::ops::Range<usize>> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize);
    match end {
        Some(end) if end <= memory_len => Ok(start..end),
        _ => Err(BoundaryError::OutOfBounds {
            ptr,
            len,
            memory_len,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_is_cached_until_length_changes() {
        let mut views = MemoryViews::new();
        let first = views.refresh(65536);
        assert_eq!(views.refresh(65536), first);

        let grown = views.refresh(131072);
        assert_ne!(grown.generation(), first.generation());
        assert_eq!(grown.len(), 131072);
        assert!(views.validate(first).is_err());
        assert!(views.validate(grown).is_ok());
    }

    #[test]
    fn view_from_before_growth_rejects_new_buffer() {
        let mut views = MemoryViews::new();
        let mut memory = vec![0u8; 16];
        let before = views.refresh(memory.len());
        before.write_i32(&mut memory, 0, 7).unwrap();

        memory.resize(32, 0);
        assert!(matches!(
            before.read_i32(&memory, 0),
            Err(BoundaryError::StaleView { .. })
        ));

        let after = views.refresh(memory.len());
        assert_eq!(after.read_i32(&memory, 0), Ok(7));
        assert_eq!(after.len(), 32);
    }

    #[test]
    fn detached_buffer_is_never_cached() {
        let mut views = MemoryViews::new();
        let a = views.refresh(0);
        let b = views.refresh(0);
        assert_ne!(a.generation(), b.generation());
        assert!(a.is_empty());
    }

    #[test]
    fn invalidate_forces_a_new_generation() {
        let mut views = MemoryViews::new();
        let first = views.refresh(1024);
        views.invalidate();
        assert_ne!(views.refresh(1024), first);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mut views = MemoryViews::new();
        let memory = vec![0u8; 8];
        let view = views.refresh(memory.len());
        assert_eq!(
            view.slice(&memory, 6, 4),
            Err(BoundaryError::OutOfBounds {
                ptr: 6,
                len: 4,
                memory_len: 8
            })
        );
        assert!(view.slice(&memory, u32::MAX, 2).is_err());
    }

    #[test]
    fn typed_accessors_are_little_endian() {
        let mut views = MemoryViews::new();
        let mut memory = vec![0u8; 16];
        let view = views.refresh(memory.len());
        view.write_i32(&mut memory, 0, 0x0102_0304).unwrap();
        assert_eq!(&memory[..4], &[4, 3, 2, 1]);
        view.write_f64(&mut memory, 8, 1.5).unwrap();
        assert_eq!(view.read_f64(&memory, 8), Ok(1.5));
    }
}
