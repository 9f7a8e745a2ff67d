//! UTF-8 marshaling between host strings and guest linear memory.

use crate::error::{BoundaryError, Result};
use crate::view::range;

/// Guest-side allocator and memory as seen from a host call.
///
/// `memory` must return the current buffer on every call: `malloc` and
/// `realloc` run guest code, which may grow it.
pub trait GuestHeap {
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32>;
    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32>;
    fn memory(&mut self) -> &mut [u8];
}

/// `(ptr, len)` pair naming bytes the guest now owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuestSlice {
    pub ptr: u32,
    pub len: u32,
}

/// Copy `value` into freshly allocated guest memory.
///
/// The first allocation is sized by char count, which is exact for ASCII.
/// The ASCII prefix is copied byte by byte; at the first wider char the block
/// is reallocated to the full UTF-8 length and the rest is copied in one go.
pub fn encode_str(heap: &mut dyn GuestHeap, value: &str) -> Result<GuestSlice> {
    if value.is_empty() {
        return Ok(GuestSlice::default());
    }
    let chars = value.chars().count();
    let char_len = u32::try_from(chars).map_err(|_| BoundaryError::Overflow("string length"))?;
    let byte_len =
        u32::try_from(value.len()).map_err(|_| BoundaryError::Overflow("string length"))?;

    let mut ptr = heap.malloc(char_len, 1)?;
    let bytes = value.as_bytes();
    let ascii = bytes.iter().take_while(|byte| byte.is_ascii()).count();
    {
        let target = guest_range(heap.memory(), ptr, ascii as u32)?;
        target.copy_from_slice(&bytes[..ascii]);
    }

    if ascii < bytes.len() {
        ptr = heap.realloc(ptr, char_len, byte_len, 1)?;
        let rest = &bytes[ascii..];
        let tail = ptr
            .checked_add(ascii as u32)
            .ok_or(BoundaryError::Overflow("guest pointer"))?;
        let target = guest_range(heap.memory(), tail, rest.len() as u32)?;
        target.copy_from_slice(rest);
    }

    Ok(GuestSlice { ptr, len: byte_len })
}

fn guest_range(memory: &mut [u8], ptr: u32, len: u32) -> Result<&mut [u8]> {
    let range = range(memory.len(), ptr, len)?;
    Ok(&mut memory[range])
}

/// Strict UTF-8 reader for guest byte ranges.
///
/// Keeps a running total of decoded bytes. With a reset threshold configured,
/// crossing it discards the decoder state and restarts the count at the
/// length of the current read.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    decoded: u64,
    reset_after: Option<u64>,
    resets: u64,
}

impl Utf8Decoder {
    pub fn new(reset_after: Option<u64>) -> Self {
        Self {
            decoded: 0,
            reset_after,
            resets: 0,
        }
    }

    pub fn decode<'m>(&mut self, memory: &'m [u8], ptr: u32, len: u32) -> Result<&'m str> {
        let range = range(memory.len(), ptr, len)?;
        self.account(len);
        std::str::from_utf8(&memory[range]).map_err(|err| BoundaryError::InvalidUtf8 {
            valid_up_to: err.valid_up_to(),
        })
    }

    fn account(&mut self, len: u32) {
        self.decoded = self.decoded.saturating_add(u64::from(len));
        if let Some(limit) = self.reset_after {
            if self.decoded >= limit {
                self.resets += 1;
                self.decoded = u64::from(len);
                tracing::debug!(resets = self.resets, "utf-8 decoder reset");
            }
        }
    }

    pub fn decoded_bytes(&self) -> u64 {
        self.decoded
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bump allocator over a `Vec`, growing the "linear memory" on demand.
    struct VecHeap {
        memory: Vec<u8>,
        top: u32,
        reallocs: usize,
    }

    impl VecHeap {
        fn new() -> Self {
            Self {
                memory: vec![0; 8],
                top: 8,
                reallocs: 0,
            }
        }
    }

    impl GuestHeap for VecHeap {
        fn malloc(&mut self, size: u32, _align: u32) -> Result<u32> {
            let ptr = self.top;
            self.top += size;
            if self.memory.len() < self.top as usize {
                self.memory.resize(self.top as usize * 2, 0);
            }
            Ok(ptr)
        }

        fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32> {
            self.reallocs += 1;
            let new_ptr = self.malloc(new_size, align)?;
            let keep = old_size.min(new_size) as usize;
            self.memory
                .copy_within(ptr as usize..ptr as usize + keep, new_ptr as usize);
            Ok(new_ptr)
        }

        fn memory(&mut self) -> &mut [u8] {
            &mut self.memory
        }
    }

    fn round_trip(value: &str) -> String {
        let mut heap = VecHeap::new();
        let slice = encode_str(&mut heap, value).unwrap();
        let mut decoder = Utf8Decoder::default();
        decoder
            .decode(&heap.memory, slice.ptr, slice.len)
            .unwrap()
            .to_string()
    }

    #[test]
    fn ascii_round_trips_without_realloc() {
        let mut heap = VecHeap::new();
        let slice = encode_str(&mut heap, "hello bridge").unwrap();
        assert_eq!(slice.len, 12);
        assert_eq!(heap.reallocs, 0);
        assert_eq!(round_trip("hello bridge"), "hello bridge");
    }

    #[test]
    fn multibyte_text_round_trips() {
        for text in ["héllo", "日本語のテキスト", "mixed ascii then ümlaut", "🦀 crab", "ß"] {
            assert_eq!(round_trip(text), text);
        }
    }

    #[test]
    fn non_ascii_triggers_one_realloc_to_exact_length() {
        let mut heap = VecHeap::new();
        let slice = encode_str(&mut heap, "ab€").unwrap();
        assert_eq!(heap.reallocs, 1);
        assert_eq!(slice.len, 5);
        assert_eq!(&heap.memory[slice.ptr as usize..][..5], "ab€".as_bytes());
    }

    /// Reallocates to a pointer at the very top of the address space.
    struct HighRealloc(VecHeap);

    impl GuestHeap for HighRealloc {
        fn malloc(&mut self, size: u32, align: u32) -> Result<u32> {
            self.0.malloc(size, align)
        }

        fn realloc(&mut self, _ptr: u32, _old: u32, _new: u32, _align: u32) -> Result<u32> {
            Ok(u32::MAX - 1)
        }

        fn memory(&mut self) -> &mut [u8] {
            self.0.memory()
        }
    }

    #[test]
    fn realloc_near_address_limit_overflows() {
        let mut heap = HighRealloc(VecHeap::new());
        assert_eq!(
            encode_str(&mut heap, "abc€"),
            Err(BoundaryError::Overflow("guest pointer"))
        );
    }

    #[test]
    fn empty_string_allocates_nothing() {
        let mut heap = VecHeap::new();
        assert_eq!(encode_str(&mut heap, "").unwrap(), GuestSlice::default());
        assert_eq!(heap.top, 8);
    }

    #[test]
    fn invalid_utf8_fails_instead_of_replacing() {
        let memory = [b'o', b'k', 0xff, 0xfe];
        let mut decoder = Utf8Decoder::default();
        assert_eq!(
            decoder.decode(&memory, 0, 4),
            Err(BoundaryError::InvalidUtf8 { valid_up_to: 2 })
        );
        assert_eq!(decoder.decode(&memory, 0, 2), Ok("ok"));
    }

    #[test]
    fn truncated_sequence_fails() {
        let euro = "€".as_bytes();
        let mut decoder = Utf8Decoder::default();
        assert!(decoder.decode(euro, 0, 2).is_err());
    }

    #[test]
    fn decode_rejects_out_of_range() {
        let mut decoder = Utf8Decoder::default();
        assert!(matches!(
            decoder.decode(b"abc", 2, 5),
            Err(BoundaryError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn decoder_resets_after_threshold() {
        let memory = [b'x'; 10];
        let mut decoder = Utf8Decoder::new(Some(16));
        decoder.decode(&memory, 0, 10).unwrap();
        assert_eq!(decoder.resets(), 0);
        decoder.decode(&memory, 0, 8).unwrap();
        assert_eq!(decoder.resets(), 1);
        assert_eq!(decoder.decoded_bytes(), 8);
    }

    #[test]
    fn decoder_without_threshold_only_counts() {
        let memory = [b'x'; 4];
        let mut decoder = Utf8Decoder::new(None);
        for _ in 0..3 {
            decoder.decode(&memory, 0, 4).unwrap();
        }
        assert_eq!(decoder.decoded_bytes(), 12);
        assert_eq!(decoder.resets(), 0);
    }
}
