//! Zlib-stream decompression of gateway BINARY frames.
//!
//! Discord sends compressed payloads as a sequence of BINARY websocket
//! frames that, concatenated, form one zlib stream ending in the suffix
//! `00 00 FF FF`. A payload may be split across more than one frame, so
//! bytes are accumulated until the suffix appears before decompression is
//! attempted.

use flate2::{Decompress, DecompressError, FlushDecompress};
use std::time::Instant;

/// Suffix marking the end of a zlib-stream flush, per Discord's
/// documentation.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Initial capacity for the compressed and decompressed buffers.
const INITIAL_BUFFER_SIZE: usize = 32 * 1024;

/// Stateful zlib-stream inflater for one shard's connection.
///
/// A fresh `Inflater` must be created for every new connection; the zlib
/// stream's dictionary is connection-scoped, not payload-scoped.
#[derive(Debug)]
pub struct Inflater {
    decompress: Decompress,
    compressed: Vec<u8>,
    scratch: Vec<u8>,
    buffer: Vec<u8>,
    last_shrink: Instant,
}

impl Inflater {
    /// Create a new inflater, ready to accumulate frames for a fresh
    /// connection.
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
            scratch: Vec::with_capacity(INITIAL_BUFFER_SIZE),
            buffer: Vec::with_capacity(INITIAL_BUFFER_SIZE),
            last_shrink: Instant::now(),
        }
    }

    /// Append the bytes of a received BINARY frame.
    pub fn extend(&mut self, slice: &[u8]) {
        self.compressed.extend_from_slice(slice);
    }

    /// Attempt to decompress the accumulated frames into a complete message.
    ///
    /// Returns `Ok(None)` if the accumulated bytes don't yet end in the
    /// zlib-stream suffix, i.e. the message is still being fragmented across
    /// frames.
    ///
    /// # Errors
    ///
    /// Returns [`DecompressError`] if the accumulated bytes are not a valid
    /// zlib stream continuation.
    pub fn message(&mut self) -> Result<Option<&[u8]>, DecompressError> {
        let length = self.compressed.len();

        if length < 4 || self.compressed[length - 4..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        let before = self.decompress.total_in();
        let mut offset = 0;

        loop {
            self.scratch.clear();

            self.decompress.decompress_vec(
                &self.compressed[offset..],
                &mut self.scratch,
                FlushDecompress::Sync,
            )?;

            offset = (self.decompress.total_in() - before)
                .try_into()
                .unwrap_or_default();
            self.buffer.extend_from_slice(&self.scratch);

            let not_at_capacity = self.scratch.len() < self.scratch.capacity();
            if not_at_capacity || offset > self.compressed.len() {
                break;
            }
        }

        self.compressed.clear();

        Ok(Some(&self.buffer))
    }

    /// Clear the buffers, shrinking them back down if it has been a while
    /// since the last shrink.
    pub fn clear(&mut self) {
        if self.last_shrink.elapsed().as_secs() >= 60 {
            self.compressed.shrink_to_fit();
            self.buffer.shrink_to_fit();
            self.last_shrink = Instant::now();
        }

        self.compressed.clear();
        self.scratch.clear();
        self.buffer.clear();
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Inflater;

    const MESSAGE: &[u8] = &[
        120, 156, 52, 201, 65, 10, 131, 48, 16, 5, 208, 187, 252, 117, 82, 98, 169, 32, 115, 21,
        35, 50, 53, 67, 27, 136, 81, 226, 216, 82, 66, 238, 222, 110, 186, 123, 240, 42, 20, 148,
        207, 148, 12, 142, 63, 182, 29, 212, 57, 131, 0, 170, 120, 10, 23, 189, 11, 235, 28, 179,
        74, 121, 113, 2, 221, 186, 107, 255, 251, 89, 11, 47, 2, 26, 49, 122, 60, 88, 229, 205, 31,
        187, 151, 96, 87, 142, 217, 14, 253, 16, 60, 76, 245, 88, 227, 82, 182, 195, 131, 220, 197,
        181, 9, 83, 107, 95, 0, 0, 0, 255, 255,
    ];
    const OUTPUT: &[u8] = &[
        123, 34, 116, 34, 58, 110, 117, 108, 108, 44, 34, 115, 34, 58, 110, 117, 108, 108, 44, 34,
        111, 112, 34, 58, 49, 48, 44, 34, 100, 34, 58, 123, 34, 104, 101, 97, 114, 116, 98, 101,
        97, 116, 95, 105, 110, 116, 101, 114, 118, 97, 108, 34, 58, 52, 49, 50, 53, 48, 44, 34, 95,
        116, 114, 97, 99, 101, 34, 58, 91, 34, 91, 92, 34, 103, 97, 116, 101, 119, 97, 121, 45,
        112, 114, 100, 45, 109, 97, 105, 110, 45, 56, 53, 56, 100, 92, 34, 44, 123, 92, 34, 109,
        105, 99, 114, 111, 115, 92, 34, 58, 48, 46, 48, 125, 93, 34, 93, 125, 125,
    ];

    #[test]
    fn incomplete_fragment_yields_none() {
        let mut inflater = Inflater::new();
        inflater.extend(&MESSAGE[..MESSAGE.len() - 2]);
        assert!(inflater.message().unwrap().is_none());
    }

    #[test]
    fn complete_message_decompresses() {
        let mut inflater = Inflater::new();
        inflater.extend(MESSAGE);
        assert_eq!(Some(OUTPUT), inflater.message().unwrap());
        assert!(inflater.compressed.is_empty());
    }

    #[test]
    fn clear_empties_every_buffer() {
        let mut inflater = Inflater::new();
        inflater.extend(MESSAGE);
        inflater.message().unwrap();
        inflater.clear();
        assert!(inflater.compressed.is_empty());
        assert!(inflater.buffer.is_empty());
    }
}
