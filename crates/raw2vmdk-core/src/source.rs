//! Raw-image input sources.
//!
//! File-backed images are memory-mapped; arbitrary byte streams (standard
//! input) are read through [`GrainReader`], which carves any `Read` into
//! full, zero-padded grains.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::vmdk::geometry::GRAIN_SIZE_BYTES;

/// A memory-mapped raw disk image.
pub struct RawImageReader {
    /// The memory-mapped file data. Empty files cannot be mapped and carry
    /// no data.
    mmap: Option<Mmap>,
    /// The size of the file in bytes.
    size: u64,
}

impl RawImageReader {
    /// Opens a raw image file and memory-maps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let size = file.metadata().map_err(|e| Error::io(e, path))?.len();

        let mmap = if size == 0 {
            None
        } else {
            // Safety: read-only mapping of a file we just opened; the
            // mapping lives no longer than this struct.
            Some(unsafe { Mmap::map(&file).map_err(|e| Error::io(e, path))? })
        };

        Ok(Self { mmap, size })
    }

    /// Returns the image size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the raw image bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

/// Reads grain-sized blocks from an input stream of declared length.
///
/// The final grain is zero-padded when the input is not a grain multiple. An
/// input that ends before the declared length is an input error; bytes past
/// the declared length are never read.
pub struct GrainReader<R: Read> {
    inner: R,
    /// Input bytes still expected from `inner`.
    remaining: u64,
}

impl<R: Read> GrainReader<R> {
    /// Creates a reader that will consume exactly `input_len` bytes.
    pub fn new(inner: R, input_len: u64) -> Self {
        Self {
            inner,
            remaining: input_len,
        }
    }

    /// Input bytes not yet consumed.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reads the next grain into `buf`, zero-padding the tail.
    ///
    /// Returns `false` once the declared input is exhausted; `buf` is then
    /// left fully zeroed.
    pub fn read_grain(&mut self, buf: &mut [u8]) -> Result<bool> {
        debug_assert_eq!(buf.len() as u64, GRAIN_SIZE_BYTES);
        buf.fill(0);
        if self.remaining == 0 {
            return Ok(false);
        }

        let want = self.remaining.min(GRAIN_SIZE_BYTES) as usize;
        let mut filled = 0;
        while filled < want {
            let n = self
                .inner
                .read(&mut buf[filled..want])
                .map_err(Error::io_simple)?;
            if n == 0 {
                return Err(Error::input(format!(
                    "input ended {} bytes short of the declared length",
                    self.remaining - filled as u64
                )));
            }
            filled += n;
        }
        self.remaining -= want as u64;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const GRAIN: usize = GRAIN_SIZE_BYTES as usize;

    #[test]
    fn test_open_and_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xAAu8; 1024]).unwrap();
        file.flush().unwrap();

        let reader = RawImageReader::open(file.path()).unwrap();
        assert_eq!(reader.size(), 1024);
        assert_eq!(reader.data().len(), 1024);
        assert!(reader.data().iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_grain_reader_exact_multiple() {
        let input = vec![7u8; 2 * GRAIN];
        let mut reader = GrainReader::new(&input[..], input.len() as u64);
        let mut buf = vec![0u8; GRAIN];

        assert!(reader.read_grain(&mut buf).unwrap());
        assert!(buf.iter().all(|&b| b == 7));
        assert!(reader.read_grain(&mut buf).unwrap());
        assert!(!reader.read_grain(&mut buf).unwrap());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_grain_reader_pads_tail() {
        let input = vec![9u8; 100];
        let mut reader = GrainReader::new(&input[..], 100);
        let mut buf = vec![0xFFu8; GRAIN];

        assert!(reader.read_grain(&mut buf).unwrap());
        assert!(buf[..100].iter().all(|&b| b == 9));
        assert!(buf[100..].iter().all(|&b| b == 0));
        assert!(!reader.read_grain(&mut buf).unwrap());
    }

    #[test]
    fn test_grain_reader_one_byte_input() {
        let input = [0xEEu8];
        let mut reader = GrainReader::new(&input[..], 1);
        let mut buf = vec![0u8; GRAIN];

        assert!(reader.read_grain(&mut buf).unwrap());
        assert_eq!(buf[0], 0xEE);
        assert!(buf[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_grain_reader_undersized_input_errors() {
        let input = vec![1u8; 100];
        let mut reader = GrainReader::new(&input[..], 5000);
        let mut buf = vec![0u8; GRAIN];

        let err = reader.read_grain(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Input { .. }));
    }

    #[test]
    fn test_grain_reader_ignores_bytes_past_declared_length() {
        let input = vec![3u8; 2 * GRAIN];
        let mut reader = GrainReader::new(&input[..], 10);
        let mut buf = vec![0u8; GRAIN];

        assert!(reader.read_grain(&mut buf).unwrap());
        assert!(buf[..10].iter().all(|&b| b == 3));
        assert!(buf[10..].iter().all(|&b| b == 0));
        assert!(!reader.read_grain(&mut buf).unwrap());
    }
}
