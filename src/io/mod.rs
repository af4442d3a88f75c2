//! Bounded byte sources for binary parsing.
//!
//! A [`ByteSource`] is the one handle every parser reads through. It is
//! either a read-only memory map of a file or an in-memory buffer, it is
//! cheap to clone (clones share the same backing storage), and it stays
//! alive for as long as any parser built on top of it. Every read is
//! bounds-checked and borrows directly from the backing storage.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Defines the resource limits for I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

#[derive(Clone)]
enum Backing {
    Mapped(Arc<Mmap>),
    Memory(Bytes),
}

/// A shared, read-only view of a binary's bytes.
#[derive(Clone)]
pub struct ByteSource {
    backing: Backing,
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backing {
            Backing::Mapped(_) => "mapped",
            Backing::Memory(_) => "memory",
        };
        f.debug_struct("ByteSource")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

impl ByteSource {
    /// Opens a file and memory-maps it read-only.
    ///
    /// Fails with [`IoError::FileTooLarge`] if the file exceeds
    /// `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening file for parsing"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        // memmap cannot map empty files.
        if file_size == 0 {
            return Ok(Self::from_bytes(Bytes::new()));
        }

        // Safety: read-only map of a regular file; callers must not truncate
        // the file while the source is alive.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            backing: Backing::Mapped(Arc::new(mmap)),
        })
    }

    /// Wraps an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            backing: Backing::Memory(data.into()),
        }
    }

    /// The full contents of the source.
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(m) => &m[..],
            Backing::Memory(b) => &b[..],
        }
    }

    pub fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Borrow exactly `length` bytes at `offset`.
    ///
    /// Short reads are errors: a request that runs past the end of the
    /// source fails with [`IoError::OutOfRange`].
    pub fn read_at(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let data = self.as_slice();
        let size = data.len() as u64;
        let out_of_range = || IoError::OutOfRange {
            offset,
            length,
            size,
        };
        let end = offset.checked_add(length).ok_or_else(out_of_range)?;
        if end > size {
            return Err(out_of_range());
        }
        trace!(offset, length, "read_at");
        // end <= size, which fits in usize since the slice exists.
        Ok(&data[offset as usize..end as usize])
    }

    /// Borrow everything from `offset` to the end of the source.
    pub fn tail_from(&self, offset: u64) -> Result<&[u8]> {
        let size = self.len();
        if offset > size {
            return Err(IoError::OutOfRange {
                offset,
                length: 0,
                size,
            });
        }
        self.read_at(offset, size - offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &[u8]) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content).unwrap();
        temp_file
    }

    #[test]
    fn open_file_successfully() {
        let file = create_temp_file(b"hello world");
        let source = ByteSource::open(file.path(), &IOLimits::default()).unwrap();
        assert_eq!(source.len(), 11);
        assert_eq!(source.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn open_file_too_large() {
        let file = create_temp_file(&[0; 100]);
        let limits = IOLimits { max_file_size: 50 };
        let result = ByteSource::open(file.path(), &limits);
        assert!(matches!(result, Err(IoError::FileTooLarge { .. })));
    }

    #[test]
    fn open_empty_file() {
        let file = create_temp_file(b"");
        let source = ByteSource::open(file.path(), &IOLimits::default()).unwrap();
        assert!(source.is_empty());
        assert!(source.read_at(0, 0).unwrap().is_empty());
        assert!(matches!(
            source.read_at(0, 1),
            Err(IoError::OutOfRange { .. })
        ));
    }

    #[test]
    fn read_past_end_is_an_error() {
        let source = ByteSource::from_bytes(&b"hello"[..]);
        assert!(matches!(
            source.read_at(3, 10),
            Err(IoError::OutOfRange {
                offset: 3,
                length: 10,
                size: 5
            })
        ));
        assert!(source.read_at(u64::MAX, 2).is_err());
    }

    #[test]
    fn repeated_reads_are_stable() {
        let source = ByteSource::from_bytes(vec![1u8, 2, 3, 4]);
        for _ in 0..3 {
            assert_eq!(source.read_at(1, 2).unwrap(), &[2, 3]);
        }
        assert_eq!(source.tail_from(2).unwrap(), &[3, 4]);
        assert!(source.tail_from(4).unwrap().is_empty());
        assert!(source.tail_from(5).is_err());
    }

    #[test]
    fn clones_share_backing() {
        let file = create_temp_file(b"shared");
        let source = ByteSource::open(file.path(), &IOLimits::default()).unwrap();
        let clone = source.clone();
        drop(source);
        assert_eq!(clone.read_at(0, 6).unwrap(), b"shared");
    }
}
