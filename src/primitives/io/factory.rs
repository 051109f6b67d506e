//! IO factory (spec §2 "IO factory (3%)").
//!
//! Opens a named block region once and hands out [`BufferedWriter`]s and
//! [`BufferedReader`]s at caller-chosen byte offsets, so the volume,
//! reference-block persistence, and slab-summary code all share one open
//! file handle instead of re-opening the region per caller.

use super::backend::{FileStorageBackend, OffsetBackend, StorageBackend};
use super::buffered::{BufferedReader, BufferedWriter};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// Owns one open storage region and mints readers/writers into it.
#[derive(Clone)]
pub struct IoFactory {
    backend: Arc<dyn StorageBackend>,
}

impl IoFactory {
    /// Opens (creating if absent) the named region.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = FileStorageBackend::open(path)?;
        Ok(Self {
            backend: Arc::new(backend),
        })
    }

    /// Wraps an already-constructed backend, e.g. an in-memory one used by
    /// tests.
    pub fn from_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Returns a factory over the same underlying region, with every
    /// offset shifted by `base` bytes. Used to carve the UDS volume's
    /// chapter area out of the same file that holds the super block and
    /// configuration block (spec §6).
    pub fn with_base_offset(&self, base: u64) -> IoFactory {
        Self {
            backend: Arc::new(OffsetBackend::new(Arc::clone(&self.backend), base)),
        }
    }

    /// Current size of the region in bytes.
    pub fn len(&self) -> Result<u64> {
        self.backend.len()
    }

    /// Grows or shrinks the region to exactly `len` bytes.
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.backend.truncate(len)
    }

    /// A writer appending at `offset`.
    pub fn writer_at(&self, offset: u64) -> BufferedWriter {
        BufferedWriter::new(Arc::clone(&self.backend), offset)
    }

    /// A reader over `[offset, offset + len)`.
    pub fn reader_at(&self, offset: u64, len: u64) -> BufferedReader {
        BufferedReader::new(Arc::clone(&self.backend), offset, len)
    }

    /// Direct positioned read, bypassing the buffered reader window —
    /// used for fixed-size structures like reference blocks where the
    /// caller already knows the exact length.
    pub fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        self.backend.read_at(offset, dst)
    }

    /// Direct positioned write, bypassing the buffered writer.
    pub fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
        self.backend.write_at(offset, src)
    }

    /// Flushes and fsyncs the underlying region.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Copies `len` bytes from `src_offset` to `dst_offset` within the
    /// region (used by `convert_to_lvm`, spec §6).
    pub fn sync_copy(&self, src_offset: u64, dst_offset: u64, len: u64) -> Result<()> {
        self.backend.sync_copy(src_offset, dst_offset, len)
    }
}
