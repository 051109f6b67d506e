//! Stream adapters over a 4 KiB-block storage region (spec §2, §8.2, §8.3
//! scenarios 2 & 3).
//!
//! [`BufferedWriter`] accumulates appended bytes and auto-flushes whenever
//! it has a full block buffered; an explicit [`BufferedWriter::flush`] also
//! pushes out a trailing partial block. [`BufferedReader`] mirrors that:
//! sequential [`BufferedReader::read`] calls pull from an internal 4 KiB
//! window, and [`BufferedReader::verify`] compares the next `N` bytes
//! against an expected slice, returning [`CoreError::CorruptData`] on
//! mismatch without consuming them (§8.3 scenario 3 depends on this: a
//! failed verify must leave the stream positioned so the next verify call
//! sees the same bytes again).

use crate::error::{CoreError, Result};
use crate::primitives::io::backend::StorageBackend;
use std::collections::VecDeque;
use std::sync::Arc;

/// Block size buffered I/O operates on (spec §2: "4 KiB-block region").
pub const BLOCK_SIZE: usize = 4096;

/// Appends bytes to a storage region, auto-flushing full 4 KiB blocks.
pub struct BufferedWriter {
    backend: Arc<dyn StorageBackend>,
    base_offset: u64,
    position: u64,
    buffer: VecDeque<u8>,
}

impl BufferedWriter {
    /// Creates a writer appending at `base_offset` within `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, base_offset: u64) -> Self {
        Self {
            backend,
            base_offset,
            position: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Appends `bytes`, auto-flushing every full 4 KiB block accumulated.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend(bytes.iter().copied());
        while self.buffer.len() >= BLOCK_SIZE {
            let chunk: Vec<u8> = self.buffer.drain(..BLOCK_SIZE).collect();
            self.backend
                .write_at(self.base_offset + self.position, &chunk)?;
            self.position += BLOCK_SIZE as u64;
        }
        Ok(())
    }

    /// Flushes any buffered partial block and fsyncs the backend.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let chunk: Vec<u8> = self.buffer.drain(..).collect();
            self.backend
                .write_at(self.base_offset + self.position, &chunk)?;
            self.position += chunk.len() as u64;
        }
        self.backend.flush()
    }

    /// Total bytes written so far (flushed plus still-buffered).
    pub fn len(&self) -> u64 {
        self.position + self.buffer.len() as u64
    }

    /// True iff nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads a previously-written stream sequentially, 4 KiB at a time.
pub struct BufferedReader {
    backend: Arc<dyn StorageBackend>,
    base_offset: u64,
    region_len: u64,
    position: u64,
    window: VecDeque<u8>,
}

impl BufferedReader {
    /// Creates a reader over `backend` starting at `base_offset`, bounded
    /// to `region_len` bytes.
    pub fn new(backend: Arc<dyn StorageBackend>, base_offset: u64, region_len: u64) -> Self {
        Self {
            backend,
            base_offset,
            region_len,
            position: 0,
            window: VecDeque::new(),
        }
    }

    fn fill_at_least(&mut self, n: usize) -> Result<()> {
        while self.window.len() < n {
            let remaining = self.region_len.saturating_sub(self.position);
            if remaining == 0 {
                return Err(CoreError::CorruptData);
            }
            let chunk_len = BLOCK_SIZE.min(remaining as usize);
            let mut chunk = vec![0u8; chunk_len];
            self.backend
                .read_at(self.base_offset + self.position, &mut chunk)?;
            self.position += chunk_len as u64;
            self.window.extend(chunk);
        }
        Ok(())
    }

    /// Reads exactly `dst.len()` bytes, advancing the read position.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<()> {
        self.fill_at_least(dst.len())?;
        for slot in dst.iter_mut() {
            *slot = self.window.pop_front().expect("fill_at_least guarantees availability");
        }
        Ok(())
    }

    /// Compares the next `expected.len()` bytes of the stream to
    /// `expected`. On a match, advances past them. On a mismatch, the read
    /// position is left unchanged — so a failed `verify` followed by a
    /// `verify` against the *actual* upcoming bytes still succeeds (§8.3
    /// scenario 3: alternating mismatched/matched verifies against an
    /// `X1 X2 X1 X2 ...` stream must advance exactly one token per
    /// successful call, not per call).
    pub fn verify(&mut self, expected: &[u8]) -> Result<()> {
        self.fill_at_least(expected.len())?;
        let matches = self
            .window
            .iter()
            .take(expected.len())
            .eq(expected.iter());
        if matches {
            self.window.drain(..expected.len());
            Ok(())
        } else {
            Err(CoreError::CorruptData)
        }
    }
}
