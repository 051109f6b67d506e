//! Low-level primitives shared by the UDS index and the VDO slab engine.
//!
//! Includes byte utilities, I/O operations, concurrency controls, the
//! fingerprint hash, and the radix sort used to build delta chapter
//! indexes.

/// Byte-level utilities and encoding/decoding.
///
/// Low-level utilities for working with raw bytes, buffers, and encoding operations.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// Thread-safe data structures and coordination mechanisms for concurrent access.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Seed-parameterized Murmur3-128, used to derive record fingerprints.
pub mod murmur3;

/// In-place MSD radix sort over fixed-length byte keys.
pub mod radix_sort;
