//! Crate-wide error type.
//!
//! A single [`thiserror`](https://docs.rs/thiserror)-derived enum covers both
//! the UDS index error set and the VDO slab-engine error set from the
//! specification (mapped POSIX negatives included), the same way the
//! teacher codebase keeps one error enum for its whole storage stack.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error type for the UDS index and the VDO slab reference-count
/// engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read or verify detected data that does not match what was written.
    #[error("corrupt data")]
    CorruptData,

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The index has been disabled (e.g. after an unrecoverable error).
    #[error("index is disabled")]
    Disabled,

    /// `open_index` was asked to load or reopen a region that was never
    /// formatted with `CREATE`.
    #[error("no index directory found")]
    NoDirectory,

    /// An operation was attempted while a session/slab was in a state that
    /// forbids it.
    #[error("bad state: {0}")]
    BadState(String),

    /// A `POST` targeted a name that already exists in the index.
    #[error("duplicate name")]
    DuplicateName,

    /// A session or index name is already registered.
    #[error("already registered")]
    AlreadyRegistered,

    /// The volume index has overflowed its configured capacity.
    #[error("index overflow")]
    Overflow,

    /// Maps to `-ENOSPC`.
    #[error("no space left on device")]
    NoSpace,

    /// Maps to `-EFBIG`.
    #[error("requested region too large")]
    TooLarge,

    /// Maps to `-EROFS`: the underlying device rejected a write.
    #[error("read-only filesystem")]
    ReadOnlyDevice,

    /// Maps to `-EEXIST`.
    #[error("already exists")]
    AlreadyExists,

    /// Maps to `-ENOMEM`.
    #[error("out of memory")]
    OutOfMemory,

    /// §4.8.2: an `adjust` transition had no legal successor state.
    #[error("reference count invalid: {0}")]
    RefCountInvalid(String),

    /// §4.8: an operation was invoked on a slab in a forbidden admin state.
    #[error("invalid admin state: {0}")]
    InvalidAdminState(String),

    /// The owning VDO has entered read-only mode; all writes are rejected.
    #[error("vdo is read-only")]
    VdoReadOnly,
}

impl CoreError {
    /// Returns the stable error identifier from spec §6, for callers that
    /// need the string form rather than matching on the enum variant.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Io(_) => "UDS_IO_ERROR",
            CoreError::CorruptData => "UDS_CORRUPT_DATA",
            CoreError::InvalidArgument(_) => "UDS_INVALID_ARGUMENT",
            CoreError::Disabled => "UDS_DISABLED",
            CoreError::NoDirectory => "UDS_NO_DIRECTORY",
            CoreError::BadState(_) => "UDS_BAD_STATE",
            CoreError::DuplicateName => "UDS_DUPLICATE_NAME",
            CoreError::AlreadyRegistered => "UDS_ALREADY_REGISTERED",
            CoreError::Overflow => "UDS_OVERFLOW",
            CoreError::NoSpace => "-ENOSPC",
            CoreError::TooLarge => "-EFBIG",
            CoreError::ReadOnlyDevice => "-EROFS",
            CoreError::AlreadyExists => "-EEXIST",
            CoreError::OutOfMemory => "-ENOMEM",
            CoreError::RefCountInvalid(_) => "VDO_REF_COUNT_INVALID",
            CoreError::InvalidAdminState(_) => "VDO_INVALID_ADMIN_STATE",
            CoreError::VdoReadOnly => "VDO_READ_ONLY",
        }
    }

    /// True for errors that §7 classifies as protocol violations: never
    /// retried, always force the owning VDO into read-only mode.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, CoreError::RefCountInvalid(_))
    }
}
