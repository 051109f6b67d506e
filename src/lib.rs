//! # vdo-core — dedup index and slab reference-count engine
//!
//! `vdo-core` implements the two storage subsystems at the heart of a
//! block-layer deduplication device:
//!
//! - **UDS** (Universal Deduplication Service): an in-memory/on-disk index
//!   mapping content fingerprints to the chapter of a volume where a
//!   matching record last appeared, plus the chapter-writing and
//!   request-pipeline machinery around it ([`uds`]).
//! - **VDO** slab reference counting: per-block reference counts backed by
//!   a packed on-disk block format and a replayable slab journal, used to
//!   track which physical blocks a dedup layer may safely reclaim
//!   ([`vdo`]).
//!
//! ```rust,no_run
//! use vdo_core::config::{OpenMode, UdsParameters};
//! use vdo_core::uds::{create_session, open_index};
//!
//! let session = create_session();
//! let params = UdsParameters::default();
//! open_index(OpenMode::Create, params, &session, "index.dat")?;
//! # Ok::<(), vdo_core::error::CoreError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Primitives layer**: storage backends, buffered I/O, an IO factory,
//!   and the concurrency building blocks (funnel queue, event count, wait
//!   queue, work queue) shared by both halves ([`primitives`]).
//! - **UDS layer**: geometry, fingerprints, the volume index, chapter
//!   index, page cache, volume, request pipeline, and the external
//!   Session API ([`uds`]).
//! - **VDO layer**: reference blocks, slab journal, slab summary, and the
//!   admin-state-gated `Slab` they compose into ([`vdo`]).

pub mod config;
pub mod error;
pub mod logging;
pub mod primitives;
pub mod uds;
pub mod vdo;

pub use crate::config::{MemorySize, OpenMode, UdsParameters, VdoSlabConfig};
pub use crate::error::{CoreError, Result};
pub use crate::uds::Session;
pub use crate::vdo::Slab;
