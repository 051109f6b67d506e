//! The UDS half of this crate: the universal deduplication index (spec
//! §2 "UDS ..." line items, §3.1-§3.6, §4.1-§4.7, §6).
//!
//! Submodules are ordered leaves-first, mirroring spec.md §2's
//! architecture list: geometry and record types at the bottom, the
//! volume index/open chapter/chapter index/page cache/volume in the
//! middle, and the request pipeline plus session API for external
//! callers at the top.

pub mod chapter_index;
pub mod geometry;
pub mod open_chapter;
pub mod page_cache;
pub mod pipeline;
pub mod record;
pub mod request;
pub mod session;
pub mod stats;
pub mod volume;
pub mod volume_index;

pub use geometry::Geometry;
pub use pipeline::Pipeline;
pub use record::{Record, RecordName, VirtualChapterNumber};
pub use request::{Request, RequestKind, RequestOutcome};
pub use session::{
    close_index, convert_to_lvm, create_session, destroy_session, flush_session,
    get_index_parameters, get_index_stats, launch_request, open_index, DoryForgetful, Session,
};
pub use stats::IndexStats;
pub use volume::Volume;
pub use volume_index::VolumeIndex;
