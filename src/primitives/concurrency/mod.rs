//! Concurrency primitives (spec §4.1–§4.3, §5).
//!
//! Every cross-thread handoff in the UDS index and the VDO slab engine goes
//! through one of these four primitives: a lock-free [`funnel_queue`] for
//! MPSC handoff, an [`event_count`] for idle/wake signaling, a
//! [`wait_queue`] for per-resource waiter lists (busy pages, dirty
//! reference blocks), and a [`work_queue`] that ties the first two together
//! into a thread-per-queue scheduler.

pub mod event_count;
pub mod funnel_queue;
pub mod wait_queue;
pub mod work_queue;

pub use event_count::{EventCount, EventToken};
pub use funnel_queue::FunnelQueue;
pub use wait_queue::WaitQueue;
pub use work_queue::{Priority, WorkQueue};
