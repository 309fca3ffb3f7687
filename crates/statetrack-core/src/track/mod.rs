//! Live dirty tracking.
//!
//! [`begin_tracking`] returns a [`DirtyTracker`] whose `is_dirty` and `diff`
//! follow both graphs as they mutate. Work runs synchronously on the thread
//! that raised the mutation.
//!
//! ## Guarantees
//!
//! - **Per-cycle notifications**: one [`TrackerProperty::Diff`] per update
//!   cycle that changed the diff, followed by one
//!   [`TrackerProperty::IsDirty`] only when the flag flipped.
//! - **Sharing**: trackers over the same pair and settings share a node; the
//!   node is disposed when the last tracker and the last parent release it.
//! - **Faults**: errors raised while handling a notification are logged and
//!   kept as [`DirtyTracker::fault`].

pub(crate) mod cycle;
pub mod dirty_tracker;
pub mod node;
pub(crate) mod source;

pub use dirty_tracker::{begin_tracking, DirtyTracker, TrackerProperty};
pub use node::{ChangeTrackerNode, NodeChanged};
