//! Structural comparison of object graphs.
//!
//! [`compute_diff`] compares two graphs once. Live trackers reuse the same
//! [`DiffBuilder`] per identity pair, so a one-shot comparison and a tracker
//! over the same pair and settings share their accumulated state.
//!
//! ## Guarantees
//!
//! - **Empty means equal**: a [`ValueDiff`] with no children, or no diff at
//!   all, is the only representation of "no difference".
//! - **Bounded recursion**: a pair that repeats an ancestor on the current
//!   path is an error under `Structural` and a back link under
//!   `StructuralWithReferenceLoops`. Aliased but acyclic repeats are shared
//!   and rendered in full.
//! - **Padding**: collections are compared up to the longer length; the
//!   shorter side reads as [`Value::Missing`](crate::object::Value::Missing).

pub mod builder;
pub(crate) mod classify;
pub mod engine;
pub mod model;
pub mod render;

pub use builder::DiffBuilder;
pub use engine::compute_diff;
pub use model::{DiffKey, SubDiff, ValueDiff};
