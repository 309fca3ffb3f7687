//! Statetrack Core - structural diffing and live dirty tracking
//!
//! This crate compares two object graphs of the same shape and keeps the
//! result current while either graph mutates, including:
//! - An object capability layer (`Object`, `TypeShape`, `Value`) and change
//!   notifications
//! - Interned comparison settings with four reference-handling policies
//! - Canonical identity pairs and a reference-counted, settings-partitioned cache
//! - One-shot structural diffs with reference-loop detection
//! - Shared change-tracker nodes behind a `DirtyTracker` facade
//! - Up-front verification of types and calculated members

pub mod cache;
pub mod diff;
pub mod errors;
pub mod logging_facility;
pub mod object;
pub mod pairing;
pub mod settings;
pub mod track;
pub mod verify;

// Re-export commonly used types
pub use diff::{compute_diff, DiffKey, SubDiff, ValueDiff};
pub use errors::{ExError, ExErrorKind, Result, StateError};
pub use object::{
    Change, MemberInfo, MemberKind, Notifier, ObjRef, Object, ObservableList, ShapeKind,
    Subscription, TypeShape, Value, ValueType,
};
pub use pairing::IdentityPair;
pub use settings::{MemberSelection, ReferenceHandling, Settings, SettingsBuilder, SettingsSpec};
pub use track::{begin_tracking, DirtyTracker, TrackerProperty};
pub use verify::{verify_can_diff, verify_can_track, verify_readonly_members};
