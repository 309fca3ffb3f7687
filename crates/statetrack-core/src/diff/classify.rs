//! Per-slot comparison strategy.

use crate::errors::{ExError, StateError};
use crate::object::{MemberInfo, ObjRef, TypeShape, Value};
use crate::settings::{ReferenceHandling, Settings};

use super::model::DiffKey;

/// A member of a given type or an element of a collection
#[derive(Debug, Clone, Copy)]
pub(crate) enum Slot {
    Member {
        ordinal: usize,
        member: &'static MemberInfo,
    },
    Index(usize),
}

impl Slot {
    pub(crate) fn key(&self) -> DiffKey {
        match self {
            Slot::Member { member, .. } => DiffKey::Member(*member),
            Slot::Index(i) => DiffKey::Index(*i),
        }
    }

    /// `(type, member)` names used in error messages
    pub(crate) fn names(&self, owner: &TypeShape) -> (String, String) {
        match self {
            Slot::Member { member, .. } => {
                (member.declaring_type.to_string(), member.name.to_string())
            }
            Slot::Index(i) => (owner.name.to_string(), format!("[{}]", i)),
        }
    }
}

/// How one slot contributes to the diff
pub(crate) enum Strategy {
    Equal,
    Differs,
    /// Compare the two instances member by member
    Nested(ObjRef, ObjRef),
}

/// Decide how `x` and `y` in `slot` of an `owner` instance compare.
///
/// # Errors
///
/// `AmbiguousReferenceHandling` when two distinct mutable instances meet
/// under [`ReferenceHandling::Throw`].
pub(crate) fn classify(
    x: &Value,
    y: &Value,
    slot: Slot,
    owner: &TypeShape,
    settings: &Settings,
) -> Result<Strategy, ExError> {
    if let Some(equal) = x.scalar_eq(y) {
        return Ok(if equal {
            Strategy::Equal
        } else {
            Strategy::Differs
        });
    }

    let (xo, yo) = match (x, y) {
        (Value::Object(xo), Value::Object(yo)) => (xo, yo),
        _ => return Ok(Strategy::Differs),
    };

    if xo.ptr_eq(yo) {
        return Ok(Strategy::Equal);
    }
    let shape = xo.shape();
    if !std::ptr::eq(shape, yo.shape()) {
        return Ok(Strategy::Differs);
    }
    if settings.is_ignored_type(shape) {
        return Ok(Strategy::Equal);
    }
    if settings.is_immutable(shape) {
        return Ok(if xo.equals(&**yo) {
            Strategy::Equal
        } else {
            Strategy::Differs
        });
    }

    match settings.reference_handling() {
        ReferenceHandling::References => Ok(Strategy::Differs),
        ReferenceHandling::Throw => {
            let (type_name, member) = slot.names(owner);
            Err(ExError::from(StateError::AmbiguousMember {
                type_name,
                member,
                value_type: shape.name.to_string(),
            }))
        }
        ReferenceHandling::Structural | ReferenceHandling::StructuralWithReferenceLoops => {
            Ok(Strategy::Nested(xo.clone(), yo.clone()))
        }
    }
}

/// The error for a pair that repeats an ancestor under plain `Structural`
pub(crate) fn reference_loop(slot: Slot, owner: &TypeShape, target: &TypeShape) -> ExError {
    let (type_name, member) = slot.names(owner);
    StateError::ReferenceLoop {
        type_name,
        member,
        loop_type: target.name.to_string(),
    }
    .into()
}
