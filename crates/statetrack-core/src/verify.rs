//! Up-front configuration checks.
//!
//! [`verify_can_diff`] and [`verify_can_track`] walk a type's declared
//! members without any instance and report every problem at once, instead
//! of failing on the first one the way a comparison does.

use crate::errors::{remediation, ExError, ExErrorKind, StateError};
use crate::object::{MemberInfo, MemberKind, ObjRef, TypeShape, Value, ValueType};
use crate::settings::{ReferenceHandling, Settings};
use crate::{log_op_end, log_op_error, log_op_start};
use std::collections::HashSet;

struct Issue {
    kind: ExErrorKind,
    type_name: &'static str,
    member: Option<&'static str>,
    line: String,
}

#[derive(Default)]
struct Walk {
    visited: HashSet<usize>,
    issues: Vec<Issue>,
}

impl Walk {
    fn shape(&mut self, shape: &'static TypeShape, settings: &Settings, track: bool) {
        if !self.visited.insert(shape as *const TypeShape as usize) {
            return;
        }
        if settings.is_ignored_type(shape) {
            return;
        }
        if track && !shape.notifies {
            self.issues.push(Issue {
                kind: ExErrorKind::NotTrackable,
                type_name: shape.name,
                member: None,
                line: format!("The type {} does not emit change notifications.", shape.name),
            });
        }
        if settings.is_immutable(shape) {
            return;
        }

        for member in shape.members {
            if !settings.is_selected(member) || settings.is_ignored_member(member) {
                continue;
            }
            if member.kind == MemberKind::Indexer {
                self.issues.push(Issue {
                    kind: ExErrorKind::UnsupportedMember,
                    type_name: shape.name,
                    member: Some(member.name),
                    line: format!(
                        "The property {} is an indexer and not supported.",
                        member.qualified_name()
                    ),
                });
                continue;
            }
            self.value(shape, Some(member), member.value_type, settings, track);
        }
        if shape.is_collection() {
            self.value(shape, None, shape.items, settings, track);
        }
    }

    fn value(
        &mut self,
        owner: &'static TypeShape,
        member: Option<&'static MemberInfo>,
        value_type: ValueType,
        settings: &Settings,
        track: bool,
    ) {
        let ValueType::Object(nested) = value_type else {
            return;
        };
        let nested = nested();
        if settings.is_ignored_type(nested) || settings.is_immutable(nested) {
            return;
        }
        match settings.reference_handling() {
            ReferenceHandling::References => {}
            ReferenceHandling::Throw => {
                let label = member.map_or_else(|| format!("{}[]", owner.name), |m| m.qualified_name());
                self.issues.push(Issue {
                    kind: ExErrorKind::AmbiguousReferenceHandling,
                    type_name: owner.name,
                    member: member.map(|m| m.name),
                    line: format!(
                        "The member {} holds the mutable reference type {}.",
                        label, nested.name
                    ),
                });
            }
            ReferenceHandling::Structural | ReferenceHandling::StructuralWithReferenceLoops => {
                self.shape(nested, settings, track);
            }
        }
    }

    fn into_result(self, headline: String, op: &str) -> Result<(), ExError> {
        let Some(first) = self.issues.first() else {
            return Ok(());
        };
        let mut text = headline;
        for issue in &self.issues {
            text.push_str("\n  - ");
            text.push_str(&issue.line);
        }
        text.push('\n');
        text.push_str(&remediation(first.type_name, first.member));

        let mut err = ExError::new(first.kind)
            .with_op(op)
            .with_type(first.type_name)
            .with_message(text);
        if let Some(member) = first.member {
            err = err.with_member(member);
        }
        Err(err)
    }
}

/// Check that instances of `shape` can be compared under `settings`.
///
/// # Errors
///
/// One error listing every unsupported indexer and, under
/// [`ReferenceHandling::Throw`], every mutable reference member. Its kind
/// is that of the first issue found.
pub fn verify_can_diff(shape: &'static TypeShape, settings: &Settings) -> Result<(), ExError> {
    let mut walk = Walk::default();
    walk.shape(shape, settings, false);
    walk.into_result(
        format!("Diffing {} is not supported with the current settings:", shape.name),
        "verify_can_diff",
    )
}

/// Check that instances of `shape` can be tracked under `settings`.
///
/// # Errors
///
/// As [`verify_can_diff`], plus every reached type without change
/// notifications.
pub fn verify_can_track(shape: &'static TypeShape, settings: &Settings) -> Result<(), ExError> {
    let mut walk = Walk::default();
    walk.shape(shape, settings, true);
    walk.into_result(
        format!("Tracking {} is not supported with the current settings:", shape.name),
        "verify_can_track",
    )
}

fn values_match(x: &Value, y: &Value) -> bool {
    match (x, y) {
        (Value::Object(a), Value::Object(b)) => a.ptr_eq(b) || a.equals(&**b),
        _ => x.scalar_eq(y).unwrap_or(false),
    }
}

/// Check that every calculated member agrees between `x` and `y`, typically
/// after the stored state of `x` was copied into `y`.
///
/// # Errors
///
/// `ReadonlyMemberDiffers` for the first calculated member whose values
/// differ, naming both values and the member's type.
pub fn verify_readonly_members(x: &ObjRef, y: &ObjRef, settings: &Settings) -> Result<(), ExError> {
    log_op_start!("verify_readonly_members", type_name = x.shape().name);
    let start = std::time::Instant::now();

    let result = first_readonly_difference(x, y, settings).map_err(|e| {
        let e = e.with_op("verify_readonly_members");
        log_op_error!(
            "verify_readonly_members",
            e.clone(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        e
    });
    if result.is_ok() {
        log_op_end!(
            "verify_readonly_members",
            duration_ms = start.elapsed().as_millis() as u64
        );
    }
    result
}

fn first_readonly_difference(x: &ObjRef, y: &ObjRef, settings: &Settings) -> Result<(), ExError> {
    let shape = x.shape();
    for member in shape.members {
        if member.kind != MemberKind::Calculated || settings.is_ignored_member(member) {
            continue;
        }
        let (xv, yv) = (x.get(member), y.get(member));
        if values_match(&xv, &yv) {
            continue;
        }
        let value_type = if xv.is_absent() { yv.type_name() } else { xv.type_name() };
        return Err(StateError::ReadonlyMemberDiffers {
            type_name: member.declaring_type.to_string(),
            member: member.name.to_string(),
            x: xv.to_string(),
            y: yv.to_string(),
            value_type,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObservableList, ShapeKind};

    static LEAF_MEMBERS: [MemberInfo; 1] = [MemberInfo {
        name: "Value",
        declaring_type: "Leaf",
        kind: MemberKind::Property,
        value_type: ValueType::Scalar,
    }];

    static LEAF: TypeShape = TypeShape {
        name: "Leaf",
        kind: ShapeKind::Object,
        immutable: false,
        notifies: false,
        members: &LEAF_MEMBERS,
        items: ValueType::Dynamic,
    };

    fn leaf() -> &'static TypeShape {
        &LEAF
    }

    static ROOT_MEMBERS: [MemberInfo; 3] = [
        MemberInfo {
            name: "Leaf",
            declaring_type: "Root",
            kind: MemberKind::Property,
            value_type: ValueType::Object(leaf),
        },
        MemberInfo {
            name: "Item",
            declaring_type: "Root",
            kind: MemberKind::Indexer,
            value_type: ValueType::Scalar,
        },
        MemberInfo {
            name: "Name",
            declaring_type: "Root",
            kind: MemberKind::Property,
            value_type: ValueType::Scalar,
        },
    ];

    static ROOT: TypeShape = TypeShape {
        name: "Root",
        kind: ShapeKind::Object,
        immutable: false,
        notifies: true,
        members: &ROOT_MEMBERS,
        items: ValueType::Dynamic,
    };

    #[test]
    fn test_all_issues_are_listed() {
        let settings = Settings::get_or_create(ReferenceHandling::Throw);
        let err = verify_can_diff(&ROOT, &settings).unwrap_err();
        assert_eq!(err.op(), Some("verify_can_diff"));
        assert!(err.message().contains("The member Root.Leaf holds the mutable reference type Leaf."));
        assert!(err.message().contains("The property Root.Item is an indexer and not supported."));
        assert!(err.message().contains("* Exclude the type Root."));
    }

    #[test]
    fn test_tracking_reports_non_notifying_nested_type() {
        let settings = Settings::builder()
            .reference_handling(ReferenceHandling::Structural)
            .ignore_member("Root", "Item")
            .build()
            .unwrap();
        assert!(verify_can_diff(&ROOT, &settings).is_ok());

        let err = verify_can_track(&ROOT, &settings).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotTrackable);
        assert!(err.message().contains("The type Leaf does not emit change notifications."));
    }

    #[test]
    fn test_ignored_type_is_not_walked() {
        let settings = Settings::builder()
            .reference_handling(ReferenceHandling::Structural)
            .ignore_member("Root", "Item")
            .ignore_type("Leaf")
            .build()
            .unwrap();
        assert!(verify_can_track(&ROOT, &settings).is_ok());
    }

    #[test]
    fn test_list_without_calculated_members_passes() {
        let settings = Settings::get_or_create(ReferenceHandling::Structural);
        let x = ObjRef::from(std::sync::Arc::new(ObservableList::with_items([1])));
        let y = ObjRef::from(std::sync::Arc::new(ObservableList::with_items([2])));
        assert!(verify_readonly_members(&x, &y, &settings).is_ok());
    }
}
