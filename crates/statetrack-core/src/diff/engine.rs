//! One-shot structural comparison.

use super::builder::{DiffBuilder, OneShot};
use super::model::ValueDiff;
use crate::errors::{ExError, StateError};
use crate::object::{ObjRef, Value};
use crate::pairing::IdentityPair;
use crate::settings::Settings;
use crate::verify::verify_can_diff;
use crate::{log_op_end, log_op_error, log_op_start};
use std::sync::Arc;

/// Compare `x` and `y` once, without subscribing to anything.
///
/// Returns an empty diff when the two graphs do not differ under `settings`.
///
/// # Errors
///
/// - `ShapeMismatch` when the roots are of different types
/// - `AmbiguousReferenceHandling` for a mutable reference member under
///   `Throw`, whether or not the member currently holds an instance
/// - `UnsupportedMember` when a reachable type has a selected indexer
/// - `ReferenceLoop` for a cyclic graph under plain `Structural`
pub fn compute_diff(
    x: &ObjRef,
    y: &ObjRef,
    settings: &Arc<Settings>,
) -> Result<Arc<ValueDiff>, ExError> {
    log_op_start!(
        "compute_diff",
        reference_handling = %settings.reference_handling(),
        type_name = x.shape().name
    );
    let start = std::time::Instant::now();

    let result = compute_diff_impl(x, y, settings).map_err(|e| {
        let e = e.with_op("compute_diff");
        log_op_error!(
            "compute_diff",
            e.clone(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        e
    })?;

    log_op_end!(
        "compute_diff",
        duration_ms = start.elapsed().as_millis() as u64,
        empty = result.is_empty()
    );
    Ok(result)
}

fn compute_diff_impl(
    x: &ObjRef,
    y: &ObjRef,
    settings: &Arc<Settings>,
) -> Result<Arc<ValueDiff>, ExError> {
    if !std::ptr::eq(x.shape(), y.shape()) {
        return Err(StateError::ShapeMismatch {
            x_type: x.shape().name.to_string(),
            y_type: y.shape().name.to_string(),
        }
        .into());
    }
    // configuration errors do not depend on the data at hand
    verify_can_diff(x.shape(), settings)?;

    let empty = || Arc::new(ValueDiff::empty(Value::Object(x.clone()), Value::Object(y.clone())));
    if x.ptr_eq(y) {
        return Ok(empty());
    }

    let pair = IdentityPair::get_or_create(x, y);
    let root = DiffBuilder::get_or_create(&pair, settings)?;
    let mut run = OneShot::default();
    root.arc().update_diffs(&mut run)?;

    let diff = root.arc().create_value_diff().unwrap_or_else(empty);
    // builders stay cached until the tree is materialized
    drop(run);
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;
    use crate::object::ObservableList;
    use crate::settings::ReferenceHandling;

    fn list(items: &[i64]) -> ObjRef {
        ObjRef::from(Arc::new(ObservableList::with_items(items.iter().copied())))
    }

    #[test]
    fn test_same_instance_is_empty() {
        let x = list(&[1, 2]);
        let settings = Settings::get_or_create(ReferenceHandling::Throw);
        assert!(compute_diff(&x, &x, &settings).unwrap().is_empty());
    }

    #[test]
    fn test_equal_lists_are_empty() {
        let settings = Settings::get_or_create(ReferenceHandling::Structural);
        let diff = compute_diff(&list(&[1, 2]), &list(&[1, 2]), &settings).unwrap();
        assert!(diff.is_empty());
        assert_eq!(diff.to_string_with("", " "), "ObservableList x: ObservableList y: ObservableList");
    }

    #[test]
    fn test_longer_side_reports_missing_item() {
        let settings = Settings::get_or_create(ReferenceHandling::Structural);
        let diff = compute_diff(&list(&[1]), &list(&[1, 2]), &settings).unwrap();
        assert_eq!(
            diff.to_string_with("", " "),
            "ObservableList [1] x: missing item y: 2"
        );
    }

    #[test]
    fn test_errors_carry_operation() {
        let settings = Settings::get_or_create(ReferenceHandling::Throw);
        let inner = || Value::from(Arc::new(ObservableList::new()));
        let x = ObjRef::from(Arc::new(ObservableList::with_items([inner()])));
        let y = ObjRef::from(Arc::new(ObservableList::with_items([inner()])));

        let err = compute_diff(&x, &y, &settings).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::AmbiguousReferenceHandling);
        assert_eq!(err.op(), Some("compute_diff"));
    }
}
