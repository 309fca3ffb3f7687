//! Indentation-aware text rendering of diff trees.
//!
//! One line per sub-diff, pre-order, each nesting level indented by one more
//! `tab`. A nested diff that is already being written further up the current
//! path renders as ` ...` instead of recursing.

use super::model::{NestedDiff, SubDiff, ValueDiff};
use crate::object::Value;
use std::fmt;
use std::sync::Arc;

fn type_label(x: &Value, y: &Value) -> String {
    match (x, y) {
        (Value::Object(o), _) | (_, Value::Object(o)) => o.describe(),
        _ if !x.is_absent() => x.type_name(),
        _ => y.type_name(),
    }
}

struct Writer<'a> {
    out: String,
    tab: &'a str,
    newline: &'a str,
    depth: usize,
    /// diffs on the current path, root first
    path: Vec<*const ValueDiff>,
}

impl Writer<'_> {
    fn line(&mut self) {
        self.out.push_str(self.newline);
        for _ in 0..self.depth {
            self.out.push_str(self.tab);
        }
    }

    fn write_diffs(&mut self, diff: &ValueDiff) {
        self.path.push(diff as *const ValueDiff);
        self.depth += 1;
        for sub in diff.diffs() {
            self.line();
            self.write_sub(sub);
        }
        self.depth -= 1;
        self.path.pop();
    }

    fn write_sub(&mut self, sub: &SubDiff) {
        self.out.push_str(&sub.key().to_string());
        let target: Option<Arc<ValueDiff>> = match sub.nested_link() {
            None => {
                self.out
                    .push_str(&format!(" x: {} y: {}", sub.x(), sub.y()));
                return;
            }
            Some(NestedDiff::Shared(diff)) => Some(diff.clone()),
            Some(NestedDiff::Ancestor(weak)) => weak.upgrade(),
        };
        match target {
            Some(diff) if !self.path.contains(&Arc::as_ptr(&diff)) => self.write_diffs(&diff),
            _ => self.out.push_str(" ..."),
        }
    }
}

impl ValueDiff {
    /// Render with a custom indent unit and line separator.
    ///
    /// `to_string_with("", " ")` gives a single line, handy for assertions.
    pub fn to_string_with(&self, tab: &str, newline: &str) -> String {
        let label = type_label(self.x(), self.y());
        if self.is_empty() {
            return format!("{} x: {} y: {}", label, self.x(), self.y());
        }

        let mut writer = Writer {
            out: label,
            tab,
            newline,
            depth: 0,
            path: Vec::new(),
        };
        writer.write_diffs(self);
        writer.out
    }
}

impl fmt::Display for ValueDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with("  ", "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::model::DiffKey;
    use crate::object::{MemberInfo, MemberKind, ValueType};
    use std::sync::Weak;

    static CHILD: MemberInfo = MemberInfo {
        name: "Child",
        declaring_type: "Parent",
        kind: MemberKind::Property,
        value_type: ValueType::Dynamic,
    };

    static PARENT: MemberInfo = MemberInfo {
        name: "Parent",
        declaring_type: "Child",
        kind: MemberKind::Property,
        value_type: ValueType::Dynamic,
    };

    static NAME: MemberInfo = MemberInfo {
        name: "Name",
        declaring_type: "Parent",
        kind: MemberKind::Property,
        value_type: ValueType::Scalar,
    };

    #[test]
    fn test_empty_diff_renders_values_inline() {
        let diff = ValueDiff::empty(Value::from(1), Value::from(2));
        assert_eq!(diff.to_string_with("", " "), "int x: 1 y: 2");
    }

    #[test]
    fn test_missing_item_rendering() {
        let diff = ValueDiff::new(
            Value::Str("ObservableList".into()),
            Value::Null,
            vec![
                SubDiff::value(DiffKey::Index(0), Value::from(1), Value::from(3)),
                SubDiff::value(DiffKey::Index(1), Value::from(2), Value::Missing),
            ],
        );
        assert_eq!(
            diff.to_string_with("", " "),
            "string [0] x: 1 y: 3 [1] x: 2 y: missing item"
        );
    }

    #[test]
    fn test_back_reference_renders_ellipsis() {
        let root = Arc::new_cyclic(|me: &Weak<ValueDiff>| {
            let child = Arc::new(ValueDiff::new(
                Value::Null,
                Value::Null,
                vec![SubDiff::nested(
                    DiffKey::Member(&PARENT),
                    Value::Null,
                    Value::Null,
                    NestedDiff::Ancestor(me.clone()),
                )],
            ));
            ValueDiff::new(
                Value::Str("Parent".into()),
                Value::Null,
                vec![
                    SubDiff::nested(
                        DiffKey::Member(&CHILD),
                        Value::Null,
                        Value::Null,
                        NestedDiff::Shared(child),
                    ),
                    SubDiff::value(DiffKey::Member(&NAME), "p1".into(), "p2".into()),
                ],
            )
        });

        assert_eq!(
            root.to_string_with("", " "),
            "string Child Parent ... Name x: p1 y: p2"
        );
        assert_eq!(
            root.to_string(),
            "string\n  Child\n    Parent ...\n  Name x: p1 y: p2"
        );
    }

    #[test]
    fn test_shared_non_ancestor_renders_in_full() {
        let shared = Arc::new(ValueDiff::new(
            Value::Null,
            Value::Null,
            vec![SubDiff::value(DiffKey::Member(&NAME), "a".into(), "b".into())],
        ));
        let root = ValueDiff::new(
            Value::from(0),
            Value::from(0),
            vec![
                SubDiff::nested(
                    DiffKey::Index(0),
                    Value::Null,
                    Value::Null,
                    NestedDiff::Shared(shared.clone()),
                ),
                SubDiff::nested(
                    DiffKey::Index(1),
                    Value::Null,
                    Value::Null,
                    NestedDiff::Shared(shared),
                ),
            ],
        );
        assert_eq!(
            root.to_string_with("", " "),
            "int [0] Name x: a y: b [1] Name x: a y: b"
        );
    }
}
