//! A notifying collection of [`Value`]s.

use super::{MemberInfo, Notifier, Object, ShapeKind, TypeShape, Value, ValueType};
use crate::object::Change;
use parking_lot::RwLock;

static OBSERVABLE_LIST: TypeShape = TypeShape {
    name: "ObservableList",
    kind: ShapeKind::Collection,
    immutable: false,
    notifies: true,
    members: &[],
    items: ValueType::Dynamic,
};

/// Ordered collection that reports every mutation through its [`Notifier`].
///
/// Notifications are raised after the internal lock is released, so handlers
/// may read the list.
#[derive(Debug, Default)]
pub struct ObservableList {
    items: RwLock<Vec<Value>>,
    notifier: Notifier,
}

impl ObservableList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            items: RwLock::new(items.into_iter().map(Into::into).collect()),
            notifier: Notifier::new(),
        }
    }

    pub fn type_shape() -> &'static TypeShape {
        &OBSERVABLE_LIST
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    pub fn push(&self, value: impl Into<Value>) {
        let index = {
            let mut items = self.items.write();
            items.push(value.into());
            items.len() - 1
        };
        self.notifier.notify(&Change::Add { index });
    }

    /// Insert at `index`; out of range indices append
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let index = {
            let mut items = self.items.write();
            let index = index.min(items.len());
            items.insert(index, value.into());
            index
        };
        self.notifier.notify(&Change::Add { index });
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.items.write();
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.notifier.notify(&Change::Remove { index });
        }
        removed
    }

    /// Replace the element at `index`, returning the previous one
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let previous = {
            let mut items = self.items.write();
            items
                .get_mut(index)
                .map(|slot| std::mem::replace(slot, value.into()))
        };
        if previous.is_some() {
            self.notifier.notify(&Change::Replace { index });
        }
        previous
    }

    /// Move the element at `from` so it ends up at `to`
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        let moved = {
            let mut items = self.items.write();
            if from < items.len() && to < items.len() {
                let value = items.remove(from);
                items.insert(to, value);
                true
            } else {
                false
            }
        };
        if moved {
            self.notifier.notify(&Change::Move { from, to });
        }
        moved
    }

    pub fn clear(&self) {
        self.items.write().clear();
        self.notifier.notify(&Change::Reset);
    }

    /// Replace all content at once
    pub fn reset<I, V>(&self, items: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        *self.items.write() = items.into_iter().map(Into::into).collect();
        self.notifier.notify(&Change::Reset);
    }
}

impl Object for ObservableList {
    fn shape(&self) -> &'static TypeShape {
        &OBSERVABLE_LIST
    }

    fn get(&self, _member: &MemberInfo) -> Value {
        Value::Missing
    }

    fn item_count(&self) -> Option<usize> {
        Some(self.len())
    }

    fn item(&self, index: usize) -> Value {
        self.value_at(index).unwrap_or(Value::Missing)
    }

    fn notifier(&self) -> Option<&Notifier> {
        Some(&self.notifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorded(list: &ObservableList) -> (Arc<Mutex<Vec<Change>>>, crate::object::Subscription) {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        let sub = list
            .notifier
            .subscribe(move |c: &Change| sink.lock().push(*c));
        (changes, sub)
    }

    #[test]
    fn test_mutations_raise_matching_changes() {
        let list = ObservableList::with_items([1, 2]);
        let (changes, _sub) = recorded(&list);

        list.push(3);
        list.insert(0, 0);
        list.set(1, 5);
        list.move_item(0, 2);
        list.remove(3);
        list.clear();

        assert_eq!(
            *changes.lock(),
            vec![
                Change::Add { index: 2 },
                Change::Add { index: 0 },
                Change::Replace { index: 1 },
                Change::Move { from: 0, to: 2 },
                Change::Remove { index: 3 },
                Change::Reset,
            ]
        );
        assert!(list.is_empty());
    }

    #[test]
    fn test_out_of_range_mutations_are_silent() {
        let list = ObservableList::with_items([1]);
        let (changes, _sub) = recorded(&list);

        assert!(list.remove(4).is_none());
        assert!(list.set(4, 1).is_none());
        assert!(!list.move_item(0, 3));
        assert!(changes.lock().is_empty());
    }

    #[test]
    fn test_move_item_order() {
        let list = ObservableList::with_items([1, 2, 3]);
        list.move_item(0, 2);
        let items: Vec<String> = (0..3).map(|i| list.item(i).to_string()).collect();
        assert_eq!(items, vec!["2", "3", "1"]);
        assert!(matches!(list.item(7), Value::Missing));
    }
}
