//! Structural diff accumulator.
//!
//! One [`DiffBuilder`] per identity pair and settings, shared through the
//! cache. It stores the current contribution of every member and index of
//! its pair. Nested contributions point at the builder of the nested pair
//! weakly; whoever drives the builder (a one-shot run or a tracker node) keeps
//! the nested builders alive.

use super::classify::{classify, reference_loop, Slot, Strategy};
use super::model::{DiffKey, NestedDiff, SubDiff, ValueDiff};
use crate::cache::{self, Disposable, RefCounted};
use crate::errors::ExError;
use crate::object::{ObjRef, Value};
use crate::pairing::IdentityPair;
use crate::settings::{ReferenceHandling, Settings};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};

#[derive(Clone)]
pub(crate) enum Entry {
    Value {
        x: Value,
        y: Value,
    },
    Nested {
        x: Value,
        y: Value,
        target: Weak<DiffBuilder>,
    },
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
        _ => a.scalar_eq(b).unwrap_or(false),
    }
}

impl Entry {
    fn same_as(&self, other: &Entry) -> bool {
        match (self, other) {
            (Entry::Value { x, y }, Entry::Value { x: x2, y: y2 }) => {
                same_value(x, x2) && same_value(y, y2)
            }
            (Entry::Nested { target, .. }, Entry::Nested { target: t2, .. }) => {
                Weak::ptr_eq(target, t2)
            }
            _ => false,
        }
    }
}

#[derive(Default)]
struct BuilderState {
    members: BTreeMap<usize, (DiffKey, Entry)>,
    indexes: BTreeMap<usize, Entry>,
}

impl BuilderState {
    fn entries(&self) -> impl Iterator<Item = (DiffKey, &Entry)> {
        self.members
            .values()
            .map(|(key, entry)| (*key, entry))
            .chain(self.indexes.iter().map(|(i, e)| (DiffKey::Index(*i), e)))
    }
}

/// Current diff contributions of one identity pair
pub struct DiffBuilder {
    pair: Arc<IdentityPair>,
    settings: Arc<Settings>,
    state: Mutex<BuilderState>,
}

impl Disposable for DiffBuilder {
    fn dispose(&self) {
        let dropped = std::mem::take(&mut *self.state.lock());
        drop(dropped);
    }
}

impl DiffBuilder {
    /// The shared builder for `pair` under `settings`
    pub(crate) fn get_or_create(
        pair: &Arc<IdentityPair>,
        settings: &Arc<Settings>,
    ) -> Result<RefCounted<DiffBuilder>, ExError> {
        cache::get_or_add(pair.clone(), settings, || {
            Ok(Arc::new(DiffBuilder {
                pair: pair.clone(),
                settings: settings.clone(),
                state: Mutex::new(BuilderState::default()),
            }))
        })
    }

    /// Store the contribution of `slot`; `None` clears it.
    ///
    /// Returns whether the stored state changed.
    pub(crate) fn record(&self, slot: Slot, entry: Option<Entry>) -> bool {
        let mut state = self.state.lock();
        let old = match slot {
            Slot::Member { ordinal, .. } => state.members.get(&ordinal).map(|(_, e)| e),
            Slot::Index(i) => state.indexes.get(&i),
        };
        match (old, &entry) {
            (None, None) => return false,
            (Some(old), Some(new)) if old.same_as(new) => return false,
            _ => {}
        }

        // replaced entries are dropped once the lock is released
        let replaced = match (slot, entry) {
            (Slot::Member { ordinal, .. }, None) => state.members.remove(&ordinal).map(|(_, e)| e),
            (Slot::Member { ordinal, .. }, Some(entry)) => state
                .members
                .insert(ordinal, (slot.key(), entry))
                .map(|(_, e)| e),
            (Slot::Index(i), None) => state.indexes.remove(&i),
            (Slot::Index(i), Some(entry)) => state.indexes.insert(i, entry),
        };
        drop(state);
        drop(replaced);
        true
    }

    /// Drop every index contribution at or above `start`
    pub(crate) fn clear_indexes_from(&self, start: usize) -> bool {
        let removed = self.state.lock().indexes.split_off(&start);
        !removed.is_empty()
    }

    /// One past the highest index with a contribution
    pub(crate) fn index_bound(&self) -> usize {
        self.state
            .lock()
            .indexes
            .keys()
            .next_back()
            .map_or(0, |i| i + 1)
    }

    fn nested_targets(&self) -> (bool, Vec<Arc<DiffBuilder>>) {
        let state = self.state.lock();
        let mut terminal = false;
        let mut targets = Vec::new();
        for (_, entry) in state.entries() {
            match entry {
                Entry::Value { .. } => terminal = true,
                Entry::Nested { target, .. } => targets.extend(target.upgrade()),
            }
        }
        (terminal, targets)
    }

    /// Whether any terminal mismatch is reachable from this builder
    pub fn has_differences(self: &Arc<Self>) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![self.clone()];
        while let Some(builder) = pending.pop() {
            if !visited.insert(Arc::as_ptr(&builder) as usize) {
                continue;
            }
            let (terminal, targets) = builder.nested_targets();
            if terminal {
                return true;
            }
            pending.extend(targets);
        }
        false
    }

    /// Materialize the current state, or `None` when nothing differs
    pub fn create_value_diff(self: &Arc<Self>) -> Option<Arc<ValueDiff>> {
        if !self.has_differences() {
            return None;
        }
        let mut materializer = Materializer::default();
        Some(materializer.build(self))
    }

    /// Recompute every contribution of this pair and, recursively, of every
    /// nested pair reached.
    pub(crate) fn update_diffs(self: &Arc<Self>, run: &mut OneShot) -> Result<(), ExError> {
        run.done.insert(Arc::as_ptr(self) as usize);
        run.path.push(self.clone());
        let result = self.update_all(run);
        run.path.pop();
        result
    }

    fn update_all(self: &Arc<Self>, run: &mut OneShot) -> Result<(), ExError> {
        let (x, y) = (self.pair.x().clone(), self.pair.y().clone());
        let shape = x.shape();
        let members = self.settings.members_of(shape)?;
        for (ordinal, member) in members.iter().enumerate() {
            let slot = Slot::Member {
                ordinal,
                member: *member,
            };
            self.update_slot(slot, x.get(member), y.get(member), run)?;
        }

        if shape.is_collection() {
            let len = x.item_count().unwrap_or(0).max(y.item_count().unwrap_or(0));
            for index in 0..len {
                self.update_slot(Slot::Index(index), x.item(index), y.item(index), run)?;
            }
            self.clear_indexes_from(len);
        }
        Ok(())
    }

    fn update_slot(
        self: &Arc<Self>,
        slot: Slot,
        xv: Value,
        yv: Value,
        run: &mut OneShot,
    ) -> Result<(), ExError> {
        let owner = self.pair.x().shape();
        let entry = match classify(&xv, &yv, slot, owner, &self.settings)? {
            Strategy::Equal => None,
            Strategy::Differs => Some(Entry::Value { x: xv, y: yv }),
            Strategy::Nested(xo, yo) => {
                let target = self.nested_target(slot, &xo, &yo, run)?;
                Some(Entry::Nested {
                    x: xv,
                    y: yv,
                    target,
                })
            }
        };
        self.record(slot, entry);
        Ok(())
    }

    fn nested_target(
        &self,
        slot: Slot,
        xo: &ObjRef,
        yo: &ObjRef,
        run: &mut OneShot,
    ) -> Result<Weak<DiffBuilder>, ExError> {
        let pair = IdentityPair::get_or_create(xo, yo);
        if let Some(ancestor) = run.path.iter().find(|b| Arc::ptr_eq(&b.pair, &pair)) {
            if self.settings.reference_handling() != ReferenceHandling::StructuralWithReferenceLoops {
                return Err(reference_loop(slot, self.pair.x().shape(), xo.shape()));
            }
            return Ok(Arc::downgrade(ancestor));
        }

        let handle = DiffBuilder::get_or_create(&pair, &self.settings)?;
        let builder = handle.arc().clone();
        run.scope.push(handle);
        if !run.done.contains(&(Arc::as_ptr(&builder) as usize)) {
            builder.update_diffs(run)?;
        }
        Ok(Arc::downgrade(&builder))
    }
}

/// State of one recursive recomputation
#[derive(Default)]
pub(crate) struct OneShot {
    /// builders on the current recursion path
    path: Vec<Arc<DiffBuilder>>,
    /// builders already recomputed in this run
    done: HashSet<usize>,
    /// keeps nested builders cached until the result is materialized
    scope: Vec<RefCounted<DiffBuilder>>,
}

#[derive(Default)]
struct Materializer {
    path: Vec<(usize, Weak<ValueDiff>)>,
    done: HashMap<usize, Arc<ValueDiff>>,
    dirty: HashMap<usize, bool>,
}

impl Materializer {
    fn has_differences(&mut self, builder: &Arc<DiffBuilder>) -> bool {
        *self
            .dirty
            .entry(Arc::as_ptr(builder) as usize)
            .or_insert_with(|| builder.has_differences())
    }

    fn build(&mut self, builder: &Arc<DiffBuilder>) -> Arc<ValueDiff> {
        let id = Arc::as_ptr(builder) as usize;
        let entries: Vec<(DiffKey, Entry)> = {
            let state = builder.state.lock();
            state.entries().map(|(k, e)| (k, e.clone())).collect()
        };

        let diff = Arc::new_cyclic(|me: &Weak<ValueDiff>| {
            self.path.push((id, me.clone()));
            let mut diffs = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                match entry {
                    Entry::Value { x, y } => diffs.push(SubDiff::value(key, x, y)),
                    Entry::Nested { x, y, target } => {
                        let Some(target) = target.upgrade() else {
                            continue;
                        };
                        if !self.has_differences(&target) {
                            continue;
                        }
                        let target_id = Arc::as_ptr(&target) as usize;
                        let nested = if let Some((_, weak)) =
                            self.path.iter().find(|(p, _)| *p == target_id)
                        {
                            NestedDiff::Ancestor(weak.clone())
                        } else if let Some(done) = self.done.get(&target_id) {
                            NestedDiff::Shared(done.clone())
                        } else {
                            NestedDiff::Shared(self.build(&target))
                        };
                        diffs.push(SubDiff::nested(key, x, y, nested));
                    }
                }
            }
            self.path.pop();
            ValueDiff::new(
                Value::Object(builder.pair.x().clone()),
                Value::Object(builder.pair.y().clone()),
                diffs,
            )
        });
        self.done.insert(id, diff.clone());
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObservableList;

    fn lists(a: &[i64], b: &[i64]) -> (Arc<ObservableList>, Arc<ObservableList>) {
        (
            Arc::new(ObservableList::with_items(a.iter().copied())),
            Arc::new(ObservableList::with_items(b.iter().copied())),
        )
    }

    fn builder_for(
        x: &Arc<ObservableList>,
        y: &Arc<ObservableList>,
    ) -> RefCounted<DiffBuilder> {
        let pair = IdentityPair::get_or_create(&ObjRef::from(x.clone()), &ObjRef::from(y.clone()));
        DiffBuilder::get_or_create(&pair, &Settings::get_or_create(ReferenceHandling::Structural))
            .unwrap()
    }

    #[test]
    fn test_record_reports_changes_only() {
        let (x, y) = lists(&[], &[]);
        let builder = builder_for(&x, &y);
        let entry = || Entry::Value {
            x: Value::from(1),
            y: Value::Missing,
        };

        assert!(builder.record(Slot::Index(0), Some(entry())));
        assert!(!builder.record(Slot::Index(0), Some(entry())));
        assert_eq!(builder.index_bound(), 1);
        assert!(builder.record(Slot::Index(0), None));
        assert!(!builder.record(Slot::Index(0), None));
        assert_eq!(builder.index_bound(), 0);
    }

    #[test]
    fn test_update_diffs_pads_shorter_side() {
        let (x, y) = lists(&[1, 2], &[3]);
        let builder = builder_for(&x, &y);
        builder.arc().update_diffs(&mut OneShot::default()).unwrap();

        let diff = builder.arc().create_value_diff().unwrap();
        assert_eq!(
            diff.to_string_with("", " "),
            "ObservableList [0] x: 1 y: 3 [1] x: 2 y: missing item"
        );
    }

    #[test]
    fn test_shrinking_clears_stale_indexes() {
        let (x, y) = lists(&[1, 2], &[1]);
        let builder = builder_for(&x, &y);
        builder.arc().update_diffs(&mut OneShot::default()).unwrap();
        assert!(builder.arc().has_differences());

        x.remove(1);
        builder.arc().update_diffs(&mut OneShot::default()).unwrap();
        assert!(!builder.arc().has_differences());
        assert!(builder.arc().create_value_diff().is_none());
    }

    #[test]
    fn test_nested_lists_share_builders() {
        let (ix, iy) = lists(&[1], &[2]);
        let x = Arc::new(ObservableList::with_items([Value::from(ix)]));
        let y = Arc::new(ObservableList::with_items([Value::from(iy)]));
        let builder = builder_for(&x, &y);
        let mut run = OneShot::default();
        builder.arc().update_diffs(&mut run).unwrap();

        let diff = builder.arc().create_value_diff().unwrap();
        assert_eq!(
            diff.to_string_with("", " "),
            "ObservableList [0] [0] x: 1 y: 2"
        );
        assert_eq!(run.scope.len(), 1);
    }
}
