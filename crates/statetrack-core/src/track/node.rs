//! Change-tracker node.
//!
//! One node per identity pair and settings, shared through the cache. A node
//! listens to both sides of its pair, keeps the pair's [`DiffBuilder`]
//! current and owns one child node per differing nested pair.
//!
//! ## Guarantees
//!
//! - **Lifecycle**: `Constructing → Live → Disposed`. A node that fails to
//!   construct is never inserted in the cache and holds no subscription.
//! - **Ownership**: parents own children through cache handles. A child that
//!   closes a reference loop links to its ancestor weakly, so loops never
//!   keep themselves alive.
//! - **Lock discipline**: a node never calls into another node, a builder or
//!   an observer list while holding its own state lock.
//! - **One event per cycle**: `changed` fires at most once per update cycle,
//!   and only after every node reached by the cycle has recomputed.

use super::cycle::{self, UpdateCycle};
use super::source::{SourceEvent, SourceNode};
use crate::cache::{self, Disposable, RefCounted};
use crate::diff::builder::{DiffBuilder, Entry};
use crate::diff::classify::{classify, reference_loop, Slot, Strategy};
use crate::diff::{DiffKey, ValueDiff};
use crate::errors::ExError;
use crate::object::{Observers, Subscription, Value};
use crate::pairing::IdentityPair;
use crate::settings::{ReferenceHandling, Settings};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Raised after a node's diff changed during update cycle `cycle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeChanged {
    pub cycle: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Constructing,
    Live,
    Disposed,
}

enum ChildLink {
    Owned(RefCounted<ChangeTrackerNode>),
    /// Closes a reference loop back to an ancestor
    Back(Weak<ChangeTrackerNode>),
}

struct Child {
    link: ChildLink,
    slot: Slot,
    owner: Weak<ChangeTrackerNode>,
    _subscription: Subscription,
}

impl Child {
    fn target(&self) -> Weak<ChangeTrackerNode> {
        match &self.link {
            ChildLink::Owned(handle) => Arc::downgrade(handle.arc()),
            ChildLink::Back(weak) => weak.clone(),
        }
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        match &self.link {
            ChildLink::Owned(handle) => handle.remove_owner(&self.owner),
            ChildLink::Back(weak) => {
                if let Some(target) = weak.upgrade() {
                    target.remove_dependent(&self.owner, self.slot.key());
                }
            }
        }
    }
}

struct NodeState {
    phase: Phase,
    sources: Vec<RefCounted<SourceNode>>,
    subscriptions: Vec<Subscription>,
    builder: Option<RefCounted<DiffBuilder>>,
    children: HashMap<DiffKey, Child>,
    /// parents holding an owned handle on this node, once per link
    owners: Vec<Weak<ChangeTrackerNode>>,
    /// descendants linking back to this node
    dependents: Vec<(Weak<ChangeTrackerNode>, Slot)>,
    last_cycle: u64,
    fault: Option<ExError>,
}

/// Live comparison of one identity pair
pub struct ChangeTrackerNode {
    serial: u64,
    pair: Arc<IdentityPair>,
    settings: Arc<Settings>,
    me: Weak<ChangeTrackerNode>,
    state: Mutex<NodeState>,
    changed: Observers<NodeChanged>,
}

impl Disposable for ChangeTrackerNode {
    fn dispose(&self) {
        let (subscriptions, children, builder, sources, dependents) = {
            let mut state = self.state.lock();
            state.phase = Phase::Disposed;
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.children),
                state.builder.take(),
                std::mem::take(&mut state.sources),
                std::mem::take(&mut state.dependents),
            )
        };
        drop(subscriptions);
        drop(children);
        drop(builder);
        drop(sources);
        tracing::debug!(pair = %self.pair, node = self.serial, "tracker node disposed");

        for (dependent, slot) in dependents {
            if let Some(dependent) = dependent.upgrade() {
                dependent.relink(slot);
            }
        }
    }
}

impl ChangeTrackerNode {
    /// Shared live node for `pair`, built and started on first use.
    ///
    /// # Errors
    ///
    /// Any configuration error met while building the initial diff, including
    /// `NotTrackable` for a side without a notifier.
    pub(crate) fn acquire(
        pair: &Arc<IdentityPair>,
        settings: &Arc<Settings>,
        cycle: &mut UpdateCycle,
    ) -> Result<RefCounted<ChangeTrackerNode>, ExError> {
        cache::get_or_add(pair.clone(), settings, || {
            let node = Arc::new_cyclic(|me: &Weak<ChangeTrackerNode>| ChangeTrackerNode {
                serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
                pair: pair.clone(),
                settings: settings.clone(),
                me: me.clone(),
                state: Mutex::new(NodeState {
                    phase: Phase::Constructing,
                    sources: Vec::new(),
                    subscriptions: Vec::new(),
                    builder: None,
                    children: HashMap::new(),
                    owners: Vec::new(),
                    dependents: Vec::new(),
                    last_cycle: 0,
                    fault: None,
                }),
                changed: Observers::new(),
            });
            node.start(cycle)?;
            Ok(node)
        })
    }

    fn start(self: &Arc<Self>, cycle: &mut UpdateCycle) -> Result<(), ExError> {
        let x_source = SourceNode::get_or_create(self.pair.x(), &self.settings)?;
        let y_source = SourceNode::get_or_create(self.pair.y(), &self.settings)?;
        let builder = DiffBuilder::get_or_create(&self.pair, &self.settings)?;
        self.state.lock().builder = Some(builder);

        cycle.enter(self.clone());
        let built = self
            .rebuild_members(cycle)
            .and_then(|_| self.rebuild_indexes(cycle));
        cycle.leave();
        built?;

        let subscriptions: Vec<Subscription> = [&x_source, &y_source]
            .iter()
            .map(|source| {
                let me = self.me.clone();
                source.events().subscribe(move |event: &SourceEvent| {
                    if let Some(node) = me.upgrade() {
                        node.on_source(*event);
                    }
                })
            })
            .collect();

        let mut state = self.state.lock();
        state.sources = vec![x_source, y_source];
        state.subscriptions = subscriptions;
        state.phase = Phase::Live;
        drop(state);

        tracing::debug!(pair = %self.pair, node = self.serial, "tracker node live");
        Ok(())
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn pair(&self) -> &Arc<IdentityPair> {
        &self.pair
    }

    pub fn changed(&self) -> &Observers<NodeChanged> {
        &self.changed
    }

    /// Last error raised while handling a notification
    pub fn fault(&self) -> Option<ExError> {
        self.state.lock().fault.clone()
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().phase == Phase::Disposed
    }

    fn is_live(&self) -> bool {
        self.state.lock().phase == Phase::Live
    }

    fn builder(&self) -> Option<Arc<DiffBuilder>> {
        self.state.lock().builder.as_ref().map(|b| b.arc().clone())
    }

    pub fn has_differences(&self) -> bool {
        self.builder().is_some_and(|b| b.has_differences())
    }

    /// Current diff, `None` when nothing differs
    pub fn diff(&self) -> Option<Arc<ValueDiff>> {
        self.builder().and_then(|b| b.create_value_diff())
    }

    /// Rebuild every member and element contribution in one update cycle.
    ///
    /// # Errors
    ///
    /// The first configuration error met; it is also stored as the fault.
    pub fn refresh(self: &Arc<Self>) -> Result<(), ExError> {
        let mut cycle = UpdateCycle::next();
        cycle.enter(self.clone());
        let result = self
            .rebuild_members(&mut cycle)
            .and_then(|_| self.rebuild_indexes(&mut cycle));
        cycle.leave();
        // a refresh always reports, even when nothing moved
        self.finish(cycle.id(), result.map(|_| true))
    }

    fn add_owner(&self, owner: &Weak<ChangeTrackerNode>) {
        let mut state = self.state.lock();
        state.owners.retain(|w| w.strong_count() > 0);
        state.owners.push(owner.clone());
    }

    fn remove_owner(&self, owner: &Weak<ChangeTrackerNode>) {
        let mut state = self.state.lock();
        if let Some(i) = state.owners.iter().position(|w| w.ptr_eq(owner)) {
            state.owners.swap_remove(i);
        }
    }

    fn add_dependent(&self, dependent: &Weak<ChangeTrackerNode>, slot: Slot) {
        self.state.lock().dependents.push((dependent.clone(), slot));
    }

    fn remove_dependent(&self, dependent: &Weak<ChangeTrackerNode>, key: DiffKey) {
        let mut state = self.state.lock();
        if let Some(i) = state
            .dependents
            .iter()
            .position(|(w, slot)| w.ptr_eq(dependent) && slot.key() == key)
        {
            state.dependents.swap_remove(i);
        }
    }

    fn owners(&self) -> Vec<Arc<ChangeTrackerNode>> {
        self.state
            .lock()
            .owners
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// The node for `pair` among the ancestors of this node, if any.
    ///
    /// Ancestors are the nodes on the current recompute path and everything
    /// reachable from them through owning parents.
    fn find_ancestor(
        self: &Arc<Self>,
        pair: &Arc<IdentityPair>,
        cycle: &UpdateCycle,
    ) -> Option<Arc<ChangeTrackerNode>> {
        let mut visited = HashSet::new();
        let mut pending: Vec<Arc<ChangeTrackerNode>> = cycle.path().to_vec();
        pending.push(self.clone());
        while let Some(node) = pending.pop() {
            if !visited.insert(Arc::as_ptr(&node) as usize) || node.is_disposed() {
                continue;
            }
            if Arc::ptr_eq(&node.pair, pair) {
                return Some(node);
            }
            pending.extend(node.owners());
        }
        None
    }

    fn subscribe_child(&self, child: &ChangeTrackerNode) -> Subscription {
        let me = self.me.clone();
        child.changed.subscribe(move |event: &NodeChanged| {
            if let Some(node) = me.upgrade() {
                node.emit(event.cycle);
            }
        })
    }

    fn update_slot(
        self: &Arc<Self>,
        slot: Slot,
        xv: Value,
        yv: Value,
        cycle: &mut UpdateCycle,
    ) -> Result<bool, ExError> {
        let Some(builder) = self.builder() else {
            return Ok(false);
        };
        let owner = self.pair.x().shape();
        let key = slot.key();

        let (entry, child) = match classify(&xv, &yv, slot, owner, &self.settings)? {
            Strategy::Equal => (None, None),
            Strategy::Differs => (Some(Entry::Value { x: xv, y: yv }), None),
            Strategy::Nested(xo, yo) => {
                let pair = IdentityPair::get_or_create(&xo, &yo);
                let current = self.state.lock().children.get(&key).map(Child::target);
                let current = current
                    .and_then(|w| w.upgrade())
                    .filter(|n| Arc::ptr_eq(&n.pair, &pair) && !n.is_disposed());
                let (target, child) = match current {
                    Some(node) => (node, None),
                    None => {
                        let child = self.link_child(slot, &pair, cycle)?;
                        match child.target().upgrade() {
                            Some(node) => (node, Some(child)),
                            None => return Ok(false),
                        }
                    }
                };
                let Some(target) = target.builder() else {
                    return Ok(false);
                };
                let entry = Entry::Nested {
                    x: xv,
                    y: yv,
                    target: Arc::downgrade(&target),
                };
                (Some(entry), child)
            }
        };

        let keep_child = matches!(entry, Some(Entry::Nested { .. })) && child.is_none();
        let replaced = if keep_child {
            None
        } else {
            let mut state = self.state.lock();
            match child {
                Some(child) => state.children.insert(key, child),
                None => state.children.remove(&key),
            }
        };
        let child_changed = replaced.is_some();
        drop(replaced);

        let recorded = builder.record(slot, entry);
        tracing::trace!(
            pair = %self.pair,
            node = self.serial,
            member = %key,
            changed = recorded || child_changed,
            "slot updated"
        );
        Ok(recorded || child_changed)
    }

    fn link_child(
        self: &Arc<Self>,
        slot: Slot,
        pair: &Arc<IdentityPair>,
        cycle: &mut UpdateCycle,
    ) -> Result<Child, ExError> {
        if let Some(ancestor) = self.find_ancestor(pair, cycle) {
            if self.settings.reference_handling() != ReferenceHandling::StructuralWithReferenceLoops {
                return Err(reference_loop(slot, self.pair.x().shape(), pair.x().shape()));
            }
            tracing::trace!(pair = %pair, node = ancestor.serial, "linking back to ancestor");
            ancestor.add_dependent(&self.me, slot);
            return Ok(Child {
                _subscription: self.subscribe_child(&ancestor),
                link: ChildLink::Back(Arc::downgrade(&ancestor)),
                slot,
                owner: self.me.clone(),
            });
        }

        let handle = ChangeTrackerNode::acquire(pair, &self.settings, cycle)?;
        handle.add_owner(&self.me);
        Ok(Child {
            _subscription: self.subscribe_child(&handle),
            link: ChildLink::Owned(handle),
            slot,
            owner: self.me.clone(),
        })
    }

    fn update(self: &Arc<Self>, slot: Slot, cycle: &mut UpdateCycle) -> Result<bool, ExError> {
        let (x, y) = (self.pair.x(), self.pair.y());
        let (xv, yv) = match slot {
            Slot::Member { member, .. } => (x.get(member), y.get(member)),
            Slot::Index(index) => (x.item(index), y.item(index)),
        };
        self.update_slot(slot, xv, yv, cycle)
    }

    fn rebuild_members(self: &Arc<Self>, cycle: &mut UpdateCycle) -> Result<bool, ExError> {
        let members = self.settings.members_of(self.pair.x().shape())?;
        let mut changed = false;
        for (ordinal, member) in members.iter().enumerate() {
            let slot = Slot::Member {
                ordinal,
                member: *member,
            };
            changed |= self.update(slot, cycle)?;
        }
        Ok(changed)
    }

    fn item_bound(&self) -> usize {
        let x = self.pair.x().item_count().unwrap_or(0);
        let y = self.pair.y().item_count().unwrap_or(0);
        x.max(y)
    }

    fn update_index_range(
        self: &Arc<Self>,
        from: usize,
        to: usize,
        cycle: &mut UpdateCycle,
    ) -> Result<bool, ExError> {
        let mut changed = false;
        for index in from..to {
            changed |= self.update(Slot::Index(index), cycle)?;
        }
        Ok(changed)
    }

    /// Drop index contributions at or past the longer side's end
    fn trim_indexes(&self) -> bool {
        let bound = self.item_bound();
        let removed: Vec<Child> = {
            let mut state = self.state.lock();
            let stale: Vec<DiffKey> = state
                .children
                .keys()
                .filter(|k| k.index().is_some_and(|i| i >= bound))
                .copied()
                .collect();
            stale
                .iter()
                .filter_map(|k| state.children.remove(k))
                .collect()
        };
        let cleared = self
            .builder()
            .is_some_and(|b| b.clear_indexes_from(bound));
        !removed.is_empty() || cleared
    }

    fn rebuild_indexes(self: &Arc<Self>, cycle: &mut UpdateCycle) -> Result<bool, ExError> {
        if !self.pair.x().shape().is_collection() {
            return Ok(false);
        }
        let changed = self.update_index_range(0, self.item_bound(), cycle)?;
        Ok(self.trim_indexes() | changed)
    }

    fn apply(self: &Arc<Self>, event: SourceEvent, cycle: &mut UpdateCycle) -> Result<bool, ExError> {
        match event {
            SourceEvent::Member(member) => {
                let Some(ordinal) = self.settings.ordinal_of(self.pair.x().shape(), member)? else {
                    return Ok(false);
                };
                self.update(Slot::Member { ordinal, member }, cycle)
            }
            SourceEvent::Members => self.rebuild_members(cycle),
            SourceEvent::Add { index } | SourceEvent::Remove { index } => {
                let upper = self
                    .item_bound()
                    .max(self.builder().map_or(0, |b| b.index_bound()));
                let changed = self.update_index_range(index, upper, cycle)?;
                Ok(self.trim_indexes() | changed)
            }
            SourceEvent::Replace { index } => self.update(Slot::Index(index), cycle),
            SourceEvent::Move { from, to } => {
                self.update_index_range(from.min(to), from.max(to) + 1, cycle)
            }
            SourceEvent::Reset => {
                let cleared: Vec<Child> = {
                    let mut state = self.state.lock();
                    let keys: Vec<DiffKey> = state
                        .children
                        .keys()
                        .filter(|k| k.index().is_some())
                        .copied()
                        .collect();
                    keys.iter().filter_map(|k| state.children.remove(k)).collect()
                };
                let had_entries = self.builder().is_some_and(|b| b.clear_indexes_from(0));
                drop(cleared);
                let rebuilt = self.rebuild_indexes(cycle)?;
                Ok(had_entries || rebuilt)
            }
        }
    }

    /// Record the outcome of a cycle: store a fault or announce the change
    fn finish(self: &Arc<Self>, cycle: u64, result: Result<bool, ExError>) -> Result<(), ExError> {
        match result {
            Ok(true) => {
                cycle::announce(self.clone(), cycle);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => {
                tracing::error!(
                    pair = %self.pair,
                    node = self.serial,
                    err.code = err.code(),
                    "{}",
                    err.message()
                );
                self.state.lock().fault = Some(err.clone());
                Err(err)
            }
        }
    }

    fn on_source(self: &Arc<Self>, event: SourceEvent) {
        if !self.is_live() {
            return;
        }
        let mut cycle = UpdateCycle::next();
        tracing::trace!(
            pair = %self.pair,
            node = self.serial,
            cycle = cycle.id(),
            ?event,
            "source event"
        );
        cycle.enter(self.clone());
        let result = self.apply(event, &mut cycle);
        cycle.leave();
        // the fault is stored and logged; notification handlers cannot propagate it
        let _ = self.finish(cycle.id(), result);
    }

    /// Raise `changed` unless it was already raised for `cycle`
    pub(crate) fn emit(&self, cycle: u64) {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Live || state.last_cycle == cycle {
                return;
            }
            state.last_cycle = cycle;
        }
        self.changed.notify(&NodeChanged { cycle });
    }

    /// Recompute `slot` after the ancestor it linked back to went away
    fn relink(self: &Arc<Self>, slot: Slot) {
        if !self.is_live() {
            return;
        }
        let mut cycle = UpdateCycle::next();
        cycle.enter(self.clone());
        let result = self.update(slot, &mut cycle);
        cycle.leave();
        let _ = self.finish(cycle.id(), result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjRef, Object, ObservableList};

    fn track(
        x: &Arc<ObservableList>,
        y: &Arc<ObservableList>,
        handling: ReferenceHandling,
    ) -> Result<RefCounted<ChangeTrackerNode>, ExError> {
        let pair = IdentityPair::get_or_create(&ObjRef::from(x.clone()), &ObjRef::from(y.clone()));
        ChangeTrackerNode::acquire(
            &pair,
            &Settings::get_or_create(handling),
            &mut UpdateCycle::next(),
        )
    }

    #[test]
    fn test_initial_diff_and_updates() {
        let x = Arc::new(ObservableList::with_items([1, 2]));
        let y = Arc::new(ObservableList::with_items([1]));
        let node = track(&x, &y, ReferenceHandling::Structural).unwrap();
        assert!(node.has_differences());

        y.push(2);
        assert!(!node.has_differences());
        assert!(node.diff().is_none());
    }

    #[test]
    fn test_changed_fires_once_per_cycle() {
        let x = Arc::new(ObservableList::new());
        let y = Arc::new(ObservableList::new());
        let node = track(&x, &y, ReferenceHandling::Structural).unwrap();

        let cycles = Arc::new(Mutex::new(Vec::new()));
        let seen = cycles.clone();
        let _sub = node.changed().subscribe(move |e| seen.lock().push(e.cycle));

        x.push(1);
        x.push(2);
        let cycles = cycles.lock();
        assert_eq!(cycles.len(), 2);
        assert_ne!(cycles[0], cycles[1]);
    }

    #[test]
    fn test_nested_child_is_owned_and_released() {
        let ix = Arc::new(ObservableList::with_items([1]));
        let iy = Arc::new(ObservableList::with_items([2]));
        let x = Arc::new(ObservableList::with_items([Value::from(ix.clone())]));
        let y = Arc::new(ObservableList::with_items([Value::from(iy.clone())]));
        let settings = Settings::get_or_create(ReferenceHandling::Structural);
        let inner = IdentityPair::get_or_create(&ObjRef::from(ix.clone()), &ObjRef::from(iy.clone()));

        let node = track(&x, &y, ReferenceHandling::Structural).unwrap();
        assert_eq!(
            cache::handle_count::<Arc<IdentityPair>, ChangeTrackerNode>(&inner, &settings),
            1
        );

        iy.set(0, 1);
        assert!(!node.has_differences());

        drop(node);
        assert_eq!(
            cache::handle_count::<Arc<IdentityPair>, ChangeTrackerNode>(&inner, &settings),
            0
        );
        assert_eq!(ix.notifier().map(|n| n.handler_count()), Some(0));
    }

    #[test]
    fn test_fault_is_recorded_for_runtime_errors() {
        let x = Arc::new(ObservableList::new());
        let y = Arc::new(ObservableList::new());
        let node = track(&x, &y, ReferenceHandling::Throw).unwrap();

        x.push(Arc::new(ObservableList::new()));
        y.push(Arc::new(ObservableList::new()));
        let fault = node.fault().unwrap();
        assert_eq!(fault.code(), "ERR_AMBIGUOUS_REFERENCE_HANDLING");
    }
}
