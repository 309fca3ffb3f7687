//! Single-sided change source.
//!
//! One [`SourceNode`] per instance and settings subscribes to the instance's
//! notifier exactly once and re-broadcasts typed events to every pair node
//! that compares this instance against something.

use super::cycle;
use crate::cache::{self, Disposable, RefCounted};
use crate::errors::{ExError, StateError};
use crate::object::{Change, MemberInfo, ObjRef, Observers, Subscription};
use crate::settings::Settings;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// A change resolved against the settings' member selection
#[derive(Debug, Clone, Copy)]
pub(crate) enum SourceEvent {
    Member(&'static MemberInfo),
    /// Any or all members changed
    Members,
    Add { index: usize },
    Remove { index: usize },
    Replace { index: usize },
    Move { from: usize, to: usize },
    Reset,
}

pub(crate) struct SourceNode {
    source: ObjRef,
    settings: Arc<Settings>,
    events: Observers<SourceEvent>,
    subscription: Mutex<Option<Subscription>>,
}

impl Disposable for SourceNode {
    fn dispose(&self) {
        let subscription = self.subscription.lock().take();
        drop(subscription);
        tracing::trace!(source = %self.source, "source node disposed");
    }
}

impl SourceNode {
    /// # Errors
    ///
    /// `NotTrackable` when `source` has no notifier.
    pub(crate) fn get_or_create(
        source: &ObjRef,
        settings: &Arc<Settings>,
    ) -> Result<RefCounted<SourceNode>, ExError> {
        if source.notifier().is_none() {
            return Err(StateError::NotTrackable {
                type_name: source.shape().name.to_string(),
            }
            .into());
        }
        cache::get_or_add(source.clone(), settings, || {
            let node = Arc::new_cyclic(|me: &Weak<SourceNode>| {
                let me = me.clone();
                let subscription = source.notifier().map(|notifier| {
                    notifier.subscribe(move |change: &Change| {
                        if let Some(node) = me.upgrade() {
                            node.forward(change);
                        }
                    })
                });
                SourceNode {
                    source: source.clone(),
                    settings: settings.clone(),
                    events: Observers::new(),
                    subscription: Mutex::new(subscription),
                }
            });
            Ok(node)
        })
    }

    pub(crate) fn events(&self) -> &Observers<SourceEvent> {
        &self.events
    }

    fn resolve(&self, change: &Change) -> Option<SourceEvent> {
        let event = match *change {
            Change::Member(None) => SourceEvent::Members,
            Change::Member(Some(name)) => {
                let shape = self.source.shape();
                let member = shape.member(name)?;
                // ignored, unselected or unknown members produce no event
                self.settings.ordinal_of(shape, member).ok().flatten()?;
                SourceEvent::Member(member)
            }
            Change::Add { index } => SourceEvent::Add { index },
            Change::Remove { index } => SourceEvent::Remove { index },
            Change::Replace { index } => SourceEvent::Replace { index },
            Change::Move { from, to } => SourceEvent::Move { from, to },
            Change::Reset => SourceEvent::Reset,
        };
        Some(event)
    }

    fn forward(&self, change: &Change) {
        match self.resolve(change) {
            Some(event) => {
                tracing::trace!(source = %self.source, ?event, "source changed");
                // every pair node fed by this instance recomputes in one cycle
                cycle::batched(|| self.events.notify(&event));
            }
            None => tracing::trace!(source = %self.source, ?change, "change not tracked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObservableList;
    use crate::settings::ReferenceHandling;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_one_subscription_per_instance() {
        let list = Arc::new(ObservableList::new());
        let source = ObjRef::from(list.clone());
        let settings = Settings::get_or_create(ReferenceHandling::Structural);

        let a = SourceNode::get_or_create(&source, &settings).unwrap();
        let b = SourceNode::get_or_create(&source, &settings).unwrap();
        assert!(Arc::ptr_eq(a.arc(), b.arc()));
        assert_eq!(source.notifier().unwrap().handler_count(), 1);

        drop(a);
        drop(b);
        assert_eq!(source.notifier().unwrap().handler_count(), 0);
    }

    #[test]
    fn test_collection_changes_are_forwarded() {
        let list = Arc::new(ObservableList::new());
        let source = ObjRef::from(list.clone());
        let settings = Settings::get_or_create(ReferenceHandling::Structural);
        let node = SourceNode::get_or_create(&source, &settings).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = node.events().subscribe(move |event| {
            if let SourceEvent::Add { index } = event {
                assert_eq!(*index, 0);
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        list.push(1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
