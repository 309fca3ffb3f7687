//! The externally observed dirty-tracking handle.

use super::cycle::UpdateCycle;
use super::node::{ChangeTrackerNode, NodeChanged};
use crate::cache::RefCounted;
use crate::diff::ValueDiff;
use crate::errors::{ExError, StateError};
use crate::object::{ObjRef, Observers, Subscription};
use crate::pairing::IdentityPair;
use crate::settings::Settings;
use crate::verify::verify_can_track;
use crate::{log_op_end, log_op_error, log_op_start};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// A property of [`DirtyTracker`] that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerProperty {
    Diff,
    IsDirty,
}

struct Seen {
    is_dirty: bool,
    /// last update cycle reported to subscribers
    cycle: u64,
}

struct Shared {
    events: Observers<TrackerProperty>,
    seen: Mutex<Seen>,
}

impl Shared {
    fn on_changed(&self, node: &ChangeTrackerNode, cycle: u64) {
        let dirty = node.has_differences();
        let flipped = {
            let mut seen = self.seen.lock();
            if seen.cycle == cycle {
                return;
            }
            seen.cycle = cycle;
            let flipped = seen.is_dirty != dirty;
            seen.is_dirty = dirty;
            flipped
        };
        self.events.notify(&TrackerProperty::Diff);
        if flipped {
            self.events.notify(&TrackerProperty::IsDirty);
        }
    }
}

/// Keeps `is_dirty` and `diff` current while either side mutates.
///
/// Trackers for the same pair and settings share one underlying node.
/// Dropping the tracker releases its handle on that node.
pub struct DirtyTracker {
    // unsubscribe before the node handle is released
    _subscription: Subscription,
    node: RefCounted<ChangeTrackerNode>,
    shared: Arc<Shared>,
}

impl DirtyTracker {
    /// Whether the two graphs currently differ
    pub fn is_dirty(&self) -> bool {
        self.shared.seen.lock().is_dirty
    }

    /// The current diff, `None` when clean
    pub fn diff(&self) -> Option<Arc<ValueDiff>> {
        self.node.diff()
    }

    /// Receive a [`TrackerProperty`] after each update cycle that changed it
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TrackerProperty) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Last configuration error met while handling a notification
    pub fn fault(&self) -> Option<ExError> {
        self.node.fault()
    }

    /// Rebuild the whole comparison in one update cycle.
    ///
    /// # Errors
    ///
    /// The first configuration error met during the rebuild.
    pub fn refresh(&self) -> Result<(), ExError> {
        self.node.arc().refresh()
    }

    /// Serial of the shared underlying node
    pub fn node_serial(&self) -> u64 {
        self.node.serial()
    }
}

impl fmt::Debug for DirtyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtyTracker")
            .field("pair", &self.node.pair())
            .field("node", &self.node.serial())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

/// Start tracking the differences between `x` and `y`.
///
/// # Errors
///
/// - `ShapeMismatch` when the roots are of different types
/// - anything [`verify_can_track`] reports for the root type, before any
///   subscription is made
/// - `NotTrackable` when an instance that needs tracking has no notifier
/// - any configuration error [`compute_diff`](crate::diff::compute_diff) reports
pub fn begin_tracking(
    x: &ObjRef,
    y: &ObjRef,
    settings: &Arc<Settings>,
) -> Result<DirtyTracker, ExError> {
    log_op_start!(
        "begin_tracking",
        reference_handling = %settings.reference_handling(),
        type_name = x.shape().name
    );
    let start = std::time::Instant::now();

    let tracker = begin_tracking_impl(x, y, settings).map_err(|e| {
        let e = e.with_op("begin_tracking");
        log_op_error!(
            "begin_tracking",
            e.clone(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        e
    })?;

    log_op_end!(
        "begin_tracking",
        duration_ms = start.elapsed().as_millis() as u64,
        node = tracker.node_serial(),
        is_dirty = tracker.is_dirty()
    );
    Ok(tracker)
}

fn begin_tracking_impl(
    x: &ObjRef,
    y: &ObjRef,
    settings: &Arc<Settings>,
) -> Result<DirtyTracker, ExError> {
    if !std::ptr::eq(x.shape(), y.shape()) {
        return Err(StateError::ShapeMismatch {
            x_type: x.shape().name.to_string(),
            y_type: y.shape().name.to_string(),
        }
        .into());
    }

    verify_can_track(x.shape(), settings)?;

    let pair = IdentityPair::get_or_create(x, y);
    let node = ChangeTrackerNode::acquire(&pair, settings, &mut UpdateCycle::next())?;
    let shared = Arc::new(Shared {
        events: Observers::new(),
        seen: Mutex::new(Seen {
            is_dirty: node.has_differences(),
            cycle: 0,
        }),
    });

    let weak_node: Weak<ChangeTrackerNode> = Arc::downgrade(node.arc());
    let weak_shared = Arc::downgrade(&shared);
    let subscription = node.changed().subscribe(move |event: &NodeChanged| {
        if let (Some(node), Some(shared)) = (weak_node.upgrade(), weak_shared.upgrade()) {
            shared.on_changed(&node, event.cycle);
        }
    });

    Ok(DirtyTracker {
        _subscription: subscription,
        node,
        shared,
    })
}
