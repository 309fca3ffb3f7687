//! Update-cycle token.
//!
//! Every notification entering the tracker graph (or a consumer-driven
//! refresh) opens one cycle. The token travels down the recompute call chain
//! and its id travels up with the `changed` events, so a node re-emits at
//! most once per cycle no matter how many paths reach it.
//!
//! A source notification reaches every pair node comparing that instance.
//! [`batched`] spans the whole dispatch: all of those nodes recompute under
//! one cycle id and their `changed` events are held back until the last of
//! them is done, so no observer sees a half-updated tree.

use super::node::ChangeTrackerNode;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CYCLE: AtomicU64 = AtomicU64::new(1);

struct Batch {
    id: u64,
    depth: usize,
    /// nodes whose diff changed, announced when the batch closes
    pending: Vec<Arc<ChangeTrackerNode>>,
}

thread_local! {
    static BATCH: RefCell<Option<Batch>> = const { RefCell::new(None) };
}

fn fresh_id() -> u64 {
    NEXT_CYCLE.fetch_add(1, Ordering::Relaxed)
}

struct Scope;

impl Scope {
    fn open() -> Self {
        BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            match batch.as_mut() {
                Some(open) => open.depth += 1,
                None => {
                    *batch = Some(Batch {
                        id: fresh_id(),
                        depth: 1,
                        pending: Vec::new(),
                    })
                }
            }
        });
        Scope
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let closed = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            match batch.as_mut() {
                Some(open) if open.depth > 1 => {
                    open.depth -= 1;
                    None
                }
                _ => batch.take(),
            }
        });
        let Some(closed) = closed else {
            return;
        };
        if std::thread::panicking() {
            return;
        }
        tracing::trace!(
            cycle = closed.id,
            nodes = closed.pending.len(),
            "update cycle closed"
        );
        for node in closed.pending {
            node.emit(closed.id);
        }
    }
}

/// Run `f` as one update cycle on this thread.
///
/// Nested calls join the open cycle. Nodes announced while it runs emit
/// `changed` after the outermost call's `f` returns.
pub(crate) fn batched<R>(f: impl FnOnce() -> R) -> R {
    let _scope = Scope::open();
    f()
}

/// Emit `changed` for `node` now, or when the open batch closes
pub(crate) fn announce(node: Arc<ChangeTrackerNode>, cycle: u64) {
    let deferred = BATCH.with(|batch| match batch.borrow_mut().as_mut() {
        Some(open) if open.id == cycle => {
            if !open.pending.iter().any(|n| Arc::ptr_eq(n, &node)) {
                open.pending.push(node.clone());
            }
            true
        }
        _ => false,
    });
    if !deferred {
        node.emit(cycle);
    }
}

pub(crate) struct UpdateCycle {
    id: u64,
    /// nodes whose recompute is on the current call stack, outermost first
    path: Vec<Arc<ChangeTrackerNode>>,
}

impl UpdateCycle {
    /// Join the batch open on this thread, or start a cycle of its own
    pub(crate) fn next() -> Self {
        let id = BATCH
            .with(|batch| batch.borrow().as_ref().map(|open| open.id))
            .unwrap_or_else(fresh_id);
        Self {
            id,
            path: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn path(&self) -> &[Arc<ChangeTrackerNode>] {
        &self.path
    }

    pub(crate) fn enter(&mut self, node: Arc<ChangeTrackerNode>) {
        self.path.push(node);
    }

    pub(crate) fn leave(&mut self) {
        self.path.pop();
    }
}
