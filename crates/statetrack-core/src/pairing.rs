//! Canonical identity pairs.
//!
//! [`IdentityPair::get_or_create`] returns the same `Arc` for the same ordered
//! pair of instances for as long as any holder keeps that `Arc` alive. The
//! process-wide table holds only weak references, so it never extends the
//! lifetime of a pair or of the instances a pair refers to.

use crate::object::ObjRef;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};

type PairTable = Mutex<HashMap<(usize, usize), Weak<IdentityPair>>>;

fn table() -> &'static PairTable {
    static TABLE: OnceLock<PairTable> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Ordered pair `(x, y)` compared by instance identity
pub struct IdentityPair {
    x: ObjRef,
    y: ObjRef,
}

impl IdentityPair {
    pub fn get_or_create(x: &ObjRef, y: &ObjRef) -> Arc<IdentityPair> {
        let key = (x.addr(), y.addr());
        let mut table = table().lock();
        if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let pair = Arc::new(IdentityPair {
            x: x.clone(),
            y: y.clone(),
        });
        table.insert(key, Arc::downgrade(&pair));
        pair
    }

    pub fn x(&self) -> &ObjRef {
        &self.x
    }

    pub fn y(&self) -> &ObjRef {
        &self.y
    }

    fn key(&self) -> (usize, usize) {
        (self.x.addr(), self.y.addr())
    }

}

impl Drop for IdentityPair {
    fn drop(&mut self) {
        let key = self.key();
        let mut table = table().lock();
        // a replacement may already sit under the same key
        if table
            .get(&key)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), self as *const IdentityPair))
        {
            table.remove(&key);
        }
    }
}

impl PartialEq for IdentityPair {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for IdentityPair {}

impl Hash for IdentityPair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for IdentityPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {:?})", self.x, self.y)
    }
}

impl fmt::Display for IdentityPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/{:#x}", self.x.addr(), self.y.addr())
    }
}
