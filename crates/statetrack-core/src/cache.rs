//! Reference-counted identity cache.
//!
//! Payloads (diff builders, tracker nodes, source nodes) are shared per key
//! within a partition. A partition is selected by key type, payload type and
//! settings id.
//!
//! ## Guarantees
//!
//! - **One live payload per key**: a lookup either takes a new handle on the
//!   stored payload or builds one. A payload whose count reached zero has
//!   already left the partition, so it is never handed out again.
//! - **Exactly-once disposal**: the transition to zero and the removal happen
//!   under the partition lock; [`Disposable::dispose`] runs once, after the
//!   lock is released.
//! - **No lock across user code**: factories and disposal run unlocked, so a
//!   factory may acquire other entries of the same partition.

use crate::errors::{ExError, StateError};
use crate::settings::Settings;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

/// Cleanup hook run when the last handle goes away
pub trait Disposable: Send + Sync + 'static {
    fn dispose(&self);
}

struct Slot<V> {
    payload: Arc<V>,
    count: usize,
}

struct Partition<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
}

type PartitionKey = (TypeId, TypeId, u64);
type Registry = Mutex<HashMap<PartitionKey, Arc<dyn Any + Send + Sync>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn partition<K, V>(settings: &Settings) -> Result<Arc<Partition<K, V>>, ExError>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Disposable,
{
    let key = (TypeId::of::<K>(), TypeId::of::<V>(), settings.id());
    let erased = registry()
        .lock()
        .entry(key)
        .or_insert_with(|| {
            let fresh: Arc<dyn Any + Send + Sync> = Arc::new(Partition::<K, V> {
                entries: Mutex::new(HashMap::new()),
            });
            fresh
        })
        .clone();
    erased.downcast::<Partition<K, V>>().map_err(|_| {
        StateError::PartitionTypeMismatch {
            type_name: std::any::type_name::<V>().to_string(),
        }
        .into()
    })
}

/// Shared handle on a cached payload.
///
/// Dropping the last handle for a key removes the entry and disposes the
/// payload.
pub struct RefCounted<V: Disposable> {
    payload: Arc<V>,
    release: Option<Box<dyn FnOnce(&Arc<V>) + Send + Sync>>,
}

impl<V: Disposable> RefCounted<V> {
    fn new<K>(payload: Arc<V>, partition: Arc<Partition<K, V>>, key: K) -> Self
    where
        K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    {
        RefCounted {
            payload,
            release: Some(Box::new(move |payload: &Arc<V>| {
                release(&partition, &key, payload)
            })),
        }
    }

    /// The shared payload, for holders that must outlive the borrow
    pub fn arc(&self) -> &Arc<V> {
        &self.payload
    }
}

impl<V: Disposable> Deref for RefCounted<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.payload
    }
}

impl<V: Disposable> Drop for RefCounted<V> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&self.payload);
        }
    }
}

impl<V: Disposable> fmt::Debug for RefCounted<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefCounted({:p})", Arc::as_ptr(&self.payload))
    }
}

fn release<K, V>(partition: &Partition<K, V>, key: &K, payload: &Arc<V>)
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Disposable,
{
    let evicted = {
        let mut entries = partition.entries.lock();
        match entries.get_mut(key) {
            Some(slot) if Arc::ptr_eq(&slot.payload, payload) => {
                slot.count -= 1;
                if slot.count == 0 {
                    // key and payload are dropped after the lock is released
                    entries.remove_entry(key)
                } else {
                    None
                }
            }
            _ => {
                let err: ExError = StateError::StaleHandle {
                    key: key.to_string(),
                }
                .into();
                tracing::error!(err.code = err.code(), key = %key, "{}", err.message());
                None
            }
        }
    };

    if let Some((_key, slot)) = evicted {
        tracing::debug!(
            key = %key,
            payload = std::any::type_name::<V>(),
            "cache entry evicted"
        );
        slot.payload.dispose();
    }
}

/// Take a handle on the payload for `key`, building it with `factory` when
/// the partition has none.
///
/// # Errors
///
/// Whatever `factory` returns, or `InvariantViolation` when the partition
/// registry is inconsistent.
pub fn get_or_add<K, V, F>(key: K, settings: &Settings, factory: F) -> Result<RefCounted<V>, ExError>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Disposable,
    F: FnOnce() -> Result<Arc<V>, ExError>,
{
    let partition = partition::<K, V>(settings)?;

    {
        let mut entries = partition.entries.lock();
        if let Some(slot) = entries.get_mut(&key) {
            slot.count += 1;
            let payload = slot.payload.clone();
            drop(entries);
            return Ok(RefCounted::new(payload, partition, key));
        }
    }

    let created = factory()?;

    let (payload, loser) = {
        let mut entries = partition.entries.lock();
        match entries.get_mut(&key) {
            // another thread finished first; keep its payload
            Some(slot) => {
                slot.count += 1;
                (slot.payload.clone(), Some(created))
            }
            None => {
                entries.insert(
                    key.clone(),
                    Slot {
                        payload: created.clone(),
                        count: 1,
                    },
                );
                (created, None)
            }
        }
    };

    if let Some(loser) = loser {
        tracing::debug!(key = %key, "discarding concurrently built payload");
        loser.dispose();
    } else {
        tracing::debug!(
            key = %key,
            payload = std::any::type_name::<V>(),
            settings = settings.id(),
            "cache entry created"
        );
    }
    Ok(RefCounted::new(payload, partition, key))
}

/// Number of handles currently held for `key`
pub fn handle_count<K, V>(key: &K, settings: &Settings) -> usize
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Disposable,
{
    partition::<K, V>(settings)
        .map(|p| p.entries.lock().get(key).map_or(0, |slot| slot.count))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ReferenceHandling, SettingsSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[derive(Default)]
    struct Payload {
        disposed: AtomicUsize,
    }

    impl Disposable for Payload {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn isolated_settings(tag: &str) -> Arc<Settings> {
        let mut spec = SettingsSpec {
            reference_handling: ReferenceHandling::Structural,
            ..SettingsSpec::default()
        };
        spec.ignored_types.insert(format!("cache-test-{}", tag));
        Settings::intern(spec)
    }

    #[test]
    fn test_second_acquire_shares_payload() {
        let settings = isolated_settings("share");
        let a = get_or_add("k".to_string(), &settings, || Ok(Arc::new(Payload::default()))).unwrap();
        let b = get_or_add("k".to_string(), &settings, || -> Result<Arc<Payload>, ExError> {
            panic!("factory must not run for a live key")
        })
        .unwrap();

        assert!(Arc::ptr_eq(a.arc(), b.arc()));
        assert_eq!(handle_count::<String, Payload>(&"k".to_string(), &settings), 2);
    }

    #[test]
    fn test_last_release_disposes_once_and_evicts() {
        let settings = isolated_settings("evict");
        let a = get_or_add(1u64, &settings, || Ok(Arc::new(Payload::default()))).unwrap();
        let b = get_or_add(1u64, &settings, || Ok(Arc::new(Payload::default()))).unwrap();
        let payload = a.arc().clone();

        drop(a);
        assert_eq!(payload.disposed.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(payload.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(handle_count::<u64, Payload>(&1, &settings), 0);

        let c = get_or_add(1u64, &settings, || Ok(Arc::new(Payload::default()))).unwrap();
        assert!(!Arc::ptr_eq(c.arc(), &payload));
    }

    #[test]
    fn test_failed_factory_leaves_no_entry() {
        let settings = isolated_settings("fail");
        let result = get_or_add(7u64, &settings, || -> Result<Arc<Payload>, ExError> {
            Err(ExError::new(crate::errors::ExErrorKind::NotTrackable))
        });
        assert!(result.is_err());
        assert_eq!(handle_count::<u64, Payload>(&7, &settings), 0);
    }

    #[test]
    fn test_settings_partition_the_cache() {
        let a = isolated_settings("part-a");
        let b = isolated_settings("part-b");
        let x = get_or_add(3u64, &a, || Ok(Arc::new(Payload::default()))).unwrap();
        let y = get_or_add(3u64, &b, || Ok(Arc::new(Payload::default()))).unwrap();
        assert!(!Arc::ptr_eq(x.arc(), y.arc()));
    }

    #[test]
    fn test_concurrent_acquire_release_keeps_single_payload() {
        let settings = isolated_settings("threads");
        let built = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        struct Counted(Arc<AtomicUsize>);
        impl Disposable for Counted {
            fn dispose(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let settings = settings.clone();
                let built = built.clone();
                let disposed = disposed.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200 {
                        let handle = get_or_add(9u64, &settings, || {
                            built.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(Counted(disposed.clone())))
                        })
                        .unwrap();
                        drop(handle);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(handle_count::<u64, Counted>(&9, &settings), 0);
        assert_eq!(
            built.load(Ordering::SeqCst),
            disposed.load(Ordering::SeqCst)
        );
    }
}
