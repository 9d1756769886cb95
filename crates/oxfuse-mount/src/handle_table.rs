//! Concurrent table of open-file state keyed by FUSE file handle.
//!
//! The kernel hands back whatever `u64` a filesystem returned from
//! `open`/`create`/`opendir` on every later call for that file. Filesystems
//! that keep per-open state allocate those numbers here and look the state
//! up again on `read`, `write`, `release` and friends.
//!
//! Handle `0` is never allocated, so implementations can keep using it as
//! the "no state" handle that stateless `open` defaults return.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe map from allocated handle numbers to per-open state.
///
/// ```
/// use oxfuse_mount::HandleTable;
///
/// let table: HandleTable<String> = HandleTable::new();
///
/// let a = table.insert("a.txt".to_string());
/// let b = table.insert("b.txt".to_string());
/// assert_ne!(a, b);
///
/// assert_eq!(table.remove(a), Some("a.txt".to_string()));
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V> HandleTable<V> {
    /// Creates an empty table. The first allocated handle is `1`.
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates an empty table with room for `capacity` open handles.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: DashMap::with_capacity(capacity),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `value` under a freshly allocated handle and returns it.
    ///
    /// Allocation wraps around on overflow, skipping `0` and any handle
    /// that is still open.
    pub fn insert(&self, value: V) -> u64 {
        let mut value = Some(value);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id)
                && let Some(value) = value.take()
            {
                entry.insert(value);
                return id;
            }
        }
    }

    /// Borrows the state for `handle`.
    pub fn get(&self, handle: u64) -> Option<Ref<'_, u64, V>> {
        self.handles.get(&handle)
    }

    /// Mutably borrows the state for `handle`.
    pub fn get_mut(&self, handle: u64) -> Option<RefMut<'_, u64, V>> {
        self.handles.get_mut(&handle)
    }

    /// Removes and returns the state for `handle`, typically on `release`.
    pub fn remove(&self, handle: u64) -> Option<V> {
        self.handles.remove(&handle).map(|(_, v)| v)
    }

    /// Returns `true` if `handle` is open.
    pub fn contains(&self, handle: u64) -> bool {
        self.handles.contains_key(&handle)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no handle is open.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Removes every open handle and returns the states, for `destroy`.
    pub fn drain(&self) -> Vec<(u64, V)> {
        let keys: Vec<u64> = self.handles.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.handles.remove(&key))
            .collect()
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_handles_start_at_one() {
        let table = HandleTable::new();

        assert_eq!(table.insert("first"), 1);
        assert_eq!(table.insert("second"), 2);
        assert_eq!(table.insert("third"), 3);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_get_and_get_mut() {
        let table = HandleTable::new();
        let fh = table.insert(String::from("hello"));

        table.get_mut(fh).expect("open handle").push_str(" world");

        assert_eq!(*table.get(fh).expect("still open"), "hello world");
    }

    #[test]
    fn test_remove() {
        let table = HandleTable::new();
        let fh = table.insert(7_u32);

        assert!(table.contains(fh));
        assert_eq!(table.remove(fh), Some(7));
        assert!(!table.contains(fh));
        assert!(table.is_empty());
        assert_eq!(table.remove(fh), None);
    }

    #[test]
    fn test_zero_is_never_allocated() {
        let table = HandleTable::new();
        table.next_id.store(u64::MAX, Ordering::Relaxed);

        let last = table.insert('a');
        let wrapped = table.insert('b');

        assert_eq!(last, u64::MAX);
        assert_eq!(wrapped, 1);
    }

    #[test]
    fn test_wraparound_skips_open_handles() {
        let table = HandleTable::new();
        let one = table.insert("kept open");
        assert_eq!(one, 1);

        table.next_id.store(u64::MAX, Ordering::Relaxed);
        table.insert("max");

        assert_eq!(table.insert("after wrap"), 2);
    }

    #[test]
    fn test_drain() {
        let table = HandleTable::with_capacity(4);
        table.insert(1);
        table.insert(2);

        let mut drained: Vec<i32> = table.drain().into_iter().map(|(_, v)| v).collect();
        drained.sort_unstable();

        assert_eq!(drained, vec![1, 2]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_insert_yields_unique_handles() {
        let table = Arc::new(HandleTable::new());
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| table.insert(worker * 100 + i))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for fh in worker.join().unwrap() {
                assert!(seen.insert(fh), "handle {fh} allocated twice");
            }
        }
        assert_eq!(table.len(), 400);
    }
}
