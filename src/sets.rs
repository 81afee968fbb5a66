//! Ordered, unique-by-key containers for tags and fields.
//!
//! Both sets keep entries in insertion order internally and sort lazily: a
//! dirty flag is set on insert and the next read (length, index access, or
//! snapshot) sorts once under the set's own lock. Keys are unique with exact,
//! case-sensitive comparison. A set never locks another set, so there is no
//! lock-ordering hazard.

use std::sync::{Mutex, MutexGuard};

use crate::error::InfluxError;
use crate::types::{Field, Tag};

#[derive(Debug)]
struct LazySorted<T> {
    entries: Vec<T>,
    sorted: bool,
}

impl<T> Default for LazySorted<T> {
    fn default() -> Self {
        LazySorted {
            entries: Vec::new(),
            sorted: true,
        }
    }
}

impl<T> LazySorted<T> {
    fn add(&mut self, entry: T, key_of: fn(&T) -> &str) -> Result<(), InfluxError> {
        for existing in &self.entries {
            if key_of(existing) == key_of(&entry) {
                return Err(InfluxError::DuplicateKey(key_of(&entry).to_string()));
            }
        }
        self.entries.push(entry);
        if self.entries.len() > 1 {
            self.sorted = false;
        }
        Ok(())
    }

    fn sort_if_needed(&mut self, key_of: fn(&T) -> &str) {
        if !self.sorted {
            // Keys are unique, so the sort has no ties to break.
            self.entries.sort_by(|a, b| key_of(a).cmp(key_of(b)));
            self.sorted = true;
        }
    }
}

// A poisoned lock only means another thread panicked while holding it; the
// entries and the dirty flag are always left in a consistent state, so the
// guard is recovered instead of propagating the poison.
fn lock_recovered<T>(mutex: &Mutex<LazySorted<T>>) -> MutexGuard<'_, LazySorted<T>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Sorted set of unique-by-key [`Tag`]s. Thread safe.
#[derive(Debug, Default)]
pub struct TagSet {
    inner: Mutex<LazySorted<Tag>>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag. Fails if a tag with the same key (exact, case-sensitive
    /// match) already exists.
    pub fn add(&self, tag: Tag) -> Result<(), InfluxError> {
        lock_recovered(&self.inner).add(tag, Tag::key)
    }

    /// Number of tags in the set.
    pub fn len(&self) -> usize {
        let mut inner = lock_recovered(&self.inner);
        inner.sort_if_needed(Tag::key);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tag at `index` in ascending key order.
    pub fn get(&self, index: usize) -> Option<Tag> {
        let mut inner = lock_recovered(&self.inner);
        inner.sort_if_needed(Tag::key);
        inner.entries.get(index).cloned()
    }

    /// Snapshot of all tags in ascending key order.
    pub fn to_sorted_vec(&self) -> Vec<Tag> {
        let mut inner = lock_recovered(&self.inner);
        inner.sort_if_needed(Tag::key);
        inner.entries.clone()
    }
}

impl Clone for TagSet {
    fn clone(&self) -> Self {
        let inner = lock_recovered(&self.inner);
        TagSet {
            inner: Mutex::new(LazySorted {
                entries: inner.entries.clone(),
                sorted: inner.sorted,
            }),
        }
    }
}

/// Sorted set of unique-by-key [`Field`]s. Thread safe.
#[derive(Debug, Default)]
pub struct FieldSet {
    inner: Mutex<LazySorted<Field>>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field. Fails if a field with the same key (exact,
    /// case-sensitive match) already exists.
    pub fn add(&self, field: Field) -> Result<(), InfluxError> {
        lock_recovered(&self.inner).add(field, Field::key)
    }

    /// Number of fields in the set.
    pub fn len(&self) -> usize {
        let mut inner = lock_recovered(&self.inner);
        inner.sort_if_needed(Field::key);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field at `index` in ascending key order.
    pub fn get(&self, index: usize) -> Option<Field> {
        let mut inner = lock_recovered(&self.inner);
        inner.sort_if_needed(Field::key);
        inner.entries.get(index).cloned()
    }

    /// Snapshot of all fields in ascending key order.
    pub fn to_sorted_vec(&self) -> Vec<Field> {
        let mut inner = lock_recovered(&self.inner);
        inner.sort_if_needed(Field::key);
        inner.entries.clone()
    }
}

impl Clone for FieldSet {
    fn clone(&self) -> Self {
        let inner = lock_recovered(&self.inner);
        FieldSet {
            inner: Mutex::new(LazySorted {
                entries: inner.entries.clone(),
                sorted: inner.sorted,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn tag(key: &str, value: &str) -> Tag {
        Tag::new(key, value).unwrap()
    }

    #[test]
    fn entries_come_back_in_ascending_key_order() {
        let set = TagSet::new();
        set.add(tag("zone", "1")).unwrap();
        set.add(tag("app", "api")).unwrap();
        set.add(tag("host", "a")).unwrap();

        let keys: Vec<String> = set
            .to_sorted_vec()
            .iter()
            .map(|t| t.key().to_string())
            .collect();
        assert_eq!(keys, vec!["app", "host", "zone"]);
        assert_eq!(set.get(0).unwrap().key(), "app");
        assert_eq!(set.get(2).unwrap().key(), "zone");
        assert!(set.get(3).is_none());
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let forward = FieldSet::new();
        let backward = FieldSet::new();
        for key in ["a", "b", "c"] {
            forward.add(Field::new(key, 1i64).unwrap()).unwrap();
        }
        for key in ["c", "b", "a"] {
            backward.add(Field::new(key, 1i64).unwrap()).unwrap();
        }
        let forward_keys: Vec<String> = forward
            .to_sorted_vec()
            .iter()
            .map(|f| f.key().to_string())
            .collect();
        let backward_keys: Vec<String> = backward
            .to_sorted_vec()
            .iter()
            .map(|f| f.key().to_string())
            .collect();
        assert_eq!(forward_keys, backward_keys);
    }

    #[test]
    fn duplicate_key_fails_regardless_of_value() {
        let set = FieldSet::new();
        set.add(Field::new("k", 1i64).unwrap()).unwrap();
        let err = set.add(Field::new("k", 2.5f64).unwrap()).unwrap_err();
        assert!(matches!(err, InfluxError::DuplicateKey(_)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).unwrap().value(), &FieldValue::Integer(1));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let set = TagSet::new();
        set.add(tag("Key", "a")).unwrap();
        set.add(tag("key", "b")).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn concurrent_inserts_never_lose_or_duplicate_entries() {
        let set = Arc::new(TagSet::new());
        let num_threads = 8;
        let per_thread = 50;

        let mut handles = vec![];
        for thread_id in 0..num_threads {
            let set = Arc::clone(&set);
            handles.push(thread::spawn(move || {
                for i in 0..per_thread {
                    let key = format!("t{:02}k{:02}", thread_id, i);
                    set.add(tag(&key, "v")).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.len(), num_threads * per_thread);
        let snapshot = set.to_sorted_vec();
        let mut keys: Vec<&str> = snapshot.iter().map(|t| t.key()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys sorted, no dups");
        keys.dedup();
        assert_eq!(keys.len(), num_threads * per_thread);
    }

    #[test]
    fn concurrent_duplicate_inserts_admit_exactly_one() {
        let set = Arc::new(FieldSet::new());
        let successes = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for i in 0..8 {
            let set = Arc::clone(&set);
            let successes = Arc::clone(&successes);
            handles.push(thread::spawn(move || {
                if set.add(Field::new("shared", i as i64).unwrap()).is_ok() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }
}
