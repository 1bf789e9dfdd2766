//! An [AccessTracker] is a count-bounded recency list of keys.
//!
//! This is implemented as a vec-backed doubly linked list with a free list, plus an auxiliary hash-based index from key
//! to slot.
//!
//! The tracker only observes.  Dropping a key off the tail when it is full has no effect on the mapping with that key,
//! and the byte budget is enforced elsewhere by scanning the mapping table.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

struct OccupiedEntry<K> {
    key: Arc<K>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptyEntry {
    next_empty: Option<usize>,
}

enum TrackerEntry<K> {
    /// This entry is empty, possibly with a pointer at the next empty entry.
    Empty(EmptyEntry),
    /// This entry is occupied, and doubly linked to the previous and next entry.
    Occupied(OccupiedEntry<K>),
}

impl<K> TrackerEntry<K> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedEntry<K> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedEntry<K> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptyEntry {
        match self {
            TrackerEntry::Empty(ref mut x) => x,
            _ => panic!("Entry should be empty"),
        }
    }
}

pub struct AccessTracker<K: Hash + Eq> {
    entries: Vec<TrackerEntry<K>>,
    /// Points at the index of the key.
    index: HashMap<Arc<K>, usize, RandomState>,
    capacity: usize,
    entries_head: Option<usize>,
    entries_tail: Option<usize>,
    empty_head: Option<usize>,
}

impl<K: Hash + Eq + Clone> AccessTracker<K> {
    pub fn new(capacity: usize) -> AccessTracker<K> {
        AccessTracker {
            entries: Default::default(),
            index: Default::default(),
            capacity,
            entries_head: None,
            entries_tail: None,
            empty_head: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Entirely unlink an occupied index from the list.
    fn unlink_index(&mut self, index: usize) {
        // Easiest to handle the tail first.
        if Some(index) == self.entries_tail {
            self.entries_tail = self.entries[index].as_occupied().prev;
        }

        if Some(index) == self.entries_head {
            // unlinking the head is special.
            self.entries_head = self.entries[index].as_occupied().next;
            if let Some(n) = self.entries_head {
                self.entries[n].as_occupied_mut().prev = None;
            }

            return;
        }

        let old_prev = self.entries[index]
            .as_occupied()
            .prev
            .expect("Isn't the head");
        let old_next = self.entries[index].as_occupied().next;
        self.entries[old_prev].as_occupied_mut().next = old_next;
        if let Some(n) = old_next {
            self.entries[n].as_occupied_mut().prev = Some(old_prev);
        }
    }

    /// Link an unlinked occupied index in at the head.
    fn link_at_head(&mut self, index: usize) {
        {
            let e = self.entries[index].as_occupied_mut();
            e.prev = None;
            e.next = self.entries_head;
        }
        if let Some(h) = self.entries_head {
            self.entries[h].as_occupied_mut().prev = Some(index);
        }
        self.entries_head = Some(index);

        // If this is the only entry, there's no tail yet.
        if self.entries_tail.is_none() {
            self.entries_tail = Some(index);
        }
    }

    /// Make a specific index of the list become empty, returning the key it held.
    fn become_empty(&mut self, index: usize) -> Arc<K> {
        self.unlink_index(index);
        let mut old = TrackerEntry::Empty(EmptyEntry {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.entries[index]);
        self.empty_head = Some(index);
        match old {
            TrackerEntry::Occupied(OccupiedEntry { key, .. }) => {
                self.index.remove(&key);
                key
            }
            _ => panic!("Should have been occupied"),
        }
    }

    /// Find an available empty index, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.entries[e].as_empty_mut().next_empty;
            return e;
        }

        self.entries
            .push(TrackerEntry::Empty(EmptyEntry { next_empty: None }));
        self.entries.len() - 1
    }

    /// Record an access to `key`, making it the most recent.
    ///
    /// Returns the key that fell off the tail to make room, if any.
    pub fn touch(&mut self, key: &K) -> Option<K> {
        if let Some(&ind) = self.index.get(key) {
            self.unlink_index(ind);
            self.link_at_head(ind);
            return None;
        }

        let key_arc = Arc::new(key.clone());
        let ind = self.find_empty();
        self.entries[ind] = TrackerEntry::Occupied(OccupiedEntry {
            key: key_arc.clone(),
            prev: None,
            next: None,
        });
        self.index.insert(key_arc, ind);
        self.link_at_head(ind);

        if self.index.len() <= self.capacity {
            return None;
        }
        let tail = self
            .entries_tail
            .expect("Not enough entries to explain the length");
        let dropped = self.become_empty(tail);
        Some((*dropped).clone())
    }

    /// Stop tracking `key`.  Returns whether it was tracked.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&ind) => {
                self.become_empty(ind);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.entries_head = None;
        self.entries_tail = None;
        self.empty_head = None;
    }

    /// Iterator visiting keys in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        let mut ind = self.entries_head;
        std::iter::from_fn(move || {
            let next = ind?;
            let ret = self.entries[next].as_occupied();
            ind = ret.next;
            Some(&*ret.key)
        })
    }
}
