//! The [MappingTable] is the record of which files are mapped, how much of the budget they use, and who holds them.
//!
//! It does no locking of its own and performs no IO: the manager keeps it behind one lock, and every method here
//! leaves the entries and the memory counter consistent with each other before returning.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::*;

type CacheHashMap<V> = std::collections::HashMap<PathBuf, V, ahash::RandomState>;

/// One mapped file.
pub(crate) struct Mapping<H> {
    /// Distinguishes this mapping from earlier or later ones for the same path.
    pub(crate) id: u64,
    pub(crate) file_size: u64,
    pub(crate) mapped_size: u64,
    pub(crate) handle: Arc<H>,
    /// Value of the table's access clock at the most recent acquire.
    pub(crate) last_access: u64,
    pub(crate) ref_count: u64,
    // Reserved for compressed entries, which aren't produced yet.
    #[allow(dead_code)]
    pub(crate) is_compressed: bool,
    #[allow(dead_code)]
    pub(crate) original_size: u64,
}

pub(crate) struct MappingTable<H> {
    entries: CacheHashMap<Mapping<H>>,
    memory_used: u64,
    tracker: AccessTracker<PathBuf>,
    /// Ticks once per acquire, so access times are unique and strictly ordered.
    clock: u64,
    next_id: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<H> MappingTable<H> {
    pub(crate) fn new(tracker_capacity: usize) -> MappingTable<H> {
        MappingTable {
            entries: Default::default(),
            memory_used: 0,
            tracker: AccessTracker::new(tracker_capacity),
            clock: 0,
            next_id: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Take another reference to a live mapping, returning its id and region.  Counts a miss if there isn't one.
    ///
    /// Takes `&PathBuf` because that's what the tracker is keyed by; a hit allocates nothing.
    pub(crate) fn acquire_existing(&mut self, key: &PathBuf) -> Option<(u64, Arc<H>)> {
        let now = self.tick();
        let found = match self.entries.get_mut(key) {
            Some(m) => {
                m.ref_count += 1;
                m.last_access = now;
                Some((m.id, m.handle.clone()))
            }
            None => None,
        };

        match found {
            Some(_) => {
                self.hits += 1;
                self.tracker.touch(key);
            }
            None => self.misses += 1,
        }
        found
    }

    /// Register a freshly opened mapping with one reference held.
    pub(crate) fn insert(
        &mut self,
        key: PathBuf,
        handle: H,
        file_size: u64,
        mapped_size: u64,
    ) -> (u64, Arc<H>) {
        debug_assert!(!self.entries.contains_key(&key));
        let now = self.tick();
        let id = self.next_id;
        self.next_id += 1;

        let handle = Arc::new(handle);
        self.tracker.touch(&key);
        self.entries.insert(
            key,
            Mapping {
                id,
                file_size,
                mapped_size,
                handle: handle.clone(),
                last_access: now,
                ref_count: 1,
                is_compressed: false,
                original_size: file_size,
            },
        );
        self.memory_used += mapped_size;
        (id, handle)
    }

    /// Drop one reference.
    ///
    /// With an `id`, only that generation of the mapping is released; anything else is treated as already gone.
    pub(crate) fn release(&mut self, key: &Path, id: Option<u64>) -> Result<(), CacheError> {
        let m = match self.entries.get_mut(key) {
            Some(m) => m,
            None => return Ok(()),
        };
        if let Some(id) = id {
            if id != m.id {
                return Ok(());
            }
        }
        if m.ref_count == 0 {
            return Err(CacheError::InvalidRelease {
                path: key.to_path_buf(),
            });
        }
        m.ref_count -= 1;
        Ok(())
    }

    /// Remove a mapping from the table, handing back its bookkeeping so the caller can close it.
    pub(crate) fn remove(&mut self, key: &PathBuf) -> Option<Mapping<H>> {
        let m = self.entries.remove(key)?;
        self.memory_used -= m.mapped_size;
        self.tracker.remove(key);
        Some(m)
    }

    /// Like [MappingTable::remove], but counts as an eviction.
    pub(crate) fn evict(&mut self, key: &PathBuf) -> Option<Mapping<H>> {
        let m = self.remove(key)?;
        self.evictions += 1;
        Some(m)
    }

    /// Keys of all unreferenced mappings, least recently accessed first.
    pub(crate) fn eviction_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = self
            .entries
            .iter()
            .filter(|(_, m)| m.ref_count == 0)
            .map(|(k, m)| (m.last_access, k))
            .collect::<Vec<_>>();
        // Access times are unique, but fall back to the key so the order is total regardless.
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, k)| k.clone()).collect()
    }

    /// Empty the table and reset every counter, returning what was in it.
    pub(crate) fn take_all(&mut self) -> Vec<(PathBuf, Mapping<H>)> {
        self.memory_used = 0;
        self.tracker.clear();
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
        self.entries.drain().collect()
    }

    pub(crate) fn get(&self, key: &Path) -> Option<&Mapping<H>> {
        self.entries.get(key)
    }

    pub(crate) fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn tracker_len(&self) -> usize {
        self.tracker.len()
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits
    }

    pub(crate) fn misses(&self) -> u64 {
        self.misses
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Sum of mapped sizes, recomputed from scratch.
    #[cfg(test)]
    pub(crate) fn recount_memory(&self) -> u64 {
        self.entries.values().map(|m| m.mapped_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> PathBuf {
        PathBuf::from("/assets").join(k)
    }

    #[test]
    fn test_insert_and_acquire() {
        let mut table = MappingTable::<&'static str>::new(10);
        assert!(table.acquire_existing(&key("a")).is_none());

        let (id, handle) = table.insert(key("a"), "aaaa", 4, 4096);
        assert_eq!(*handle, "aaaa");
        assert_eq!(table.memory_used(), 4096);
        assert_eq!(table.tracker_len(), 1);

        let (again, _) = table.acquire_existing(&key("a")).expect("Should be mapped");
        assert_eq!(again, id);
        let m = table.get(&key("a")).unwrap();
        assert_eq!(m.ref_count, 2);
        assert_eq!(m.file_size, 4);
        assert_eq!(m.original_size, 4);
        assert!(!m.is_compressed);

        assert_eq!(table.hits(), 1);
        assert_eq!(table.misses(), 1);
    }

    #[test]
    fn test_release() {
        let mut table = MappingTable::<()>::new(10);
        let (id, _) = table.insert(key("a"), (), 1, 1);

        // Stale generations are ignored.
        table.release(&key("a"), Some(id + 1)).unwrap();
        assert_eq!(table.get(&key("a")).unwrap().ref_count, 1);

        table.release(&key("a"), Some(id)).unwrap();
        // Reaching zero doesn't unmap.
        assert_eq!(table.get(&key("a")).unwrap().ref_count, 0);
        assert_eq!(table.memory_used(), 1);

        match table.release(&key("a"), None) {
            Err(CacheError::InvalidRelease { path }) => assert_eq!(path, key("a")),
            x => panic!("Should reject the extra release: {:?}", x),
        }

        // Unknown keys are fine.
        table.release(&key("b"), None).unwrap();
    }

    #[test]
    fn test_candidates_oldest_first() {
        let mut table = MappingTable::<()>::new(10);
        for k in &["a", "b", "c", "d"] {
            let (id, _) = table.insert(key(k), (), 1, 1);
            table.release(&key(k), Some(id)).unwrap();
        }
        // Touch b, and keep c referenced.
        let (b, _) = table.acquire_existing(&key("b")).unwrap();
        table.release(&key("b"), Some(b)).unwrap();
        table.acquire_existing(&key("c")).unwrap();

        assert_eq!(
            table.eviction_candidates(),
            vec![key("a"), key("d"), key("b")]
        );
    }

    #[test]
    fn test_tracker_is_bounded_separately() {
        let mut table = MappingTable::<()>::new(1);
        table.insert(key("a"), (), 1, 1);
        table.insert(key("b"), (), 1, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.tracker_len(), 1);

        // Falling out of the tracker doesn't stop a hit.
        assert!(table.acquire_existing(&key("a")).is_some());
        assert_eq!(table.tracker_len(), 1);
        assert_eq!(table.memory_used(), 2);

        // Nor removal of something the tracker has already dropped.
        assert!(table.remove(&key("b")).is_some());
        assert_eq!(table.tracker_len(), 1);
        assert_eq!(table.memory_used(), 1);
    }

    #[test]
    fn test_remove_and_take_all() {
        let mut table = MappingTable::<()>::new(10);
        table.insert(key("a"), (), 10, 16);
        table.insert(key("b"), (), 20, 32);

        let m = table.evict(&key("a")).unwrap();
        assert_eq!(m.mapped_size, 16);
        assert_eq!(table.memory_used(), 32);
        assert_eq!(table.tracker_len(), 1);
        assert_eq!(table.evictions(), 1);
        assert!(table.evict(&key("a")).is_none());

        let all = table.take_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, key("b"));
        assert_eq!(table.len(), 0);
        assert_eq!(table.memory_used(), 0);
        assert_eq!(table.tracker_len(), 0);
        assert_eq!(table.evictions(), 0);
        assert_eq!(table.recount_memory(), 0);
    }
}
