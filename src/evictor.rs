//! Reclaims budget by closing unreferenced mappings, least recently accessed first.
//!
//! Mappings with outstanding references are never candidates, so a view can't be unmapped out from under its holder
//! here.  This is independent of the [crate::AccessTracker], which only feeds statistics.
use std::sync::Arc;

use crate::mapping_table::MappingTable;
use crate::*;

/// Close unreferenced mappings until at least `required` bytes have been freed.
///
/// Returns the bytes freed.  If every candidate is closed and it still isn't enough, this fails with
/// [CacheError::ResourceExhausted], but whatever was closed stays closed.
pub(crate) fn evict<P: Platform>(
    table: &mut MappingTable<P::Handle>,
    platform: &P,
    required: u64,
) -> Result<u64, CacheError> {
    let mut freed = 0;

    for key in table.eviction_candidates() {
        if freed >= required {
            break;
        }

        let mapping = match table.evict(&key) {
            Some(m) => m,
            None => continue,
        };
        freed += mapping.mapped_size;
        log::debug!(
            "Evicting {:?} ({} bytes, {} mapped)",
            key,
            mapping.file_size,
            mapping.mapped_size
        );

        match Arc::try_unwrap(mapping.handle) {
            Ok(handle) => platform.close_mapping(handle)?,
            // Something detached kept the region alive past its release; it unmaps when that last holder drops.
            Err(_) => log::debug!("{:?} is still borrowed, deferring unmap", key),
        }
    }

    if freed < required {
        return Err(CacheError::ResourceExhausted { required, freed });
    }
    Ok(freed)
}

#[cfg(test)]
mod tests {
    use std::io::Error as IoError;
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;

    use super::*;

    /// Hands out fake regions and records what gets closed.
    #[derive(Default)]
    struct RecordingPlatform {
        closed: Mutex<Vec<u64>>,
    }

    struct FakeRegion(u64);

    impl MappedRegion for FakeRegion {
        fn bytes(&self) -> &[u8] {
            &[]
        }

        fn mapped_size(&self) -> u64 {
            self.0
        }
    }

    impl Platform for RecordingPlatform {
        type Handle = FakeRegion;

        fn file_size(&self, _path: &Path) -> Result<u64, IoError> {
            unimplemented!()
        }

        fn open_mapping(&self, _path: &Path, size: u64) -> Result<FakeRegion, MappingError> {
            Ok(FakeRegion(size))
        }

        fn close_mapping(&self, handle: FakeRegion) -> Result<(), MappingError> {
            self.closed.lock().push(handle.0);
            Ok(())
        }
    }

    fn key(k: &str) -> PathBuf {
        PathBuf::from("/assets").join(k)
    }

    /// Insert a mapping and drop its reference, leaving it evictable.
    fn insert_released(table: &mut MappingTable<FakeRegion>, k: &str, size: u64) {
        let (id, _) = table.insert(key(k), FakeRegion(size), size, size);
        table.release(&key(k), Some(id)).unwrap();
    }

    #[test]
    fn test_evicts_oldest_first() {
        let platform = RecordingPlatform::default();
        let mut table = MappingTable::new(10);
        insert_released(&mut table, "a", 100);
        insert_released(&mut table, "b", 200);
        insert_released(&mut table, "c", 300);

        let freed = evict(&mut table, &platform, 250).unwrap();
        assert_eq!(freed, 300);
        assert_eq!(*platform.closed.lock(), vec![100, 200]);
        assert!(table.get(&key("a")).is_none());
        assert!(table.get(&key("b")).is_none());
        assert!(table.get(&key("c")).is_some());
        assert_eq!(table.memory_used(), 300);
        assert_eq!(table.evictions(), 2);
    }

    #[test]
    fn test_skips_referenced() {
        let platform = RecordingPlatform::default();
        let mut table = MappingTable::new(10);
        // Oldest, but pinned.
        table.insert(key("pinned"), FakeRegion(100), 100, 100);
        insert_released(&mut table, "b", 100);

        assert_eq!(evict(&mut table, &platform, 100).unwrap(), 100);
        assert!(table.get(&key("pinned")).is_some());
        assert!(table.get(&key("b")).is_none());
    }

    #[test]
    fn test_partial_eviction_is_kept() {
        let platform = RecordingPlatform::default();
        let mut table = MappingTable::new(10);
        insert_released(&mut table, "a", 100);
        table.insert(key("pinned"), FakeRegion(500), 500, 500);

        match evict(&mut table, &platform, 300) {
            Err(CacheError::ResourceExhausted { required, freed }) => {
                assert_eq!(required, 300);
                assert_eq!(freed, 100);
            }
            x => panic!("Should be exhausted: {:?}", x),
        }
        assert!(table.get(&key("a")).is_none());
        assert_eq!(table.memory_used(), 500);
    }

    #[test]
    fn test_borrowed_region_is_not_closed() {
        let platform = RecordingPlatform::default();
        let mut table = MappingTable::new(10);
        let (id, region) = table.insert(key("a"), FakeRegion(100), 100, 100);
        table.release(&key("a"), Some(id)).unwrap();

        // The accounting is freed even though `region` keeps the memory alive.
        assert_eq!(evict(&mut table, &platform, 100).unwrap(), 100);
        assert!(platform.closed.lock().is_empty());
        assert_eq!(table.memory_used(), 0);
        assert_eq!(region.mapped_size(), 100);
    }
}
